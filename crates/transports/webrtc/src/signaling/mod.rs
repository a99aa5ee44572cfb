//! SignalR hub signaling
//!
//! [`HubSignalingClient`] speaks the SignalR JSON hub protocol over a
//! WebSocket (negotiation skipped), invoking `SendOffer` / `SendAnswer` /
//! `SendIce` / `GetConnectionId` on the hub and receiving `ReceiveOffer` /
//! `ReceiveAnswer` / `ReceiveIce` invocations from it.

mod client;
pub mod protocol;

pub use client::HubSignalingClient;
