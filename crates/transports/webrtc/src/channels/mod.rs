//! Application data channel over webrtc-rs
//!
//! [`WebRtcDataChannel`] wraps an `RTCDataChannel` and forwards its open,
//! close and text-message callbacks into the owning session as transport
//! events. Binary frames are not part of the envelope protocol and are
//! dropped.

mod data_channel;

pub use data_channel::{WebRtcDataChannel, MAX_TEXT_FRAME};
