//! Signaling client contract and message types
//!
//! The relay speaks a small RPC vocabulary. Outbound: `SendOffer`,
//! `SendAnswer`, `SendIce` (target, payload) and `GetConnectionId`.
//! Inbound: `ReceiveOffer`, `ReceiveAnswer`, `ReceiveIce` (sender, payload).
//! Payloads are opaque to everything but the transport engine.

pub mod memory;

pub use memory::{MemoryRelay, MemorySignalingClient};

use crate::{PeerId, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Inbound method names
pub mod methods {
    pub const RECEIVE_OFFER: &str = "ReceiveOffer";
    pub const RECEIVE_ANSWER: &str = "ReceiveAnswer";
    pub const RECEIVE_ICE: &str = "ReceiveIce";
    pub const SEND_OFFER: &str = "SendOffer";
    pub const SEND_ANSWER: &str = "SendAnswer";
    pub const SEND_ICE: &str = "SendIce";
    pub const GET_CONNECTION_ID: &str = "GetConnectionId";
}

/// Message delivered by the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundSignal {
    Offer { from: PeerId, payload: String },
    Answer { from: PeerId, payload: String },
    Ice { from: PeerId, payload: String },
    /// Method this build does not handle
    Unknown { method: String },
}

impl InboundSignal {
    /// Build from a relay invocation `method(sender, payload)`
    pub fn from_invocation(method: &str, from: PeerId, payload: String) -> Self {
        match method {
            methods::RECEIVE_OFFER => InboundSignal::Offer { from, payload },
            methods::RECEIVE_ANSWER => InboundSignal::Answer { from, payload },
            methods::RECEIVE_ICE => InboundSignal::Ice { from, payload },
            other => InboundSignal::Unknown {
                method: other.to_string(),
            },
        }
    }

    pub fn method(&self) -> &str {
        match self {
            InboundSignal::Offer { .. } => methods::RECEIVE_OFFER,
            InboundSignal::Answer { .. } => methods::RECEIVE_ANSWER,
            InboundSignal::Ice { .. } => methods::RECEIVE_ICE,
            InboundSignal::Unknown { method } => method,
        }
    }

    pub fn sender(&self) -> Option<&PeerId> {
        match self {
            InboundSignal::Offer { from, .. }
            | InboundSignal::Answer { from, .. }
            | InboundSignal::Ice { from, .. } => Some(from),
            InboundSignal::Unknown { .. } => None,
        }
    }
}

/// Negotiation artifact addressed to a remote peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundSignal {
    Offer { to: PeerId, payload: String },
    Answer { to: PeerId, payload: String },
    Ice { to: PeerId, payload: String },
}

impl OutboundSignal {
    pub fn method(&self) -> &'static str {
        match self {
            OutboundSignal::Offer { .. } => methods::SEND_OFFER,
            OutboundSignal::Answer { .. } => methods::SEND_ANSWER,
            OutboundSignal::Ice { .. } => methods::SEND_ICE,
        }
    }

    pub fn target(&self) -> &PeerId {
        match self {
            OutboundSignal::Offer { to, .. }
            | OutboundSignal::Answer { to, .. }
            | OutboundSignal::Ice { to, .. } => to,
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            OutboundSignal::Offer { payload, .. }
            | OutboundSignal::Answer { payload, .. }
            | OutboundSignal::Ice { payload, .. } => payload,
        }
    }

    /// Same artifact as the receiving side sees it
    pub fn into_inbound(self, from: PeerId) -> InboundSignal {
        match self {
            OutboundSignal::Offer { payload, .. } => InboundSignal::Offer { from, payload },
            OutboundSignal::Answer { payload, .. } => InboundSignal::Answer { from, payload },
            OutboundSignal::Ice { payload, .. } => InboundSignal::Ice { from, payload },
        }
    }
}

/// Link-level notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    Connected { identity: PeerId },
    Reconnecting { attempt: u32 },
    /// Link re-established under a new identity
    IdentityChanged {
        previous: Option<PeerId>,
        current: PeerId,
    },
    /// A fire-and-forget send did not reach the relay
    DeliveryFailed {
        target: PeerId,
        method: String,
        reason: String,
    },
    /// Link is gone and will not come back on its own
    Closed { reason: String },
}

/// Inbound dispatch callback
pub type SignalHandler = Arc<dyn Fn(InboundSignal) + Send + Sync>;

/// One durable logical connection to the signaling relay
#[async_trait]
pub trait SignalingClient: Send + Sync {
    /// Establish the link and resolve the local identity
    ///
    /// Fails with `SignalingUnavailable` when the relay cannot be reached and
    /// with `IdentityRetrievalFailed` when the link is up but the identity
    /// call fails.
    async fn connect(&self) -> Result<PeerId>;

    fn identity(&self) -> Option<PeerId>;

    fn is_connected(&self) -> bool;

    /// Fire-and-forget; failures surface as [`SignalingEvent::DeliveryFailed`]
    fn send(&self, signal: OutboundSignal);

    /// Install the inbound handler, replacing any previous one
    fn set_handler(&self, handler: SignalHandler);

    fn subscribe(&self) -> broadcast::Receiver<SignalingEvent>;

    /// Stop the link and any reconnection
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_from_invocation() {
        let s = InboundSignal::from_invocation("ReceiveOffer", "a".into(), "{}".into());
        assert!(matches!(s, InboundSignal::Offer { .. }));
        assert_eq!(s.sender().map(String::as_str), Some("a"));

        let s = InboundSignal::from_invocation("ReceiveGreeting", "a".into(), "{}".into());
        assert_eq!(
            s,
            InboundSignal::Unknown {
                method: "ReceiveGreeting".to_string()
            }
        );
        assert_eq!(s.sender(), None);
    }

    #[test]
    fn test_outbound_accessors() {
        let s = OutboundSignal::Ice {
            to: "b".into(),
            payload: "cand".into(),
        };
        assert_eq!(s.method(), "SendIce");
        assert_eq!(s.target(), "b");
        assert_eq!(s.payload(), "cand");
        assert_eq!(
            s.into_inbound("a".into()),
            InboundSignal::Ice {
                from: "a".into(),
                payload: "cand".into()
            }
        );
    }
}
