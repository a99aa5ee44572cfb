//! Signaling message router
//!
//! Pure dispatch from relay messages to session actors. Role selection:
//!
//! | Inbound  | Role if the session is new |
//! |----------|----------------------------|
//! | offer    | responder                  |
//! | answer   | initiator                  |
//! | candidate| responder                  |
//!
//! An existing session keeps whatever role it was created with.

use crate::registry::SessionRegistry;
use crate::session::{SessionCommand, SessionRole};
use crate::signaling::InboundSignal;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct SignalRouter {
    registry: Arc<SessionRegistry>,
}

impl SignalRouter {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Route one inbound message to its session, creating it on first contact
    pub async fn dispatch(&self, signal: InboundSignal) -> Result<()> {
        let (from, role, command) = match signal {
            InboundSignal::Offer { from, payload } => {
                (from, SessionRole::Responder, SessionCommand::RemoteOffer(payload))
            }
            InboundSignal::Answer { from, payload } => {
                (from, SessionRole::Initiator, SessionCommand::RemoteAnswer(payload))
            }
            InboundSignal::Ice { from, payload } => (
                from,
                SessionRole::Responder,
                SessionCommand::RemoteCandidate(payload),
            ),
            InboundSignal::Unknown { method } => {
                warn!(%method, "Ignoring unknown signaling method");
                return Ok(());
            }
        };

        let (handle, created) = self.registry.get_or_create(&from, role).await?;
        if created {
            debug!(peer_id = %from, role = %handle.role(), "First contact");
        }
        handle.post(command)
    }
}
