//! Transport session state machine
//!
//! Pure data: no I/O, no locks. The actor in [`super::actor`] feeds inputs
//! and performs the side effects; this table only decides whether a step is
//! legal and where it lands.

use crate::transport::{CandidateType, SelectedPath};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side produced the first offer for this session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionRole {
    Initiator,
    Responder,
}

impl SessionRole {
    pub fn is_initiator(&self) -> bool {
        matches!(self, SessionRole::Initiator)
    }
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRole::Initiator => f.write_str("initiator"),
            SessionRole::Responder => f.write_str("responder"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    New,
    NegotiatingOffer,
    NegotiatingAnswer,
    PathDiscovery,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Something that happened to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionInput {
    /// Local offer created and set
    LocalOfferCreated,
    /// Local offer withdrawn to accept a colliding remote offer
    LocalOfferRolledBack,
    /// Remote offer applied
    RemoteOfferApplied,
    /// Answer to a remote offer produced and sent
    LocalAnswerSent,
    /// Remote answer applied to our offer
    RemoteAnswerApplied,
    /// Engine reports connectivity
    TransportConnected,
    /// Renegotiation finished on a transport that never dropped
    RenegotiationComplete,
    TransportDisconnected,
    TransportClosed,
    TransportFailed,
    /// Local teardown
    Closed,
    /// Optional connect-attempt bound elapsed
    PathDiscoveryTimedOut,
}

impl SessionState {
    /// No further input changes a terminal session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Disconnected | SessionState::Failed | SessionState::Closed
        )
    }

    pub fn is_negotiating(&self) -> bool {
        matches!(
            self,
            SessionState::NegotiatingOffer | SessionState::NegotiatingAnswer
        )
    }

    /// Transition table; `None` means the input is ignored in this state
    pub fn next(self, input: SessionInput) -> Option<SessionState> {
        use SessionInput as I;
        use SessionState as S;

        if self.is_terminal() {
            return None;
        }

        match (self, input) {
            // A new round starts from idle or from an established session
            (S::New | S::PathDiscovery | S::Connected, I::LocalOfferCreated) => {
                Some(S::NegotiatingOffer)
            }
            (S::New | S::PathDiscovery | S::Connected, I::RemoteOfferApplied) => {
                Some(S::NegotiatingAnswer)
            }

            (S::NegotiatingOffer, I::LocalOfferRolledBack) => Some(S::PathDiscovery),

            (S::NegotiatingAnswer, I::LocalAnswerSent) => Some(S::PathDiscovery),
            (S::NegotiatingOffer, I::RemoteAnswerApplied) => Some(S::PathDiscovery),

            (S::PathDiscovery, I::TransportConnected | I::RenegotiationComplete) => {
                Some(S::Connected)
            }

            (_, I::TransportDisconnected) => Some(S::Disconnected),
            (_, I::TransportClosed) | (_, I::Closed) => Some(S::Closed),
            (_, I::TransportFailed) => Some(S::Failed),

            (S::New | S::NegotiatingOffer | S::NegotiatingAnswer | S::PathDiscovery, I::PathDiscoveryTimedOut) => {
                Some(S::Failed)
            }

            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::New => "new",
            SessionState::NegotiatingOffer => "negotiating_offer",
            SessionState::NegotiatingAnswer => "negotiating_answer",
            SessionState::PathDiscovery => "path_discovery",
            SessionState::Connected => "connected",
            SessionState::Disconnected => "disconnected",
            SessionState::Failed => "failed",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Application data channel substate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Unopened,
    Open,
    Closed,
}

/// Negotiated network route
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathClassification {
    /// Host candidate: both ends on a reachable local network
    Lan,
    /// Server-reflexive candidate
    Stun,
    /// Relayed through TURN over the given protocol
    Turn(String),
    Unknown,
}

impl PathClassification {
    pub fn classify(path: &SelectedPath) -> Self {
        match path.candidate_type {
            CandidateType::Host => PathClassification::Lan,
            CandidateType::ServerReflexive => PathClassification::Stun,
            CandidateType::Relay => {
                let protocol = path
                    .relay_protocol
                    .as_deref()
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .unwrap_or("udp")
                    .to_ascii_lowercase();
                PathClassification::Turn(protocol)
            }
            CandidateType::PeerReflexive | CandidateType::Unknown => PathClassification::Unknown,
        }
    }
}

impl fmt::Display for PathClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathClassification::Lan => f.write_str("lan"),
            PathClassification::Stun => f.write_str("stun"),
            PathClassification::Turn(protocol) => write!(f, "turn-{}", protocol),
            PathClassification::Unknown => f.write_str("unknown"),
        }
    }
}

impl Serialize for PathClassification {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
