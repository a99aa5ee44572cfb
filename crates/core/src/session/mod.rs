//! Transport sessions: one state machine and one actor per remote peer

pub mod actor;
pub mod state;

pub use actor::{
    spawn_session, SessionCommand, SessionContext, SessionEvent, SessionEventKind, SessionHandle,
};
pub use state::{ChannelState, PathClassification, SessionInput, SessionRole, SessionState};
