//! Session registry
//!
//! Single source of truth for which remote peers exist. Creation is
//! check-then-act under one registry-wide write lock, so concurrent inbound
//! handlers for a brand-new identity always converge on one session.
//!
//! Mutations that originate from a session carry its `session_id`; events
//! from a session that has since been replaced are ignored.

use crate::media::LocalMediaController;
use crate::session::{
    spawn_session, PathClassification, SessionCommand, SessionContext, SessionHandle,
    SessionRole, SessionState,
};
use crate::transport::DataChannel;
use crate::{Error, PeerId, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Transport status of a remote peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportStatus {
    Connecting,
    Connected,
    Failed,
}

/// Presentation record for one remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemotePeerRecord {
    pub id: PeerId,
    pub role: SessionRole,
    pub status: TransportStatus,
    pub state: SessionState,
    /// Set once the session first connects; kept across renegotiation
    pub path: Option<PathClassification>,
    pub camera_off: bool,
}

impl RemotePeerRecord {
    fn new(id: PeerId, role: SessionRole) -> Self {
        Self {
            id,
            role,
            status: TransportStatus::Connecting,
            state: SessionState::New,
            path: None,
            camera_off: false,
        }
    }
}

struct Entry {
    handle: SessionHandle,
    record: RemotePeerRecord,
    channel: Option<Arc<dyn DataChannel>>,
    remote_stream: Option<String>,
}

impl Entry {
    /// A failed or exited session can be replaced by fresh contact
    fn is_stale(&self) -> bool {
        self.record.status == TransportStatus::Failed || self.handle.is_closed()
    }
}

/// Keyed store of per-remote-peer sessions
pub struct SessionRegistry {
    entries: RwLock<HashMap<PeerId, Entry>>,
    ctx: SessionContext,
    media: Arc<LocalMediaController>,
}

impl SessionRegistry {
    pub fn new(ctx: SessionContext, media: Arc<LocalMediaController>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ctx,
            media,
        }
    }

    /// Return the session for `remote`, creating it with `role` if absent
    ///
    /// The role of an existing session is never changed. The boolean is
    /// `true` when this call created the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PeerLimitReached`] when `max_peers` live sessions exist.
    pub async fn get_or_create(
        &self,
        remote: &PeerId,
        role: SessionRole,
    ) -> Result<(SessionHandle, bool)> {
        let mut entries = self.entries.write().await;

        if let Some(entry) = entries.get(remote) {
            if !entry.is_stale() {
                if entry.handle.role() != role {
                    debug!(
                        peer_id = %remote,
                        kept = %entry.handle.role(),
                        requested = %role,
                        "Role already fixed for this session"
                    );
                }
                return Ok((entry.handle.clone(), false));
            }
            debug!(peer_id = %remote, "Replacing stale session");
            let _ = entry.handle.post(SessionCommand::Close);
        }

        let live = entries
            .iter()
            .filter(|(id, e)| *id != remote && !e.is_stale())
            .count();
        let max_peers = self.ctx.config.max_peers;
        if live >= max_peers as usize {
            return Err(Error::PeerLimitReached(max_peers));
        }

        let (handle, _task) =
            spawn_session(remote.clone(), role, self.ctx.clone(), self.media.source());
        info!(peer_id = %remote, %role, "Session created");
        entries.insert(
            remote.clone(),
            Entry {
                handle: handle.clone(),
                record: RemotePeerRecord::new(remote.clone(), role),
                channel: None,
                remote_stream: None,
            },
        );
        Ok((handle, true))
    }

    /// Tear down and forget a session; `None` if nothing was there
    pub async fn remove(&self, remote: &PeerId) -> Option<RemotePeerRecord> {
        let entry = self.entries.write().await.remove(remote)?;
        let _ = entry.handle.post(SessionCommand::Close);
        info!(peer_id = %remote, "Session removed");
        Some(entry.record)
    }

    /// Forget a session that terminated on its own
    ///
    /// Only the session identified by `session_id` is released, and only
    /// once; repeated terminal signals return `None`.
    pub async fn release(&self, remote: &PeerId, session_id: Uuid) -> Option<RemotePeerRecord> {
        let mut entries = self.entries.write().await;
        match entries.get(remote) {
            Some(entry) if entry.handle.session_id() == session_id => {}
            _ => return None,
        }
        let entry = entries.remove(remote)?;
        debug!(peer_id = %remote, "Session released");
        Some(entry.record)
    }

    pub async fn get(&self, remote: &PeerId) -> Option<SessionHandle> {
        self.entries
            .read()
            .await
            .get(remote)
            .map(|e| e.handle.clone())
    }

    pub async fn record(&self, remote: &PeerId) -> Option<RemotePeerRecord> {
        self.entries
            .read()
            .await
            .get(remote)
            .map(|e| e.record.clone())
    }

    /// Point-in-time copy of every record, ordered by identity
    pub async fn snapshot(&self) -> Vec<RemotePeerRecord> {
        let mut records: Vec<RemotePeerRecord> = self
            .entries
            .read()
            .await
            .values()
            .map(|e| e.record.clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub async fn handles(&self) -> Vec<SessionHandle> {
        self.entries
            .read()
            .await
            .values()
            .map(|e| e.handle.clone())
            .collect()
    }

    /// Data channels that are currently open
    pub async fn open_channels(&self) -> Vec<(PeerId, Arc<dyn DataChannel>)> {
        let mut channels: Vec<(PeerId, Arc<dyn DataChannel>)> = self
            .entries
            .read()
            .await
            .iter()
            .filter_map(|(id, e)| {
                e.channel
                    .as_ref()
                    .filter(|c| c.is_open())
                    .map(|c| (id.clone(), c.clone()))
            })
            .collect();
        channels.sort_by(|a, b| a.0.cmp(&b.0));
        channels
    }

    /// Remote stream id per peer
    pub async fn remote_streams(&self) -> HashMap<PeerId, String> {
        self.entries
            .read()
            .await
            .iter()
            .filter_map(|(id, e)| e.remote_stream.clone().map(|s| (id.clone(), s)))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Apply a change to the entry of a specific session
    async fn with_session<T>(
        &self,
        remote: &PeerId,
        session_id: Uuid,
        f: impl FnOnce(&mut Entry) -> T,
    ) -> Option<T> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(remote)?;
        if entry.handle.session_id() != session_id {
            debug!(peer_id = %remote, "Ignoring event from replaced session");
            return None;
        }
        Some(f(entry))
    }

    pub async fn set_state(&self, remote: &PeerId, session_id: Uuid, state: SessionState) {
        self.with_session(remote, session_id, |e| {
            e.record.state = state;
            // terminal statuses are settled by `mark_failed` and `release`;
            // renegotiation keeps the last transport status
            if state == SessionState::Connected {
                e.record.status = TransportStatus::Connected;
            }
        })
        .await;
    }

    pub async fn mark_connected(
        &self,
        remote: &PeerId,
        session_id: Uuid,
        path: PathClassification,
    ) {
        self.with_session(remote, session_id, |e| {
            e.record.status = TransportStatus::Connected;
            e.record.path = Some(path);
        })
        .await;
    }

    /// Record a failure; drops the channel and media references
    pub async fn mark_failed(&self, remote: &PeerId, session_id: Uuid) -> bool {
        self.with_session(remote, session_id, |e| {
            let first = e.record.status != TransportStatus::Failed;
            e.record.status = TransportStatus::Failed;
            e.record.state = SessionState::Failed;
            e.channel = None;
            e.remote_stream = None;
            first
        })
        .await
        .unwrap_or(false)
    }

    pub async fn set_channel(
        &self,
        remote: &PeerId,
        session_id: Uuid,
        channel: Arc<dyn DataChannel>,
    ) {
        self.with_session(remote, session_id, |e| e.channel = Some(channel))
            .await;
    }

    pub async fn clear_channel(&self, remote: &PeerId, session_id: Uuid) {
        self.with_session(remote, session_id, |e| e.channel = None)
            .await;
    }

    /// Map the peer's inbound stream, returning the replaced one
    pub async fn set_remote_stream(
        &self,
        remote: &PeerId,
        session_id: Uuid,
        stream_id: String,
    ) -> Option<String> {
        self.with_session(remote, session_id, |e| e.remote_stream.replace(stream_id))
            .await
            .flatten()
    }

    /// Remember whether the peer has switched its camera off
    pub async fn set_camera_off(&self, remote: &PeerId, camera_off: bool) -> bool {
        match self.entries.write().await.get_mut(remote) {
            Some(e) => {
                e.record.camera_off = camera_off;
                true
            }
            None => false,
        }
    }

    /// Drop every session that never reached `Connected`
    pub async fn abandon_unconnected(&self) -> Vec<PeerId> {
        let mut entries = self.entries.write().await;
        let doomed: Vec<PeerId> = entries
            .iter()
            .filter(|(_, e)| e.record.status != TransportStatus::Connected)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &doomed {
            if let Some(entry) = entries.remove(id) {
                let _ = entry.handle.post(SessionCommand::Close);
            }
        }
        doomed
    }

    /// Close and forget every session
    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        for (peer_id, entry) in entries.drain() {
            debug!(peer_id = %peer_id, "Closing session");
            let _ = entry.handle.post(SessionCommand::Close);
        }
        count
    }
}
