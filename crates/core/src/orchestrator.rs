//! Peer orchestrator
//!
//! Process-scoped context that wires the signaling client, session registry,
//! router, local media controller and message bus together. Constructed
//! explicitly, started with [`PeerOrchestrator::start`] and torn down with
//! [`PeerOrchestrator::shutdown`]; nothing here is global.
//!
//! Three background tasks run while started:
//! - the dispatch task drains inbound signaling into the router in arrival order
//! - the session task applies [`SessionEvent`]s to the registry and app state
//! - the signaling task follows link events (identity changes, delivery failures)

use crate::bus::{MessageBus, Received, SendReport};
use crate::config::PeerlinkConfig;
use crate::envelope::Envelope;
use crate::history::{ChatHistory, Message};
use crate::media::{LocalMediaController, MediaDevices};
use crate::registry::{SessionRegistry, TransportStatus};
use crate::router::SignalRouter;
use crate::session::{
    PathClassification, SessionCommand, SessionContext, SessionEvent, SessionEventKind,
    SessionRole, SessionState,
};
use crate::signaling::{InboundSignal, SignalHandler, SignalingClient, SignalingEvent};
use crate::snapshot::{AppRole, ConnectionInfo, ConnectionStatus, PeerSnapshot};
use crate::transport::TransportFactory;
use crate::{Error, PeerId, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Sender label used for local messages before an identity is known
pub const FALLBACK_SENDER_ID: &str = "ME";

const UPDATE_CAPACITY: usize = 256;

/// Change notification for UI layers
#[derive(Debug, Clone)]
pub enum PeerUpdate {
    IdentityAssigned(PeerId),
    StatusChanged(ConnectionStatus),
    PeerConnected {
        peer: PeerId,
        path: PathClassification,
    },
    PeerFailed(PeerId),
    PeerRemoved(PeerId),
    ChannelOpen(PeerId),
    Message(Message),
    CameraStatus {
        peer: PeerId,
        enabled: bool,
    },
    RemoteStream {
        peer: PeerId,
        stream_id: String,
    },
    Error(String),
}

#[derive(Debug, Default)]
struct AppState {
    my_identity: Option<PeerId>,
    role: Option<AppRole>,
    connection_status: ConnectionStatus,
    error: Option<String>,
    peer_video_status: HashMap<PeerId, bool>,
}

struct Inner {
    signaling: Arc<dyn SignalingClient>,
    registry: Arc<SessionRegistry>,
    router: SignalRouter,
    media: Arc<LocalMediaController>,
    bus: MessageBus,
    state: RwLock<AppState>,
    updates: broadcast::Sender<PeerUpdate>,
    shutting_down: AtomicBool,
}

pub struct PeerOrchestrator {
    inner: Arc<Inner>,
    config: Arc<PeerlinkConfig>,
    session_events: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PeerOrchestrator {
    /// Build an orchestrator; nothing runs until [`start`](Self::start)
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration does not validate.
    pub fn new(
        config: PeerlinkConfig,
        signaling: Arc<dyn SignalingClient>,
        factory: Arc<dyn TransportFactory>,
        devices: Arc<dyn MediaDevices>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let media = Arc::new(LocalMediaController::new(devices, config.media.clone()));
        let ctx = SessionContext {
            factory,
            config: config.clone(),
            events: events_tx,
        };
        let registry = Arc::new(SessionRegistry::new(ctx, media.clone()));
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);

        let inner = Arc::new(Inner {
            signaling,
            router: SignalRouter::new(registry.clone()),
            registry,
            media,
            bus: MessageBus::new(Arc::new(ChatHistory::new())),
            state: RwLock::new(AppState::default()),
            updates,
            shutting_down: AtomicBool::new(false),
        });

        Ok(Self {
            inner,
            config,
            session_events: Mutex::new(Some(events_rx)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &PeerlinkConfig {
        &self.config
    }

    /// Connect signaling and start processing
    ///
    /// Returns the local identity. A failure is also recorded in the
    /// snapshot's `error`, and the orchestrator stays usable for a retry.
    pub async fn start(&self) -> Result<PeerId> {
        if let Some(events) = self.session_events.lock().take() {
            let mut tasks = self.tasks.lock();

            let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel::<InboundSignal>();
            let handler: SignalHandler = Arc::new(move |signal| {
                let _ = dispatch_tx.send(signal);
            });
            self.inner.signaling.set_handler(handler);
            tasks.push(tokio::spawn(dispatch_loop(self.inner.clone(), dispatch_rx)));

            tasks.push(tokio::spawn(session_event_loop(self.inner.clone(), events)));

            let link_events = self.inner.signaling.subscribe();
            tasks.push(tokio::spawn(signaling_event_loop(
                self.inner.clone(),
                link_events,
            )));
        }

        match self.inner.signaling.connect().await {
            Ok(identity) => {
                info!(identity = %identity, "Signaling connected");
                {
                    let mut state = self.inner.state.write();
                    state.my_identity = Some(identity.clone());
                    if state.connection_status == ConnectionStatus::Error {
                        state.connection_status = ConnectionStatus::Idle;
                        state.error = None;
                    }
                }
                self.inner
                    .publish(PeerUpdate::IdentityAssigned(identity.clone()));
                Ok(identity)
            }
            Err(e) => {
                error!("Signaling connect failed: {}", e);
                self.inner.report_error(&e);
                self.inner.set_status(ConnectionStatus::Error);
                Err(e)
            }
        }
    }

    pub fn identity(&self) -> Option<PeerId> {
        self.inner.state.read().my_identity.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerUpdate> {
        self.inner.updates.subscribe()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    pub fn select_role(&self, role: AppRole) {
        info!(?role, "Role selected");
        self.inner.state.write().role = Some(role);
    }

    /// Open a session to `host_id` as the initiator
    ///
    /// Blank ids are ignored. Refused with [`Error::NotReady`] until
    /// signaling is connected and the local identity is known.
    pub async fn connect_to_host(&self, host_id: &str) -> Result<()> {
        let host_id = host_id.trim();
        if host_id.is_empty() {
            return Ok(());
        }

        let inner = &self.inner;
        if !inner.signaling.is_connected() || self.identity().is_none() {
            let err = Error::NotReady("signaling is not connected".to_string());
            warn!("connect_to_host refused: {}", err);
            inner.report_error(&err);
            return Err(err);
        }

        inner.set_status(ConnectionStatus::Connecting);
        let result: Result<()> = async {
            let (handle, _) = inner
                .registry
                .get_or_create(&host_id.to_string(), SessionRole::Initiator)
                .await?;
            handle.post(SessionCommand::Start)
        }
        .await;

        if let Err(e) = &result {
            error!(peer_id = %host_id, "Failed to start session: {}", e);
            inner.report_error(e);
        }
        result
    }

    /// Send chat text to every open data channel
    pub async fn send_message(&self, text: &str) -> Result<SendReport> {
        let sender = self
            .identity()
            .unwrap_or_else(|| FALLBACK_SENDER_ID.to_string());
        let channels = self.inner.registry.open_channels().await;
        let report = self.inner.bus.send(text, &sender, &channels).await?;
        if let Some(message) = &report.message {
            debug!(
                delivered = report.delivered.len(),
                failed = report.failed.len(),
                "Message sent"
            );
            self.inner.publish(PeerUpdate::Message(message.clone()));
        }
        Ok(report)
    }

    /// Flip local video; tells every open channel about the new camera state
    ///
    /// Returns `false` without any network action when no local media exists.
    pub async fn toggle_video(&self) -> bool {
        if !self.inner.media.is_active() {
            return false;
        }
        let enabled = self.inner.media.toggle_video();
        let channels = self.inner.registry.open_channels().await;
        match self
            .inner
            .bus
            .broadcast(&Envelope::camera_status(enabled), &channels)
            .await
        {
            Ok(n) => debug!(enabled, notified = n, "Camera status broadcast"),
            Err(e) => warn!("Camera status broadcast failed: {}", e),
        }
        enabled
    }

    /// Flip local audio; returns the new flag (`false` with no local media)
    pub fn toggle_audio(&self) -> bool {
        self.inner.media.toggle_audio()
    }

    /// Open local capture and renegotiate every session to carry it
    pub async fn activate_media(&self) -> Result<()> {
        let source = match self.inner.media.activate().await {
            Ok(source) => source,
            Err(e) => {
                self.inner.report_error(&e);
                return Err(e);
            }
        };

        for handle in self.inner.registry.handles().await {
            if let Err(e) = handle.post(SessionCommand::AttachMedia(source.clone())) {
                debug!(peer_id = %handle.peer(), "Skipping media attach: {}", e);
            }
        }
        Ok(())
    }

    /// Tear down the session with `peer`; `false` if there was none
    pub async fn disconnect_peer(&self, peer: &str) -> bool {
        let peer = peer.to_string();
        match self.inner.registry.remove(&peer).await {
            Some(_) => {
                self.inner.forget_peer(&peer);
                true
            }
            None => false,
        }
    }

    pub fn history(&self) -> Vec<Message> {
        self.inner.bus.history().snapshot()
    }

    /// Immutable view for presentation
    pub async fn snapshot(&self) -> PeerSnapshot {
        let peers = self.inner.registry.snapshot().await;
        let remote_streams = self.inner.registry.remote_streams().await;
        let state = self.inner.state.read();
        PeerSnapshot {
            my_identity: state.my_identity.clone(),
            role: state.role,
            connections: peers.iter().filter_map(ConnectionInfo::from_record).collect(),
            peers,
            connection_status: state.connection_status,
            error: state.error.clone(),
            messages: self.inner.bus.history().snapshot(),
            peer_video_status: state.peer_video_status.clone(),
            local_media: self.inner.media.state(),
            remote_streams,
        }
    }

    /// Close signaling, drop every session and release local media
    ///
    /// Partially negotiated sessions are abandoned without notifying the remote.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down orchestrator");

        if let Err(e) = self.inner.signaling.close().await {
            warn!("Error closing signaling: {}", e);
        }
        let closed = self.inner.registry.clear().await;
        debug!(sessions = closed, "Sessions closed");

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.inner.media.deactivate();

        let mut state = self.inner.state.write();
        state.connection_status = ConnectionStatus::Idle;
        state.peer_video_status.clear();
    }
}

impl Inner {
    fn publish(&self, update: PeerUpdate) {
        let _ = self.updates.send(update);
    }

    fn report_error(&self, err: &Error) {
        let message = err.to_string();
        self.state.write().error = Some(message.clone());
        self.publish(PeerUpdate::Error(message));
    }

    fn set_status(&self, status: ConnectionStatus) {
        let changed = {
            let mut state = self.state.write();
            let changed = state.connection_status != status;
            state.connection_status = status;
            changed
        };
        if changed {
            self.publish(PeerUpdate::StatusChanged(status));
        }
    }

    fn forget_peer(&self, peer: &PeerId) {
        self.state.write().peer_video_status.remove(peer);
        self.publish(PeerUpdate::PeerRemoved(peer.clone()));
    }

    /// Drop back to idle once the last connected peer is gone
    async fn settle_status(&self) {
        let any_connected = self
            .registry
            .snapshot()
            .await
            .iter()
            .any(|r| r.status == TransportStatus::Connected);
        let current = self.state.read().connection_status;
        if current == ConnectionStatus::Connected && !any_connected {
            self.set_status(ConnectionStatus::Idle);
        }
    }

    async fn apply_session_event(&self, event: SessionEvent) {
        let SessionEvent {
            peer,
            session_id,
            kind,
        } = event;

        match kind {
            SessionEventKind::Outbound(signal) => self.signaling.send(signal),
            SessionEventKind::StateChanged(state) => {
                self.registry.set_state(&peer, session_id, state).await;
            }
            SessionEventKind::Connected(path) => {
                self.registry
                    .mark_connected(&peer, session_id, path.clone())
                    .await;
                {
                    let mut state = self.state.write();
                    state.connection_status = ConnectionStatus::Connected;
                    state.error = None;
                }
                self.publish(PeerUpdate::StatusChanged(ConnectionStatus::Connected));
                self.publish(PeerUpdate::PeerConnected { peer, path });
            }
            SessionEventKind::ChannelOpen(channel) => {
                self.registry.set_channel(&peer, session_id, channel).await;
                self.publish(PeerUpdate::ChannelOpen(peer));
            }
            SessionEventKind::ChannelClosed => {
                self.registry.clear_channel(&peer, session_id).await;
            }
            SessionEventKind::Envelope(raw) => match self.bus.receive(&peer, &raw) {
                Ok(Received::Message(message)) => self.publish(PeerUpdate::Message(message)),
                Ok(Received::CameraStatus { peer, enabled }) => {
                    self.registry.set_camera_off(&peer, !enabled).await;
                    self.state
                        .write()
                        .peer_video_status
                        .insert(peer.clone(), enabled);
                    self.publish(PeerUpdate::CameraStatus { peer, enabled });
                }
                Ok(Received::Ignored) => {}
                Err(e) => warn!(peer_id = %peer, "Dropping frame: {}", e),
            },
            SessionEventKind::RemoteTrack {
                stream_id,
                track_id,
                kind,
            } => {
                debug!(peer_id = %peer, %track_id, %kind, "Mapping remote stream");
                self.registry
                    .set_remote_stream(&peer, session_id, stream_id.clone())
                    .await;
                self.publish(PeerUpdate::RemoteStream { peer, stream_id });
            }
            SessionEventKind::Error(reason) => {
                warn!(peer_id = %peer, "Session error: {}", reason);
                self.state.write().error = Some(reason.clone());
                self.publish(PeerUpdate::Error(reason));
            }
            SessionEventKind::Terminated(SessionState::Failed) => {
                if self.registry.mark_failed(&peer, session_id).await {
                    let err = Error::TransportFailed(peer.clone());
                    error!(peer_id = %peer, "{}", err);
                    self.report_error(&err);
                    self.state.write().peer_video_status.remove(&peer);
                    self.set_status(ConnectionStatus::Error);
                    self.publish(PeerUpdate::PeerFailed(peer));
                }
            }
            SessionEventKind::Terminated(state) => {
                if self.registry.release(&peer, session_id).await.is_some() {
                    info!(peer_id = %peer, %state, "Peer gone");
                    self.forget_peer(&peer);
                    self.settle_status().await;
                }
            }
        }
    }

    async fn apply_signaling_event(&self, event: SignalingEvent) {
        match event {
            SignalingEvent::Connected { identity } => {
                debug!(identity = %identity, "Signaling link up");
            }
            SignalingEvent::Reconnecting { attempt } => {
                warn!(attempt, "Signaling reconnecting");
            }
            SignalingEvent::IdentityChanged { previous, current } => {
                info!(previous = ?previous, current = %current, "Local identity changed");
                self.state.write().my_identity = Some(current.clone());
                // Remotes address in-flight negotiation to the old identity
                for peer in self.registry.abandon_unconnected().await {
                    debug!(peer_id = %peer, "Abandoned pending session");
                    self.forget_peer(&peer);
                }
                if self.state.read().connection_status == ConnectionStatus::Connecting {
                    self.set_status(ConnectionStatus::Idle);
                }
                self.publish(PeerUpdate::IdentityAssigned(current));
            }
            SignalingEvent::DeliveryFailed {
                target,
                method,
                reason,
            } => {
                let message = format!("Failed to deliver {} to {}: {}", method, target, reason);
                warn!("{}", message);
                self.state.write().error = Some(message.clone());
                self.publish(PeerUpdate::Error(message));
            }
            SignalingEvent::Closed { reason } => {
                if self.shutting_down.load(Ordering::SeqCst) {
                    return;
                }
                let err = Error::SignalingUnavailable(reason);
                error!("{}", err);
                self.report_error(&err);
                self.set_status(ConnectionStatus::Error);
            }
        }
    }
}

async fn dispatch_loop(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<InboundSignal>) {
    while let Some(signal) = rx.recv().await {
        let method = signal.method().to_string();
        if let Err(e) = inner.router.dispatch(signal).await {
            warn!(%method, "Dispatch failed: {}", e);
            inner.report_error(&e);
        }
    }
}

async fn session_event_loop(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = rx.recv().await {
        inner.apply_session_event(event).await;
    }
}

async fn signaling_event_loop(inner: Arc<Inner>, mut rx: broadcast::Receiver<SignalingEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => inner.apply_signaling_event(event).await,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Signaling events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::NoMediaDevices;
    use crate::signaling::MemoryRelay;
    use crate::test_support::NullTransportFactory;

    fn orchestrator(relay: &MemoryRelay) -> PeerOrchestrator {
        PeerOrchestrator::new(
            PeerlinkConfig::default(),
            Arc::new(relay.client()),
            Arc::new(NullTransportFactory::default()),
            Arc::new(NoMediaDevices),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let relay = MemoryRelay::new();
        let result = PeerOrchestrator::new(
            PeerlinkConfig::default().with_max_peers(0),
            Arc::new(relay.client()),
            Arc::new(NullTransportFactory::default()),
            Arc::new(NoMediaDevices),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_start_assigns_identity() {
        let relay = MemoryRelay::new();
        let peer = orchestrator(&relay);
        assert_eq!(peer.start().await.unwrap(), "conn-1");
        assert_eq!(peer.identity().as_deref(), Some("conn-1"));
        assert_eq!(peer.snapshot().await.connection_status, ConnectionStatus::Idle);
    }

    #[tokio::test]
    async fn test_start_failure_is_reported() {
        let relay = MemoryRelay::new();
        relay.set_available(false);
        let peer = orchestrator(&relay);

        let err = peer.start().await.unwrap_err();
        assert!(matches!(err, Error::SignalingUnavailable(_)));
        let snapshot = peer.snapshot().await;
        assert_eq!(snapshot.connection_status, ConnectionStatus::Error);
        assert_eq!(snapshot.error.as_deref(), Some("SignalR Error: relay unreachable"));
        assert!(snapshot.my_identity.is_none());
    }

    #[tokio::test]
    async fn test_connect_to_host_guards() {
        let relay = MemoryRelay::new();
        let peer = orchestrator(&relay);

        // blank id: silently ignored
        peer.connect_to_host("  ").await.unwrap();
        assert!(peer.snapshot().await.error.is_none());

        // not started: refused and reported
        let err = peer.connect_to_host("conn-9").await.unwrap_err();
        assert!(matches!(err, Error::NotReady(_)));
        assert!(peer.snapshot().await.error.is_some());
        assert!(peer.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_send_message_without_identity_uses_fallback() {
        let relay = MemoryRelay::new();
        let peer = orchestrator(&relay);

        let report = peer.send_message("hello").await.unwrap();
        assert!(report.delivered.is_empty());
        let history = peer.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sender_id, FALLBACK_SENDER_ID);

        peer.send_message("").await.unwrap();
        assert_eq!(peer.history().len(), 1);
    }

    #[tokio::test]
    async fn test_toggle_without_media() {
        let relay = MemoryRelay::new();
        let peer = orchestrator(&relay);
        assert!(!peer.toggle_video().await);
        assert!(!peer.toggle_audio());
    }

    #[tokio::test]
    async fn test_activate_media_failure_is_not_fatal() {
        let relay = MemoryRelay::new();
        let peer = orchestrator(&relay);
        let err = peer.activate_media().await.unwrap_err();
        assert!(matches!(err, Error::MediaUnavailable(_)));
        let snapshot = peer.snapshot().await;
        assert!(snapshot.error.unwrap().starts_with("Media unavailable"));
        assert!(!snapshot.local_media.active);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let relay = MemoryRelay::new();
        let peer = orchestrator(&relay);
        peer.start().await.unwrap();
        peer.shutdown().await;
        peer.shutdown().await;
        assert!(relay.identities().is_empty());
    }
}
