//! Per-peer session actor
//!
//! Each remote peer gets one task that owns its [`PeerTransport`] and its
//! [`SessionState`]. Everything that can change the session (inbound
//! signaling, engine callbacks, local media changes, teardown) is posted to
//! the task's queue and handled strictly in arrival order, so no two
//! negotiation steps ever run concurrently for the same peer.

use super::state::{ChannelState, PathClassification, SessionInput, SessionRole, SessionState};
use crate::config::PeerlinkConfig;
use crate::media::{LocalMediaSource, MediaKind};
use crate::signaling::OutboundSignal;
use crate::transport::{
    DataChannel, PeerTransport, TransportEvent, TransportEventSink, TransportFactory,
    TransportState,
};
use crate::{Error, PeerId, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Work item for a session actor
#[derive(Debug)]
pub enum SessionCommand {
    /// Produce an offer (first round, or renegotiation once established)
    Start,
    RemoteOffer(String),
    RemoteAnswer(String),
    RemoteCandidate(String),
    /// Attach the tracks of a newly activated local source
    AttachMedia(LocalMediaSource),
    Transport(TransportEvent),
    Close,
}

/// Something a session reports to the orchestrator
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub peer: PeerId,
    pub session_id: Uuid,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone)]
pub enum SessionEventKind {
    /// Negotiation artifact to relay through signaling
    Outbound(OutboundSignal),
    StateChanged(SessionState),
    /// First connectivity, with the negotiated route
    Connected(PathClassification),
    ChannelOpen(Arc<dyn DataChannel>),
    ChannelClosed,
    /// Raw data-channel frame
    Envelope(String),
    RemoteTrack {
        stream_id: String,
        track_id: String,
        kind: MediaKind,
    },
    /// Step failed; the session is still alive
    Error(String),
    /// Session ended in the given terminal state; the actor has exited
    Terminated(SessionState),
}

/// Cheap, cloneable address of a session actor
#[derive(Debug, Clone)]
pub struct SessionHandle {
    peer: PeerId,
    role: SessionRole,
    session_id: Uuid,
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Queue a command; fails once the actor has exited
    pub fn post(&self, command: SessionCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| Error::SessionClosed(self.peer.clone()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Two handles address the same session
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        self.session_id == other.session_id
    }
}

/// What a new session needs from its surroundings
#[derive(Clone)]
pub struct SessionContext {
    pub factory: Arc<dyn TransportFactory>,
    pub config: Arc<PeerlinkConfig>,
    pub events: mpsc::UnboundedSender<SessionEvent>,
}

/// Start the actor for one remote peer
///
/// The transport is created inside the task, so this never blocks the
/// caller; `initial_media` is attached before any negotiation runs.
pub fn spawn_session(
    peer: PeerId,
    role: SessionRole,
    ctx: SessionContext,
    initial_media: Option<LocalMediaSource>,
) -> (SessionHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session_id = Uuid::new_v4();
    let handle = SessionHandle {
        peer: peer.clone(),
        role,
        session_id,
        tx: tx.clone(),
    };

    let span = info_span!("session", peer_id = %peer, %role);
    let actor = SessionActor {
        peer,
        role,
        session_id,
        state: SessionState::New,
        channel_state: ChannelState::Unopened,
        transport: None,
        channel: None,
        pending_candidates: Vec::new(),
        remote_description_set: false,
        attached_tracks: HashSet::new(),
        renegotiate_pending: false,
        transport_connected: false,
        ever_connected: false,
        self_tx: tx.downgrade(),
        ctx,
    };
    drop(tx);

    let task = tokio::spawn(actor.run(rx, initial_media).instrument(span));
    (handle, task)
}

struct SessionActor {
    peer: PeerId,
    role: SessionRole,
    session_id: Uuid,
    state: SessionState,
    channel_state: ChannelState,
    transport: Option<Arc<dyn PeerTransport>>,
    channel: Option<Arc<dyn DataChannel>>,
    /// Remote candidates that arrived before any remote description
    pending_candidates: Vec<String>,
    remote_description_set: bool,
    attached_tracks: HashSet<String>,
    /// Media changed mid-round; offer again once the round completes
    renegotiate_pending: bool,
    transport_connected: bool,
    ever_connected: bool,
    self_tx: mpsc::WeakUnboundedSender<SessionCommand>,
    ctx: SessionContext,
}

impl SessionActor {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<SessionCommand>,
        initial_media: Option<LocalMediaSource>,
    ) {
        if let Err(e) = self.init(initial_media).await {
            error!("Failed to create transport: {}", e);
            self.emit(SessionEventKind::Error(e.to_string()));
            self.apply(SessionInput::TransportFailed);
            self.teardown().await;
            return;
        }

        let deadline = self
            .ctx
            .config
            .path_discovery_timeout()
            .map(|timeout| Instant::now() + timeout);

        loop {
            let command = match deadline {
                Some(at) if !self.ever_connected => {
                    tokio::select! {
                        command = rx.recv() => command,
                        _ = tokio::time::sleep_until(at) => {
                            warn!(state = %self.state, "Path discovery timed out");
                            self.apply(SessionInput::PathDiscoveryTimedOut);
                            break;
                        }
                    }
                }
                _ => rx.recv().await,
            };

            let Some(command) = command else {
                debug!("All handles dropped");
                self.apply(SessionInput::Closed);
                break;
            };

            if let Err(e) = self.handle(command).await {
                warn!("Session step failed: {}", e);
                self.emit(SessionEventKind::Error(e.to_string()));
            }

            if self.state.is_terminal() {
                break;
            }
        }

        self.teardown().await;
    }

    async fn init(&mut self, initial_media: Option<LocalMediaSource>) -> Result<()> {
        let weak = self.self_tx.clone();
        let sink = TransportEventSink::new(move |event| {
            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(SessionCommand::Transport(event));
            }
        });
        let transport = self.ctx.factory.create(&self.peer, sink).await?;
        self.transport = Some(transport);

        if let Some(source) = initial_media {
            self.attach_tracks(&source).await;
        }
        debug!("Transport ready");
        Ok(())
    }

    async fn handle(&mut self, command: SessionCommand) -> Result<()> {
        match command {
            SessionCommand::Start => self.on_start().await,
            SessionCommand::RemoteOffer(payload) => self.on_remote_offer(&payload).await,
            SessionCommand::RemoteAnswer(payload) => self.on_remote_answer(&payload).await,
            SessionCommand::RemoteCandidate(payload) => self.on_remote_candidate(payload).await,
            SessionCommand::AttachMedia(source) => self.on_attach_media(source).await,
            SessionCommand::Transport(event) => self.on_transport_event(event).await,
            SessionCommand::Close => {
                info!("Closing session");
                self.apply(SessionInput::Closed);
                Ok(())
            }
        }
    }

    fn transport(&self) -> Result<Arc<dyn PeerTransport>> {
        self.transport
            .clone()
            .ok_or_else(|| Error::SessionClosed(self.peer.clone()))
    }

    async fn on_start(&mut self) -> Result<()> {
        match self.state {
            SessionState::New => {
                if self.role.is_initiator() && self.channel.is_none() {
                    let channel = self
                        .transport()?
                        .create_data_channel(
                            &self.ctx.config.data_channel_label,
                            self.ctx.config.data_channel_mode,
                        )
                        .await?;
                    debug!(label = %channel.label(), "Created data channel");
                    self.adopt_channel(channel);
                }
                self.send_offer().await
            }
            SessionState::PathDiscovery | SessionState::Connected => self.send_offer().await,
            _ => {
                debug!(state = %self.state, "Start deferred until the current round completes");
                self.renegotiate_pending = true;
                Ok(())
            }
        }
    }

    async fn send_offer(&mut self) -> Result<()> {
        let payload = self.transport()?.create_offer().await?;
        if !self.apply(SessionInput::LocalOfferCreated) {
            return Ok(());
        }
        self.renegotiate_pending = false;
        info!(renegotiation = self.ever_connected, "Sending offer");
        self.emit(SessionEventKind::Outbound(OutboundSignal::Offer {
            to: self.peer.clone(),
            payload,
        }));
        Ok(())
    }

    async fn on_remote_offer(&mut self, payload: &str) -> Result<()> {
        if self.state == SessionState::NegotiatingOffer {
            // Offer collision: the initiator's round goes first
            if self.role.is_initiator() {
                warn!("Ignoring colliding remote offer");
                return Ok(());
            }
            if let Err(e) = self.transport()?.rollback_local_offer().await {
                return Err(self.fail(e));
            }
            self.apply(SessionInput::LocalOfferRolledBack);
            self.renegotiate_pending = true;
            info!("Rolled back local offer for colliding remote offer");
        }

        if self.state.next(SessionInput::RemoteOfferApplied).is_none() {
            warn!(state = %self.state, "Ignoring remote offer");
            return Ok(());
        }

        let transport = self.transport()?;
        transport.apply_offer(payload).await?;
        self.remote_description_set = true;
        self.apply(SessionInput::RemoteOfferApplied);
        self.flush_candidates().await;

        let answer = match transport.create_answer().await {
            Ok(answer) => answer,
            Err(e) => return Err(self.fail(e)),
        };
        self.emit(SessionEventKind::Outbound(OutboundSignal::Answer {
            to: self.peer.clone(),
            payload: answer,
        }));
        self.apply(SessionInput::LocalAnswerSent);
        info!("Answer sent");

        self.finish_round().await
    }

    async fn on_remote_answer(&mut self, payload: &str) -> Result<()> {
        if self.state != SessionState::NegotiatingOffer {
            warn!(state = %self.state, "Ignoring unexpected answer");
            return Ok(());
        }

        self.transport()?.apply_answer(payload).await?;
        self.remote_description_set = true;
        self.apply(SessionInput::RemoteAnswerApplied);
        self.flush_candidates().await;
        info!("Answer applied");

        self.finish_round().await
    }

    /// Back to `Connected` if connectivity survived the round, then run any
    /// renegotiation that was requested meanwhile
    async fn finish_round(&mut self) -> Result<()> {
        if self.transport_connected {
            if self.ever_connected {
                self.apply(SessionInput::RenegotiationComplete);
            } else {
                self.on_connected().await;
            }
        }
        if self.renegotiate_pending {
            self.send_offer().await?;
        }
        Ok(())
    }

    async fn on_remote_candidate(&mut self, payload: String) -> Result<()> {
        if !self.remote_description_set {
            debug!(
                buffered = self.pending_candidates.len() + 1,
                "Buffering candidate until remote description is set"
            );
            self.pending_candidates.push(payload);
            return Ok(());
        }
        self.transport()?.add_ice_candidate(&payload).await
    }

    async fn flush_candidates(&mut self) {
        if self.pending_candidates.is_empty() {
            return;
        }
        let Ok(transport) = self.transport() else {
            return;
        };
        let pending = std::mem::take(&mut self.pending_candidates);
        debug!(count = pending.len(), "Applying buffered candidates");
        for candidate in pending {
            if let Err(e) = transport.add_ice_candidate(&candidate).await {
                warn!("Buffered candidate rejected: {}", e);
                self.emit(SessionEventKind::Error(e.to_string()));
            }
        }
    }

    async fn on_attach_media(&mut self, source: LocalMediaSource) -> Result<()> {
        let added = self.attach_tracks(&source).await;
        if added == 0 {
            return Ok(());
        }

        match self.state {
            SessionState::PathDiscovery | SessionState::Connected => self.send_offer().await,
            SessionState::NegotiatingOffer | SessionState::NegotiatingAnswer => {
                self.renegotiate_pending = true;
                Ok(())
            }
            // New: the tracks ride on the first offer or answer
            _ => Ok(()),
        }
    }

    async fn attach_tracks(&mut self, source: &LocalMediaSource) -> usize {
        let Ok(transport) = self.transport() else {
            return 0;
        };
        let mut added = 0;
        for track in &source.tracks {
            if self.attached_tracks.contains(&track.id) {
                continue;
            }
            match transport.add_local_track(track).await {
                Ok(()) => {
                    debug!(track_id = %track.id, kind = %track.kind, "Attached local track");
                    self.attached_tracks.insert(track.id.clone());
                    added += 1;
                }
                Err(e) => {
                    warn!(track_id = %track.id, "Failed to attach local track: {}", e);
                    self.emit(SessionEventKind::Error(e.to_string()));
                }
            }
        }
        added
    }

    async fn on_transport_event(&mut self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::LocalCandidate(payload) => {
                self.emit(SessionEventKind::Outbound(OutboundSignal::Ice {
                    to: self.peer.clone(),
                    payload,
                }));
            }
            TransportEvent::StateChanged(state) => self.on_transport_state(state).await,
            TransportEvent::DataChannel(channel) => {
                debug!(label = %channel.label(), "Remote data channel announced");
                let open = channel.is_open();
                self.adopt_channel(channel);
                if open {
                    self.on_channel_open();
                }
            }
            TransportEvent::ChannelOpen => self.on_channel_open(),
            TransportEvent::ChannelClosed => {
                if self.channel_state != ChannelState::Closed {
                    self.channel_state = ChannelState::Closed;
                    debug!("Data channel closed");
                    self.emit(SessionEventKind::ChannelClosed);
                }
            }
            TransportEvent::ChannelMessage(raw) => {
                if self.channel_state == ChannelState::Open {
                    self.emit(SessionEventKind::Envelope(raw));
                } else {
                    debug!(channel = ?self.channel_state, "Dropping frame on non-open channel");
                }
            }
            TransportEvent::RemoteTrack {
                track_id,
                stream_id,
                kind,
            } => {
                info!(%track_id, %stream_id, %kind, "Remote track");
                self.emit(SessionEventKind::RemoteTrack {
                    stream_id,
                    track_id,
                    kind,
                });
            }
        }
        Ok(())
    }

    async fn on_transport_state(&mut self, state: TransportState) {
        debug!(transport = %state, session = %self.state, "Transport state changed");
        match state {
            TransportState::Connected => {
                self.transport_connected = true;
                if self.state == SessionState::PathDiscovery {
                    if self.ever_connected {
                        self.apply(SessionInput::RenegotiationComplete);
                    } else {
                        self.on_connected().await;
                    }
                }
            }
            TransportState::Disconnected => {
                self.transport_connected = false;
                self.apply(SessionInput::TransportDisconnected);
            }
            TransportState::Failed => {
                self.transport_connected = false;
                self.apply(SessionInput::TransportFailed);
            }
            TransportState::Closed => {
                self.transport_connected = false;
                self.apply(SessionInput::TransportClosed);
            }
            TransportState::New | TransportState::Connecting => {}
        }
    }

    async fn on_connected(&mut self) {
        if !self.apply(SessionInput::TransportConnected) {
            return;
        }
        self.ever_connected = true;

        let path = match self.transport.as_ref() {
            Some(transport) => transport.selected_path().await,
            None => None,
        };
        let classification = path
            .as_ref()
            .map(PathClassification::classify)
            .unwrap_or(PathClassification::Unknown);
        info!(path = %classification, "Connected");
        self.emit(SessionEventKind::Connected(classification));
    }

    fn adopt_channel(&mut self, channel: Arc<dyn DataChannel>) {
        self.channel = Some(channel);
        self.channel_state = ChannelState::Unopened;
    }

    fn on_channel_open(&mut self) {
        if self.channel_state == ChannelState::Open {
            return;
        }
        let Some(channel) = self.channel.clone() else {
            debug!("Open reported before the channel was announced");
            return;
        };
        self.channel_state = ChannelState::Open;
        info!(label = %channel.label(), "Data channel open");
        self.emit(SessionEventKind::ChannelOpen(channel));
    }

    /// A negotiation step left the engine in an unknown state; the session
    /// cannot continue
    fn fail(&mut self, e: Error) -> Error {
        error!(state = %self.state, "Negotiation broke the session: {}", e);
        self.apply(SessionInput::TransportFailed);
        e
    }

    /// Feed the transition table; returns whether the state moved
    fn apply(&mut self, input: SessionInput) -> bool {
        match self.state.next(input) {
            Some(next) => {
                debug!(from = %self.state, to = %next, ?input, "Session transition");
                self.state = next;
                self.emit(SessionEventKind::StateChanged(next));
                true
            }
            None => {
                debug!(state = %self.state, ?input, "Input ignored");
                false
            }
        }
    }

    fn emit(&self, kind: SessionEventKind) {
        let _ = self.ctx.events.send(SessionEvent {
            peer: self.peer.clone(),
            session_id: self.session_id,
            kind,
        });
    }

    async fn teardown(&mut self) {
        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                debug!("Channel close: {}", e);
            }
        }
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                debug!("Transport close: {}", e);
            }
        }
        info!(state = %self.state, "Session terminated");
        self.emit(SessionEventKind::Terminated(self.state));
    }
}
