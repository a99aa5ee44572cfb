//! Scripted in-process transport engine
//!
//! Transports created through one [`FakeNet`] find each other through the
//! tokens embedded in their session descriptions. Once an offer/answer round
//! completes on both ends the pair "connects": both report `Connected`, the
//! initiator's data channel opens and the responder is handed its end.
//! Frames written to one end arrive at the other as `ChannelMessage` events.

use async_trait::async_trait;
use parking_lot::Mutex;
use peerlink_core::config::DataChannelMode;
use peerlink_core::media::{LocalTrack, MediaKind};
use peerlink_core::transport::{
    DataChannel, PeerTransport, SelectedPath, TransportEvent, TransportEventSink,
    TransportFactory, TransportState,
};
use peerlink_core::{Error, PeerId, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// What a completed negotiation leads to
#[derive(Debug, Clone)]
pub enum Outcome {
    Connect(SelectedPath),
    Fail,
}

/// Shared fake network
#[derive(Clone)]
pub struct FakeNet {
    inner: Arc<NetInner>,
}

struct NetInner {
    next_token: AtomicUsize,
    outcome: Mutex<Outcome>,
    fail_answers: AtomicBool,
    by_token: Mutex<HashMap<String, Weak<FakeTransport>>>,
    /// (owner name, remote id) -> transport
    by_owner: Mutex<Vec<(String, PeerId, Arc<FakeTransport>)>>,
}

impl FakeNet {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            inner: Arc::new(NetInner {
                next_token: AtomicUsize::new(0),
                outcome: Mutex::new(outcome),
                fail_answers: AtomicBool::new(false),
                by_token: Mutex::new(HashMap::new()),
                by_owner: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn lan() -> Self {
        Self::new(Outcome::Connect(SelectedPath::new(
            peerlink_core::transport::CandidateType::Host,
        )))
    }

    pub fn set_outcome(&self, outcome: Outcome) {
        *self.inner.outcome.lock() = outcome;
    }

    /// Make every `create_answer` on this network fail
    pub fn fail_answers(&self, fail: bool) {
        self.inner.fail_answers.store(fail, Ordering::SeqCst);
    }

    /// Factory for the peer called `owner` (a test-side label)
    pub fn factory(&self, owner: &str) -> Arc<FakeTransportFactory> {
        Arc::new(FakeTransportFactory {
            net: self.clone(),
            owner: owner.to_string(),
            created: AtomicUsize::new(0),
        })
    }

    /// Most recent transport `owner` created towards `remote`
    pub fn transport(&self, owner: &str, remote: &str) -> Option<Arc<FakeTransport>> {
        self.inner
            .by_owner
            .lock()
            .iter()
            .rev()
            .find(|(o, r, _)| o == owner && r == remote)
            .map(|(_, _, t)| t.clone())
    }

    fn lookup(&self, token: &str) -> Option<Arc<FakeTransport>> {
        self.inner.by_token.lock().get(token).and_then(Weak::upgrade)
    }
}

pub struct FakeTransportFactory {
    net: FakeNet,
    owner: String,
    pub created: AtomicUsize,
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn create(
        &self,
        remote: &PeerId,
        sink: TransportEventSink,
    ) -> Result<Arc<dyn PeerTransport>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let n = self.net.inner.next_token.fetch_add(1, Ordering::SeqCst);
        let token = format!("t{}", n);
        let transport = Arc::new(FakeTransport {
            token: token.clone(),
            net: self.net.clone(),
            sink,
            state: Mutex::new(FakeState::default()),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        self.net
            .inner
            .by_token
            .lock()
            .insert(token, Arc::downgrade(&transport));
        self.net
            .inner
            .by_owner
            .lock()
            .push((self.owner.clone(), remote.clone(), transport.clone()));
        Ok(transport as Arc<dyn PeerTransport>)
    }
}

#[derive(Default)]
struct FakeState {
    peer_token: Option<String>,
    local_set: bool,
    remote_set: bool,
    channel: Option<Arc<FakeDataChannel>>,
    tracks: Vec<LocalTrack>,
    candidates: Vec<String>,
    offers: usize,
    rollbacks: usize,
}

pub struct FakeTransport {
    token: String,
    net: FakeNet,
    sink: TransportEventSink,
    state: Mutex<FakeState>,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl FakeTransport {
    /// Inject an engine event as if the engine had reported it
    pub fn emit(&self, event: TransportEvent) {
        self.sink.emit(event)
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.state.lock().candidates.clone()
    }

    pub fn offers_created(&self) -> usize {
        self.state.lock().offers
    }

    pub fn rollbacks(&self) -> usize {
        self.state.lock().rollbacks
    }

    pub fn channel(&self) -> Option<Arc<FakeDataChannel>> {
        self.state.lock().channel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn description(&self, kind: &str) -> String {
        let state = self.state.lock();
        let mut sdp = format!("fake {}", self.token);
        for track in &state.tracks {
            sdp.push_str(&format!(" {}:{}:{}", track.stream_id, track.kind, track.id));
        }
        serde_json::json!({ "type": kind, "sdp": sdp }).to_string()
    }

    fn trickle(&self) {
        let candidate = serde_json::json!({
            "candidate": format!("candidate:1 1 udp 2130706431 10.0.0.1 5000 typ host {}", self.token),
            "sdpMid": "0",
            "sdpMLineIndex": 0
        });
        self.sink
            .emit(TransportEvent::LocalCandidate(candidate.to_string()));
    }

    /// Parse a remote description, remember the peer and surface its tracks
    fn apply_remote(&self, payload: &str, expected: &str) -> Result<()> {
        let value: serde_json::Value =
            serde_json::from_str(payload).map_err(|e| Error::SdpError(e.to_string()))?;
        if value["type"] != expected {
            return Err(Error::SdpError(format!("expected {}", expected)));
        }
        let sdp = value["sdp"].as_str().unwrap_or_default();
        let mut parts = sdp.split_whitespace();
        if parts.next() != Some("fake") {
            return Err(Error::SdpError("not a fake description".to_string()));
        }
        let peer_token = parts
            .next()
            .ok_or_else(|| Error::SdpError("missing token".to_string()))?
            .to_string();

        {
            let mut state = self.state.lock();
            state.peer_token = Some(peer_token);
            state.remote_set = true;
        }

        for track in parts {
            let mut fields = track.splitn(3, ':');
            let (Some(stream_id), Some(kind), Some(track_id)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            let kind = if kind == "video" {
                MediaKind::Video
            } else {
                MediaKind::Audio
            };
            self.sink.emit(TransportEvent::RemoteTrack {
                track_id: track_id.to_string(),
                stream_id: stream_id.to_string(),
                kind,
            });
        }
        Ok(())
    }

    /// Called on the side that completes the round (initiator applying the answer)
    fn complete(&self) {
        let peer = {
            let state = self.state.lock();
            state.peer_token.as_deref().and_then(|t| self.net.lookup(t))
        };
        let Some(peer) = peer else {
            return;
        };

        let outcome = self.net.inner.outcome.lock().clone();
        match outcome {
            Outcome::Fail => {
                self.emit(TransportEvent::StateChanged(TransportState::Failed));
                peer.emit(TransportEvent::StateChanged(TransportState::Failed));
            }
            Outcome::Connect(_) => {
                let first = !self.connected.swap(true, Ordering::SeqCst);
                peer.connected.store(true, Ordering::SeqCst);
                if !first {
                    return;
                }
                self.emit(TransportEvent::StateChanged(TransportState::Connected));
                peer.emit(TransportEvent::StateChanged(TransportState::Connected));
                FakeDataChannel::pair(self, &peer);
            }
        }
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn create_data_channel(
        &self,
        label: &str,
        _mode: DataChannelMode,
    ) -> Result<Arc<dyn DataChannel>> {
        let channel = FakeDataChannel::new(label);
        self.state.lock().channel = Some(channel.clone());
        Ok(channel as Arc<dyn DataChannel>)
    }

    async fn create_offer(&self) -> Result<String> {
        self.state.lock().offers += 1;
        let payload = self.description("offer");
        self.state.lock().local_set = true;
        self.trickle();
        Ok(payload)
    }

    async fn create_answer(&self) -> Result<String> {
        if self.net.inner.fail_answers.load(Ordering::SeqCst) {
            return Err(Error::SdpError("answer rejected by engine".to_string()));
        }
        if !self.state.lock().remote_set {
            return Err(Error::SdpError("no remote offer".to_string()));
        }
        let payload = self.description("answer");
        self.state.lock().local_set = true;
        self.trickle();
        Ok(payload)
    }

    async fn rollback_local_offer(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.local_set {
            return Err(Error::SdpError("no local offer".to_string()));
        }
        state.local_set = false;
        state.rollbacks += 1;
        Ok(())
    }

    async fn apply_offer(&self, payload: &str) -> Result<()> {
        self.apply_remote(payload, "offer")
    }

    async fn apply_answer(&self, payload: &str) -> Result<()> {
        self.apply_remote(payload, "answer")?;
        self.complete();
        Ok(())
    }

    async fn add_ice_candidate(&self, payload: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.remote_set {
            return Err(Error::IceCandidateError(
                "candidate before remote description".to_string(),
            ));
        }
        state.candidates.push(payload.to_string());
        Ok(())
    }

    async fn add_local_track(&self, track: &LocalTrack) -> Result<()> {
        self.state.lock().tracks.push(track.clone());
        Ok(())
    }

    async fn selected_path(&self) -> Option<SelectedPath> {
        if !self.connected.load(Ordering::SeqCst) {
            return None;
        }
        match &*self.net.inner.outcome.lock() {
            Outcome::Connect(path) => Some(path.clone()),
            Outcome::Fail => None,
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(channel) = self.state.lock().channel.clone() {
            channel.open.store(false, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// One end of a fake data channel
#[derive(Debug)]
pub struct FakeDataChannel {
    label: String,
    open: AtomicBool,
    sent: Mutex<Vec<String>>,
    remote: Mutex<Option<TransportEventSink>>,
}

impl FakeDataChannel {
    fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            open: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            remote: Mutex::new(None),
        })
    }

    /// Frames written through this end
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Connect the initiator's channel (on `a` or `b`) to a fresh responder end
    fn pair(a: &FakeTransport, b: &FakeTransport) {
        let (initiator, responder) = if a.channel().is_some() {
            (a, b)
        } else if b.channel().is_some() {
            (b, a)
        } else {
            return;
        };
        let Some(local) = initiator.channel() else {
            return;
        };

        let remote = FakeDataChannel::new(&local.label);
        *local.remote.lock() = Some(responder.sink.clone());
        *remote.remote.lock() = Some(initiator.sink.clone());
        responder.state.lock().channel = Some(remote.clone());

        local.open.store(true, Ordering::SeqCst);
        remote.open.store(true, Ordering::SeqCst);
        responder.emit(TransportEvent::DataChannel(remote));
        initiator.emit(TransportEvent::ChannelOpen);
    }
}

#[async_trait]
impl DataChannel for FakeDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        if !self.is_open() {
            return Err(Error::DataChannelError("channel not open".to_string()));
        }
        self.sent.lock().push(text.to_string());
        if let Some(remote) = self.remote.lock().as_ref() {
            remote.emit(TransportEvent::ChannelMessage(text.to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            if let Some(remote) = self.remote.lock().as_ref() {
                remote.emit(TransportEvent::ChannelClosed);
            }
        }
        Ok(())
    }
}
