//! SignalR hub connection with automatic reconnection
//!
//! One WebSocket link at a time. Each link runs three tasks: a writer that
//! owns the sink, a reader that dispatches hub records, and a keep-alive
//! pinger. When the reader sees the link die it notifies a supervisor task,
//! which re-establishes the link on the configured [`ReconnectPolicy`]
//! schedule. The hub hands out a fresh connection id on every link, so a
//! successful reconnect normally surfaces as
//! [`SignalingEvent::IdentityChanged`].

use super::protocol::{self, HubMessage};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use peerlink_core::reconnect::ReconnectPolicy;
use peerlink_core::signaling::{
    methods, InboundSignal, OutboundSignal, SignalHandler, SignalingClient, SignalingEvent,
};
use peerlink_core::{Error, PeerId, PeerlinkConfig, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Client keep-alive ping interval
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Link is considered dead after this long without any hub record
pub const SERVER_TIMEOUT: Duration = Duration::from_secs(30);

const EVENT_CAPACITY: usize = 64;

type HubStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum PendingCall {
    Identity(oneshot::Sender<Result<PeerId>>),
    Delivery { target: PeerId, method: String },
}

/// Why a link ended
#[derive(Debug, Clone)]
struct LinkEnd {
    reason: String,
    reconnect: bool,
}

impl LinkEnd {
    fn reconnect(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            reconnect: true,
        }
    }
}

struct LinkLost {
    generation: u64,
    end: LinkEnd,
}

struct Link {
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    pinger: JoinHandle<()>,
}

impl Link {
    /// Stop reading and pinging; the writer drains and closes the socket
    fn shutdown(self) {
        self.reader.abort();
        self.pinger.abort();
    }
}

struct Shared {
    url: String,
    identity_timeout: Duration,
    policy: ReconnectPolicy,
    identity: RwLock<Option<PeerId>>,
    connected: AtomicBool,
    closing: AtomicBool,
    handler: RwLock<Option<SignalHandler>>,
    events: broadcast::Sender<SignalingEvent>,
    link: Mutex<Option<Link>>,
    generation: AtomicU64,
    next_invocation: AtomicU64,
    pending: Mutex<HashMap<String, PendingCall>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    connecting: tokio::sync::Mutex<()>,
}

/// [`SignalingClient`] over a SignalR hub
#[derive(Clone)]
pub struct HubSignalingClient {
    shared: Arc<Shared>,
}

impl HubSignalingClient {
    /// Validate the hub URL; no I/O happens until `connect`
    ///
    /// `http(s)://` URLs are rewritten to `ws(s)://`.
    pub fn new(config: &PeerlinkConfig) -> Result<Self> {
        let ws_url = config.signaling_ws_url();
        let parsed = url::Url::parse(&ws_url).map_err(|e| {
            Error::InvalidConfig(format!("Invalid signaling URL {}: {}", ws_url, e))
        })?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(Error::InvalidConfig(format!(
                "Unsupported signaling URL scheme: {}",
                parsed.scheme()
            )));
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            shared: Arc::new(Shared {
                url: parsed.to_string(),
                identity_timeout: config.identity_timeout(),
                policy: config.reconnect.clone(),
                identity: RwLock::new(None),
                connected: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                handler: RwLock::new(None),
                events,
                link: Mutex::new(None),
                generation: AtomicU64::new(0),
                next_invocation: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
                supervisor: Mutex::new(None),
                connecting: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// WebSocket URL of the hub
    pub fn url(&self) -> &str {
        &self.shared.url
    }
}

impl Shared {
    fn emit(&self, event: SignalingEvent) {
        let _ = self.events.send(event);
    }

    fn next_invocation_id(&self) -> String {
        self.next_invocation.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// Queue a message on the current link
    fn post(&self, message: HubMessage) -> Result<()> {
        let text = protocol::encode(message)?;
        let link = self.link.lock();
        let link = link
            .as_ref()
            .ok_or_else(|| Error::NotReady("not connected to the hub".to_string()))?;
        link.outbound
            .send(Message::Text(text))
            .map_err(|_| Error::WebSocketError("hub writer has stopped".to_string()))
    }

    fn drop_link(&self) {
        if let Some(link) = self.link.lock().take() {
            link.shutdown();
        }
    }

    fn report_failure(&self, target: PeerId, method: String, reason: String) {
        warn!(
            target_peer = %target,
            method = %method,
            "Signaling delivery failed: {}",
            reason
        );
        self.emit(SignalingEvent::DeliveryFailed {
            target,
            method,
            reason,
        });
    }

    /// Open a socket, handshake, start the link tasks and fetch the identity
    async fn establish(self: &Arc<Self>, lost: mpsc::UnboundedSender<LinkLost>) -> Result<PeerId> {
        let (mut stream, _response) = connect_async(self.url.as_str()).await.map_err(|e| {
            Error::SignalingUnavailable(format!("Failed to connect to {}: {}", self.url, e))
        })?;

        stream
            .send(Message::Text(protocol::handshake_request()?))
            .await
            .map_err(|e| Error::SignalingUnavailable(format!("Handshake failed: {}", e)))?;

        let text = tokio::time::timeout(self.identity_timeout, next_text(&mut stream))
            .await
            .map_err(|_| Error::SignalingUnavailable("Handshake timed out".to_string()))??;
        let mut records = protocol::split_records(&text).into_iter();
        let response = records
            .next()
            .ok_or_else(|| Error::SignalingUnavailable("Empty handshake response".to_string()))?;
        protocol::parse_handshake_response(&response)?;
        // The hub may send records in the same frame as its handshake reply
        let backlog: Vec<String> = records.collect();

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (write, read) = stream.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(write, outbound_rx));
        let reader = tokio::spawn(read_loop(self.clone(), read, backlog, generation, lost));
        let pinger = tokio::spawn(ping_loop(outbound_tx.clone()));
        let previous = self.link.lock().replace(Link {
            outbound: outbound_tx,
            reader,
            pinger,
        });
        if let Some(previous) = previous {
            previous.shutdown();
        }

        let identity = match self.request_identity().await {
            Ok(identity) => identity,
            Err(e) => {
                self.drop_link();
                return Err(e);
            }
        };

        *self.identity.write() = Some(identity.clone());
        self.connected.store(true, Ordering::SeqCst);
        Ok(identity)
    }

    async fn request_identity(&self) -> Result<PeerId> {
        let invocation_id = self.next_invocation_id();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .insert(invocation_id.clone(), PendingCall::Identity(tx));

        let message =
            HubMessage::invocation(Some(invocation_id.clone()), methods::GET_CONNECTION_ID, &[]);
        if let Err(e) = self.post(message) {
            self.pending.lock().remove(&invocation_id);
            return Err(Error::IdentityRetrievalFailed(e.to_string()));
        }

        match tokio::time::timeout(self.identity_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::IdentityRetrievalFailed(
                "link closed before GetConnectionId completed".to_string(),
            )),
            Err(_) => {
                self.pending.lock().remove(&invocation_id);
                Err(Error::IdentityRetrievalFailed(format!(
                    "GetConnectionId timed out after {}ms",
                    self.identity_timeout.as_millis()
                )))
            }
        }
    }

    /// Handle one hub record; `Some` when the hub closed the link
    fn handle_record(&self, record: &str) -> Option<LinkEnd> {
        match protocol::decode(record) {
            Ok(HubMessage::Invocation {
                target, arguments, ..
            }) => {
                self.dispatch_invocation(&target, arguments);
                None
            }
            Ok(HubMessage::Completion {
                invocation_id,
                result,
                error,
            }) => {
                self.complete(&invocation_id, result, error);
                None
            }
            Ok(HubMessage::Ping) => None,
            Ok(HubMessage::Close {
                error,
                allow_reconnect,
            }) => Some(LinkEnd {
                reason: error.unwrap_or_else(|| "hub closed the connection".to_string()),
                reconnect: allow_reconnect,
            }),
            Ok(HubMessage::Unsupported(message_type)) => {
                debug!(message_type, "Ignoring unsupported hub message");
                None
            }
            Err(e) => {
                warn!("Dropping hub record: {}", e);
                None
            }
        }
    }

    fn dispatch_invocation(&self, target: &str, arguments: Vec<Value>) {
        let mut arguments = arguments.into_iter();
        let (Some(Value::String(from)), Some(payload)) = (arguments.next(), arguments.next())
        else {
            warn!(method = target, "Invocation without (sender, payload) arguments");
            return;
        };
        let payload = match payload {
            Value::String(text) => text,
            other => other.to_string(),
        };

        let signal = InboundSignal::from_invocation(target, from, payload);
        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => handler(signal),
            None => debug!(method = signal.method(), "No handler installed, dropping"),
        }
    }

    fn complete(&self, invocation_id: &str, result: Option<Value>, error: Option<String>) {
        let Some(call) = self.pending.lock().remove(invocation_id) else {
            debug!(invocation_id, "Completion for unknown invocation");
            return;
        };

        match call {
            PendingCall::Identity(tx) => {
                let outcome = match (error, result) {
                    (Some(error), _) => Err(Error::IdentityRetrievalFailed(error)),
                    (None, Some(Value::String(identity))) if !identity.is_empty() => Ok(identity),
                    (None, other) => Err(Error::IdentityRetrievalFailed(format!(
                        "unexpected GetConnectionId result: {:?}",
                        other
                    ))),
                };
                let _ = tx.send(outcome);
            }
            PendingCall::Delivery { target, method } => {
                if let Some(reason) = error {
                    self.report_failure(target, method, reason);
                }
            }
        }
    }

    /// Resolve everything still waiting on a link that is gone
    fn fail_pending(&self, reason: &str) {
        let calls: Vec<PendingCall> = self.pending.lock().drain().map(|(_, c)| c).collect();
        for call in calls {
            match call {
                PendingCall::Identity(tx) => {
                    let _ = tx.send(Err(Error::IdentityRetrievalFailed(reason.to_string())));
                }
                PendingCall::Delivery { target, method } => {
                    self.report_failure(target, method, reason.to_string());
                }
            }
        }
    }

    /// Walk the reconnect schedule; false once the client should stop
    async fn reconnect(
        self: &Arc<Self>,
        lost: &mpsc::UnboundedSender<LinkLost>,
        reason: String,
    ) -> bool {
        let previous = self.identity.read().clone();
        let mut attempt = 0u32;
        let mut last_error = reason;

        while let Some(delay) = self.policy.delay_for(attempt) {
            self.emit(SignalingEvent::Reconnecting { attempt });
            tokio::time::sleep(delay).await;
            if self.closing.load(Ordering::SeqCst) {
                return false;
            }

            match self.establish(lost.clone()).await {
                Ok(current) => {
                    info!(previous = ?previous, current = %current, attempt, "Reconnected to signaling hub");
                    if previous.as_ref() == Some(&current) {
                        self.emit(SignalingEvent::Connected { identity: current });
                    } else {
                        self.emit(SignalingEvent::IdentityChanged { previous, current });
                    }
                    return true;
                }
                Err(e) => {
                    warn!(attempt, "Reconnect attempt failed: {}", e);
                    last_error = e.to_string();
                    attempt += 1;
                    if !e.is_retryable() {
                        break;
                    }
                }
            }
        }

        self.emit(SignalingEvent::Closed {
            reason: format!(
                "Reconnection gave up after {} attempts: {}",
                attempt, last_error
            ),
        });
        false
    }
}

async fn next_text(stream: &mut HubStream) -> Result<String> {
    while let Some(frame) = stream.next().await {
        match frame.map_err(|e| Error::SignalingUnavailable(e.to_string()))? {
            Message::Text(text) => return Ok(text),
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(Error::SignalingUnavailable(
        "Connection closed during handshake".to_string(),
    ))
}

async fn write_loop(
    mut write: SplitSink<HubStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outbound.recv().await {
        if let Err(e) = write.send(message).await {
            warn!("Hub write failed: {}", e);
            break;
        }
    }
    let _ = write.close().await;
}

async fn read_loop(
    shared: Arc<Shared>,
    mut read: SplitStream<HubStream>,
    backlog: Vec<String>,
    generation: u64,
    lost: mpsc::UnboundedSender<LinkLost>,
) {
    let end = 'read: {
        for record in &backlog {
            if let Some(end) = shared.handle_record(record) {
                break 'read end;
            }
        }
        loop {
            let frame = match tokio::time::timeout(SERVER_TIMEOUT, read.next()).await {
                Err(_) => break 'read LinkEnd::reconnect("server timeout elapsed"),
                Ok(None) => break 'read LinkEnd::reconnect("connection closed"),
                Ok(Some(Err(e))) => break 'read LinkEnd::reconnect(e.to_string()),
                Ok(Some(Ok(frame))) => frame,
            };
            match frame {
                Message::Text(text) => {
                    for record in protocol::split_records(&text) {
                        if let Some(end) = shared.handle_record(&record) {
                            break 'read end;
                        }
                    }
                }
                Message::Close(_) => break 'read LinkEnd::reconnect("hub closed the socket"),
                _ => {}
            }
        }
    };

    // A newer link has taken over; nothing to report
    if shared.generation.load(Ordering::SeqCst) != generation {
        return;
    }
    shared.connected.store(false, Ordering::SeqCst);
    shared.fail_pending(&end.reason);
    if !shared.closing.load(Ordering::SeqCst) {
        let _ = lost.send(LinkLost { generation, end });
    }
}

async fn ping_loop(outbound: mpsc::UnboundedSender<Message>) {
    let mut ticker = tokio::time::interval(KEEP_ALIVE_INTERVAL);
    // First tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Ok(text) = protocol::encode(HubMessage::Ping) else {
            break;
        };
        if outbound.send(Message::Text(text)).is_err() {
            break;
        }
    }
}

async fn supervise(
    shared: Arc<Shared>,
    mut lost_rx: mpsc::UnboundedReceiver<LinkLost>,
    lost_tx: mpsc::UnboundedSender<LinkLost>,
) {
    while let Some(lost) = lost_rx.recv().await {
        if shared.closing.load(Ordering::SeqCst) {
            break;
        }
        if lost.generation != shared.generation.load(Ordering::SeqCst) {
            continue;
        }

        warn!(reason = %lost.end.reason, "Signaling hub link lost");
        shared.drop_link();
        if !lost.end.reconnect {
            shared.emit(SignalingEvent::Closed {
                reason: lost.end.reason,
            });
            break;
        }
        if !shared.reconnect(&lost_tx, lost.end.reason).await {
            break;
        }
    }
}

#[async_trait]
impl SignalingClient for HubSignalingClient {
    async fn connect(&self) -> Result<PeerId> {
        let _connecting = self.shared.connecting.lock().await;
        if let Some(identity) = self.identity().filter(|_| self.is_connected()) {
            return Ok(identity);
        }

        self.shared.closing.store(false, Ordering::SeqCst);
        let (lost_tx, lost_rx) = mpsc::unbounded_channel();
        let identity = self.shared.establish(lost_tx.clone()).await?;

        let supervisor = tokio::spawn(supervise(self.shared.clone(), lost_rx, lost_tx));
        if let Some(previous) = self.shared.supervisor.lock().replace(supervisor) {
            previous.abort();
        }

        info!(identity = %identity, url = %self.shared.url, "Connected to signaling hub");
        self.shared.emit(SignalingEvent::Connected {
            identity: identity.clone(),
        });
        Ok(identity)
    }

    fn identity(&self) -> Option<PeerId> {
        self.shared.identity.read().clone()
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn send(&self, signal: OutboundSignal) {
        let target = signal.target().clone();
        let method = signal.method().to_string();
        if !self.is_connected() {
            self.shared
                .report_failure(target, method, "not connected".to_string());
            return;
        }

        let invocation_id = self.shared.next_invocation_id();
        self.shared.pending.lock().insert(
            invocation_id.clone(),
            PendingCall::Delivery {
                target: target.clone(),
                method: method.clone(),
            },
        );

        let message =
            HubMessage::invocation(Some(invocation_id.clone()), &method, &[target.as_str(), signal.payload()]);
        if let Err(e) = self.shared.post(message) {
            self.shared.pending.lock().remove(&invocation_id);
            self.shared.report_failure(target, method, e.to_string());
        }
    }

    fn set_handler(&self, handler: SignalHandler) {
        *self.shared.handler.write() = Some(handler);
    }

    fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.shared.events.subscribe()
    }

    async fn close(&self) -> Result<()> {
        self.shared.closing.store(true, Ordering::SeqCst);
        self.shared.connected.store(false, Ordering::SeqCst);
        if let Some(supervisor) = self.shared.supervisor.lock().take() {
            supervisor.abort();
        }
        self.shared.drop_link();
        self.shared.identity.write().take();
        self.shared.pending.lock().clear();

        info!(url = %self.shared.url, "Signaling hub connection closed");
        self.shared.emit(SignalingEvent::Closed {
            reason: "closed by client".to_string(),
        });
        Ok(())
    }
}
