//! In-process signaling relay
//!
//! Every [`MemorySignalingClient`] handed out by one [`MemoryRelay`] can reach
//! the others by identity. Delivery is FIFO per receiver, through a single
//! pump task per client, which is the same ordering a real hub connection
//! gives. Used by the CLI's `--relay memory` mode and by the test suites.

use super::{
    InboundSignal, OutboundSignal, SignalHandler, SignalingClient, SignalingEvent,
};
use crate::{Error, PeerId, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Outbound signals a client remembers for inspection
pub const SENT_LOG_CAPACITY: usize = 256;

/// Shared in-memory relay
///
/// ```
/// # tokio_test::block_on(async {
/// use peerlink_core::signaling::{MemoryRelay, SignalingClient};
///
/// let relay = MemoryRelay::new();
/// let host = relay.client();
/// assert_eq!(host.connect().await.unwrap(), "conn-1");
/// assert_eq!(relay.identities(), vec!["conn-1".to_string()]);
/// # });
/// ```
#[derive(Clone, Default)]
pub struct MemoryRelay {
    inner: Arc<RelayInner>,
}

#[derive(Default)]
struct RelayInner {
    next_id: AtomicU64,
    unavailable: AtomicBool,
    clients: RwLock<HashMap<PeerId, mpsc::UnboundedSender<InboundSignal>>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// New client attached to this relay; identities are `conn-1`, `conn-2`, ...
    pub fn client(&self) -> MemorySignalingClient {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        MemorySignalingClient {
            relay: self.clone(),
            shared: Arc::new(ClientShared {
                identity: RwLock::new(None),
                connected: AtomicBool::new(false),
                fail_identity: AtomicBool::new(false),
                handler: RwLock::new(None),
                events,
                pump: Mutex::new(None),
                sent: Mutex::new(VecDeque::with_capacity(SENT_LOG_CAPACITY)),
            }),
        }
    }

    /// Simulate the relay going down (new connects fail)
    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Identities currently registered
    pub fn identities(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.inner.clients.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn allocate_identity(&self) -> PeerId {
        let n = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("conn-{}", n)
    }

    fn register(&self, identity: &PeerId, inbox: mpsc::UnboundedSender<InboundSignal>) {
        self.inner.clients.write().insert(identity.clone(), inbox);
    }

    fn unregister(&self, identity: &PeerId) {
        self.inner.clients.write().remove(identity);
    }

    fn deliver(&self, target: &PeerId, signal: InboundSignal) -> std::result::Result<(), String> {
        let clients = self.inner.clients.read();
        let inbox = clients
            .get(target)
            .ok_or_else(|| format!("no connection with id {}", target))?;
        inbox
            .send(signal)
            .map_err(|_| format!("connection {} is closed", target))
    }
}

struct ClientShared {
    identity: RwLock<Option<PeerId>>,
    connected: AtomicBool,
    fail_identity: AtomicBool,
    handler: RwLock<Option<SignalHandler>>,
    events: broadcast::Sender<SignalingEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
    /// Most recent outbound signals, oldest first
    sent: Mutex<VecDeque<OutboundSignal>>,
}

/// Client side of a [`MemoryRelay`]
#[derive(Clone)]
pub struct MemorySignalingClient {
    relay: MemoryRelay,
    shared: Arc<ClientShared>,
}

impl MemorySignalingClient {
    /// Make the next `connect` fail at identity retrieval
    pub fn fail_identity_retrieval(&self, fail: bool) {
        self.shared.fail_identity.store(fail, Ordering::SeqCst);
    }

    /// The last [`SENT_LOG_CAPACITY`] signals passed to `send`, in order
    pub fn sent(&self) -> Vec<OutboundSignal> {
        self.shared.sent.lock().iter().cloned().collect()
    }

    /// Drop and re-establish the link; the relay assigns a new identity
    pub fn force_reconnect(&self) -> Result<PeerId> {
        let previous = self.shared.identity.read().clone();
        if let Some(old) = previous.as_ref() {
            self.relay.unregister(old);
        }
        let _ = self
            .shared
            .events
            .send(SignalingEvent::Reconnecting { attempt: 0 });

        let current = self.attach()?;
        info!(previous = ?previous, current = %current, "Memory signaling reconnected");
        let _ = self.shared.events.send(SignalingEvent::IdentityChanged {
            previous,
            current: current.clone(),
        });
        Ok(current)
    }

    /// Register under a fresh identity and make sure the pump runs
    fn attach(&self) -> Result<PeerId> {
        if self.relay.inner.unavailable.load(Ordering::SeqCst) {
            self.shared.connected.store(false, Ordering::SeqCst);
            return Err(Error::SignalingUnavailable("relay unreachable".to_string()));
        }

        let (inbox_tx, mut inbox_rx) = mpsc::unbounded_channel::<InboundSignal>();
        let shared = self.shared.clone();
        let pump = tokio::spawn(async move {
            while let Some(signal) = inbox_rx.recv().await {
                let handler = shared.handler.read().clone();
                match handler {
                    Some(handler) => handler(signal),
                    None => debug!(method = signal.method(), "No handler installed, dropping"),
                }
            }
        });
        if let Some(old) = self.shared.pump.lock().replace(pump) {
            old.abort();
        }

        if self.shared.fail_identity.load(Ordering::SeqCst) {
            self.shared.connected.store(true, Ordering::SeqCst);
            return Err(Error::IdentityRetrievalFailed(
                "GetConnectionId was rejected".to_string(),
            ));
        }

        let identity = self.relay.allocate_identity();
        self.relay.register(&identity, inbox_tx);
        *self.shared.identity.write() = Some(identity.clone());
        self.shared.connected.store(true, Ordering::SeqCst);
        Ok(identity)
    }

    fn report_failure(&self, signal: &OutboundSignal, reason: String) {
        warn!(
            target_peer = %signal.target(),
            method = signal.method(),
            "Signaling delivery failed: {}",
            reason
        );
        let _ = self.shared.events.send(SignalingEvent::DeliveryFailed {
            target: signal.target().clone(),
            method: signal.method().to_string(),
            reason,
        });
    }
}

#[async_trait]
impl SignalingClient for MemorySignalingClient {
    async fn connect(&self) -> Result<PeerId> {
        if let Some(identity) = self.identity() {
            return Ok(identity);
        }
        let identity = self.attach()?;
        info!(identity = %identity, "Memory signaling connected");
        let _ = self.shared.events.send(SignalingEvent::Connected {
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
        {
            let mut sent = self.shared.sent.lock();
            if sent.len() == SENT_LOG_CAPACITY {
                sent.pop_front();
            }
            sent.push_back(signal.clone());
        }

        let Some(from) = self.identity().filter(|_| self.is_connected()) else {
            self.report_failure(&signal, "not connected".to_string());
            return;
        };

        let target = signal.target().clone();
        let inbound = signal.clone().into_inbound(from);
        if let Err(reason) = self.relay.deliver(&target, inbound) {
            self.report_failure(&signal, reason);
        }
    }

    fn set_handler(&self, handler: SignalHandler) {
        *self.shared.handler.write() = Some(handler);
    }

    fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.shared.events.subscribe()
    }

    async fn close(&self) -> Result<()> {
        self.shared.connected.store(false, Ordering::SeqCst);
        if let Some(identity) = self.shared.identity.write().take() {
            self.relay.unregister(&identity);
        }
        if let Some(pump) = self.shared.pump.lock().take() {
            pump.abort();
        }
        let _ = self.shared.events.send(SignalingEvent::Closed {
            reason: "closed by client".to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn collecting_handler() -> (SignalHandler, mpsc::UnboundedReceiver<InboundSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: SignalHandler = Arc::new(move |signal| {
            let _ = tx.send(signal);
        });
        (handler, rx)
    }

    #[tokio::test]
    async fn test_identities_are_sequential() {
        let relay = MemoryRelay::new();
        let a = relay.client();
        let b = relay.client();
        assert_eq!(a.connect().await.unwrap(), "conn-1");
        assert_eq!(b.connect().await.unwrap(), "conn-2");
        // connect is idempotent while connected
        assert_eq!(a.connect().await.unwrap(), "conn-1");
        assert_eq!(relay.identities(), vec!["conn-1", "conn-2"]);
    }

    #[tokio::test]
    async fn test_delivery_is_ordered() {
        let relay = MemoryRelay::new();
        let a = relay.client();
        let b = relay.client();
        a.connect().await.unwrap();
        let b_id = b.connect().await.unwrap();
        let (handler, mut rx) = collecting_handler();
        b.set_handler(handler);

        for i in 0..10 {
            a.send(OutboundSignal::Ice {
                to: b_id.clone(),
                payload: format!("c{}", i),
            });
        }

        for i in 0..10 {
            let signal = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(
                signal,
                InboundSignal::Ice {
                    from: "conn-1".into(),
                    payload: format!("c{}", i)
                }
            );
        }
    }

    #[tokio::test]
    async fn test_handler_replacement() {
        let relay = MemoryRelay::new();
        let a = relay.client();
        let b = relay.client();
        a.connect().await.unwrap();
        let b_id = b.connect().await.unwrap();

        let (first, mut first_rx) = collecting_handler();
        let (second, mut second_rx) = collecting_handler();
        b.set_handler(first);
        b.set_handler(second);

        a.send(OutboundSignal::Offer {
            to: b_id,
            payload: "o".into(),
        });
        let got = tokio::time::timeout(Duration::from_secs(1), second_rx.recv())
            .await
            .unwrap();
        assert!(got.is_some());
        assert!(first_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unavailable_relay() {
        let relay = MemoryRelay::new();
        relay.set_available(false);
        let a = relay.client();
        let err = a.connect().await.unwrap_err();
        assert!(matches!(err, Error::SignalingUnavailable(_)));
        assert!(!a.is_connected());
        assert_eq!(a.identity(), None);
    }

    #[tokio::test]
    async fn test_identity_retrieval_failure_is_distinct() {
        let relay = MemoryRelay::new();
        let a = relay.client();
        a.fail_identity_retrieval(true);
        let err = a.connect().await.unwrap_err();
        assert!(matches!(err, Error::IdentityRetrievalFailed(_)));
        assert_eq!(a.identity(), None);
    }

    #[tokio::test]
    async fn test_unknown_target_reports_delivery_failure() {
        let relay = MemoryRelay::new();
        let a = relay.client();
        a.connect().await.unwrap();
        let mut events = a.subscribe();

        a.send(OutboundSignal::Answer {
            to: "conn-99".into(),
            payload: "x".into(),
        });

        match events.recv().await.unwrap() {
            SignalingEvent::DeliveryFailed { target, method, .. } => {
                assert_eq!(target, "conn-99");
                assert_eq!(method, "SendAnswer");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(a.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_sent_log_keeps_only_recent_signals() {
        let relay = MemoryRelay::new();
        let a = relay.client();

        for n in 0..SENT_LOG_CAPACITY + 5 {
            a.send(OutboundSignal::Ice {
                to: "conn-2".into(),
                payload: n.to_string(),
            });
        }

        let sent = a.sent();
        assert_eq!(sent.len(), SENT_LOG_CAPACITY);
        assert_eq!(sent[0].payload(), "5");
        assert_eq!(
            sent[SENT_LOG_CAPACITY - 1].payload(),
            (SENT_LOG_CAPACITY + 4).to_string()
        );
    }

    #[tokio::test]
    async fn test_force_reconnect_changes_identity() {
        let relay = MemoryRelay::new();
        let a = relay.client();
        a.connect().await.unwrap();
        let mut events = a.subscribe();

        let current = a.force_reconnect().unwrap();
        assert_eq!(current, "conn-2");
        assert_eq!(relay.identities(), vec!["conn-2"]);

        assert_eq!(
            events.recv().await.unwrap(),
            SignalingEvent::Reconnecting { attempt: 0 }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            SignalingEvent::IdentityChanged {
                previous: Some("conn-1".into()),
                current: "conn-2".into()
            }
        );
    }

    #[tokio::test]
    async fn test_close_unregisters() {
        let relay = MemoryRelay::new();
        let a = relay.client();
        a.connect().await.unwrap();
        a.close().await.unwrap();
        assert!(!a.is_connected());
        assert!(relay.identities().is_empty());
    }
}
