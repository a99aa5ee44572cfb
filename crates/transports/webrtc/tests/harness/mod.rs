//! In-process SignalR hub for signaling tests
//!
//! Speaks just enough of the JSON hub protocol: handshake, `GetConnectionId`,
//! and relaying `SendX(target, payload)` to the target as
//! `ReceiveX(sender, payload)`.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use peerlink_webrtc::signaling::protocol::{self, HubMessage};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub const WAIT: Duration = Duration::from_secs(10);

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,peerlink_webrtc=debug,peerlink_core=debug")
        .with_test_writer()
        .try_init();
}

/// Poll `check` until it holds
pub async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[derive(Default)]
struct HubState {
    next_id: AtomicU64,
    reject_identity: AtomicBool,
    clients: Mutex<HashMap<String, mpsc::UnboundedSender<Message>>>,
}

impl HubState {
    fn push(&self, connection: &str, message: HubMessage) -> bool {
        let Ok(text) = protocol::encode(message) else {
            return false;
        };
        self.clients
            .lock()
            .get(connection)
            .map(|tx| tx.send(Message::Text(text)).is_ok())
            .unwrap_or(false)
    }
}

pub struct TestHub {
    pub url: String,
    state: Arc<HubState>,
    accept: JoinHandle<()>,
}

impl TestHub {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/signalrhub", listener.local_addr().unwrap());
        let state = Arc::new(HubState::default());

        let accept_state = state.clone();
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(accept_state.clone(), stream));
            }
        });

        Self { url, state, accept }
    }

    /// Answer `GetConnectionId` with an error from now on
    pub fn reject_identity(&self, reject: bool) {
        self.state.reject_identity.store(reject, Ordering::SeqCst);
    }

    /// Close the socket of one connection
    pub fn drop_connection(&self, connection: &str) {
        if let Some(tx) = self.state.clients.lock().remove(connection) {
            let _ = tx.send(Message::Close(None));
        }
    }

    pub fn connections(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.clients.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Drop for TestHub {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn serve(state: Arc<HubState>, stream: TcpStream) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    // Handshake
    match read.next().await {
        Some(Ok(Message::Text(_))) => {}
        _ => return,
    }
    if write
        .send(Message::Text(format!("{{}}{}", protocol::RECORD_SEPARATOR)))
        .await
        .is_err()
    {
        return;
    }

    let id = format!("hub-{}", state.next_id.fetch_add(1, Ordering::SeqCst) + 1);
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.clients.lock().insert(id.clone(), tx);

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if write.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = read.next().await {
        let Message::Text(text) = frame else {
            continue;
        };
        for record in protocol::split_records(&text) {
            if let Ok(message) = protocol::decode(&record) {
                handle(&state, &id, message);
            }
        }
    }

    state.clients.lock().remove(&id);
    writer.abort();
}

fn handle(state: &HubState, from: &str, message: HubMessage) {
    let HubMessage::Invocation {
        invocation_id,
        target,
        arguments,
    } = message
    else {
        return;
    };

    let (result, error) = match target.as_str() {
        "GetConnectionId" if state.reject_identity.load(Ordering::SeqCst) => {
            (None, Some("identity unavailable".to_string()))
        }
        "GetConnectionId" => (Some(Value::String(from.to_string())), None),
        method => match method.strip_prefix("Send") {
            Some(kind) => {
                let peer = arguments.first().and_then(Value::as_str).unwrap_or_default();
                let payload = arguments.get(1).cloned().unwrap_or(Value::Null);
                let relayed = HubMessage::Invocation {
                    invocation_id: None,
                    target: format!("Receive{}", kind),
                    arguments: vec![Value::String(from.to_string()), payload],
                };
                if state.push(peer, relayed) {
                    (None, None)
                } else {
                    (None, Some(format!("Connection {} not found", peer)))
                }
            }
            None => (None, Some(format!("Unknown method {}", method))),
        },
    };

    if let Some(invocation_id) = invocation_id {
        state.push(
            from,
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            },
        );
    }
}
