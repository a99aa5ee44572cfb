//! Integration test harness for the session orchestrator
//!
//! Runs real orchestrators against the in-memory signaling relay and a
//! scripted transport network, so complete offer/answer/candidate exchanges
//! can be driven without any network access.

#![allow(dead_code)]

pub mod fake_transport;

use async_trait::async_trait;
use peerlink_core::media::{LocalMediaSource, LocalTrack, MediaConstraints, MediaDevices, MediaKind};
use peerlink_core::signaling::{MemoryRelay, MemorySignalingClient};
use peerlink_core::{PeerOrchestrator, PeerlinkConfig, Result};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use fake_transport::{FakeNet, FakeTransportFactory, Outcome};

/// Default time a condition gets to become true
pub const WAIT: Duration = Duration::from_secs(5);

/// Harness error type
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] peerlink_core::Error),

    #[error("Timed out waiting for {0}")]
    Timeout(String),
}

pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

/// Initialize logging for tests
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,peerlink_core=debug")
        .with_test_writer()
        .try_init();
}

/// Poll `check` until it holds or `timeout` passes
pub async fn wait_for<F, Fut>(what: &str, timeout: Duration, mut check: F) -> HarnessResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(HarnessError::Timeout(what.to_string()));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Capture backend that always succeeds with one video and one audio track
#[derive(Debug, Default)]
pub struct FakeMediaDevices {
    pub opened: AtomicUsize,
}

#[async_trait]
impl MediaDevices for FakeMediaDevices {
    async fn open(&self, constraints: &MediaConstraints) -> Result<LocalMediaSource> {
        let n = self.opened.fetch_add(1, Ordering::SeqCst);
        let stream_id = format!("local-stream-{}", n);
        let mut tracks = Vec::new();
        if constraints.video {
            tracks.push(LocalTrack::new(
                format!("video-{}", n),
                MediaKind::Video,
                stream_id.clone(),
            ));
        }
        if constraints.audio {
            tracks.push(LocalTrack::new(
                format!("audio-{}", n),
                MediaKind::Audio,
                stream_id.clone(),
            ));
        }
        Ok(LocalMediaSource { stream_id, tracks })
    }
}

/// A started orchestrator plus the test-side handles around it
pub struct TestPeer {
    pub name: String,
    pub identity: String,
    pub orchestrator: PeerOrchestrator,
    pub signaling: MemorySignalingClient,
    pub factory: Arc<FakeTransportFactory>,
}

impl TestPeer {
    /// Build and start a peer on `relay`, creating transports through `net`
    pub async fn start(
        name: &str,
        relay: &MemoryRelay,
        net: &FakeNet,
        config: PeerlinkConfig,
    ) -> HarnessResult<Self> {
        let signaling = relay.client();
        let factory = net.factory(name);
        let orchestrator = PeerOrchestrator::new(
            config,
            Arc::new(signaling.clone()),
            factory.clone(),
            Arc::new(FakeMediaDevices::default()),
        )?;
        let identity = orchestrator.start().await?;
        Ok(Self {
            name: name.to_string(),
            identity,
            orchestrator,
            signaling,
            factory,
        })
    }

    pub fn transports_created(&self) -> usize {
        self.factory.created.load(Ordering::SeqCst)
    }

    /// Wait until this peer lists `remote` as a connection
    pub async fn wait_connected_to(&self, remote: &str) -> HarnessResult<()> {
        wait_for(&format!("{} connected to {}", self.name, remote), WAIT, || async move {
            self.orchestrator
                .snapshot()
                .await
                .connections
                .iter()
                .any(|c| c.id == remote)
        })
        .await
    }

    /// Wait until this peer has an open data channel to `remote`
    pub async fn wait_channel_to(&self, remote: &str) -> HarnessResult<()> {
        wait_for(&format!("{} channel to {}", self.name, remote), WAIT, || async move {
            self.orchestrator
                .registry()
                .open_channels()
                .await
                .iter()
                .any(|(peer, _)| peer == remote)
        })
        .await
    }
}

/// Two started peers where `client` dialed `host` and both ends are ready
pub async fn connected_pair(
    relay: &MemoryRelay,
    net: &FakeNet,
) -> HarnessResult<(TestPeer, TestPeer)> {
    let host = TestPeer::start("host", relay, net, PeerlinkConfig::default()).await?;
    let client = TestPeer::start("client", relay, net, PeerlinkConfig::default()).await?;

    client.orchestrator.connect_to_host(&host.identity).await?;
    client.wait_connected_to(&host.identity).await?;
    host.wait_connected_to(&client.identity).await?;
    client.wait_channel_to(&host.identity).await?;
    host.wait_channel_to(&client.identity).await?;
    Ok((host, client))
}
