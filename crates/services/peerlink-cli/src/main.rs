//! peerlink binary entry point
//!
//! Interactive peer: joins a SignalR hub, hosts or dials other peers, and
//! chats over WebRTC data channels.
//!
//! # Usage
//!
//! ```bash
//! # Host: print the connection id and wait for clients
//! cargo run -p peerlink-cli -- --signaling-url http://localhost:5000/signalrhub
//!
//! # Client: dial a host by id
//! cargo run -p peerlink-cli -- --role client --host <id> \
//!   --signaling-url http://localhost:5000/signalrhub
//!
//! # Everything in one process, no hub needed (an echo host is started)
//! cargo run -p peerlink-cli -- --relay memory --lan-only
//!
//! # Settings from a TOML file, flags override
//! cargo run -p peerlink-cli -- --config peerlink.toml --max-peers 4
//! ```

mod commands;

use anyhow::Context;
use clap::Parser;
use commands::{Command, HELP};
use peerlink_core::config::TurnServerConfig;
use peerlink_core::history::Direction;
use peerlink_core::signaling::{MemoryRelay, SignalingClient};
use peerlink_core::{AppRole, PeerOrchestrator, PeerUpdate, PeerlinkConfig};
use peerlink_webrtc::{HubSignalingClient, SampleMediaDevices, WebRtcTransportFactory};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// peerlink peer
///
/// Chat and media between peers over WebRTC, signaled through a SignalR hub.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; flags below override its values
    #[arg(short, long, env = "PEERLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Which side of the call to take
    #[arg(short, long, default_value = "host", env = "PEERLINK_ROLE")]
    role: Role,

    /// Host connection id to dial on startup (client role)
    #[arg(long, env = "PEERLINK_HOST")]
    host: Option<String>,

    /// Signaling relay
    #[arg(long, default_value = "hub", env = "PEERLINK_RELAY")]
    relay: Relay,

    /// SignalR hub URL (ws, wss, http or https)
    #[arg(long, env = "PEERLINK_SIGNALING_URL")]
    signaling_url: Option<String>,

    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',')]
    stun_servers: Option<Vec<String>>,

    /// Use host candidates only (no STUN/TURN)
    #[arg(long)]
    lan_only: bool,

    /// TURN server URL
    #[arg(long, env = "PEERLINK_TURN_URL", requires_all = ["turn_username", "turn_credential"])]
    turn_url: Option<String>,

    #[arg(long, env = "PEERLINK_TURN_USERNAME")]
    turn_username: Option<String>,

    #[arg(long, env = "PEERLINK_TURN_CREDENTIAL")]
    turn_credential: Option<String>,

    /// Maximum concurrent peer sessions
    #[arg(long, env = "PEERLINK_MAX_PEERS")]
    max_peers: Option<u32>,

    /// Give up on peers that have not connected after this many seconds
    #[arg(long, env = "PEERLINK_PATH_TIMEOUT_SECS")]
    path_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Role {
    Host,
    Client,
}

impl From<Role> for AppRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Host => AppRole::Host,
            Role::Client => AppRole::Client,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Relay {
    /// SignalR hub over WebSocket
    Hub,
    /// In-process relay with a built-in echo host
    Memory,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(0);
        }
        eprintln!("\nCtrl+C received, leaving...");

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(3));
            eprintln!("Graceful shutdown timed out (3s), forcing exit");
            std::process::exit(0);
        });
    })
    .context("Failed to set Ctrl+C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("peerlink-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(args: Args, shutdown_flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    init_tracing();

    let config = build_config(&args)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        relay = ?args.relay,
        role = ?args.role,
        signaling_url = %config.signaling_url,
        stun_servers = config.stun_servers.len(),
        turn_servers = config.turn_servers.len(),
        max_peers = config.max_peers,
        "peerlink starting"
    );

    let (peer, echo_host) = match args.relay {
        Relay::Hub => {
            let signaling = Arc::new(HubSignalingClient::new(&config)?);
            (build_peer(&config, signaling)?, None)
        }
        Relay::Memory => {
            let relay = MemoryRelay::new();
            let host = build_peer(&config, Arc::new(relay.client()))?;
            let peer = build_peer(&config, Arc::new(relay.client()))?;
            (peer, Some(host))
        }
    };

    let identity = peer
        .start()
        .await
        .context("Could not join the signaling relay")?;
    println!("Your connection id: {}", identity);

    let mut role = args.role;
    let mut dial = args.host.clone();
    if let Some(host) = &echo_host {
        let host_id = host.start().await?;
        host.select_role(AppRole::Host);
        spawn_echo(host.clone());
        println!("Echo host running as {}", host_id);
        role = Role::Client;
        dial = Some(host_id);
    }

    peer.select_role(role.into());
    spawn_printer(peer.subscribe());

    if let Some(host_id) = dial {
        if let Err(e) = peer.connect_to_host(&host_id).await {
            warn!("Could not dial {}: {}", host_id, e);
        }
    } else if role == Role::Host {
        println!("Waiting for clients. Share your connection id.");
    }
    println!("Type /help for commands.");

    run_prompt(&peer, &shutdown_flag).await;

    info!("Shutting down");
    peer.shutdown().await;
    if let Some(host) = echo_host {
        host.shutdown().await;
    }
    Ok(())
}

fn build_config(args: &Args) -> anyhow::Result<PeerlinkConfig> {
    let mut config = match &args.config {
        Some(path) => PeerlinkConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => PeerlinkConfig::default(),
    };

    if let Some(url) = &args.signaling_url {
        config.signaling_url = url.clone();
    }
    if let Some(stun_servers) = &args.stun_servers {
        config.stun_servers = stun_servers.clone();
    }
    if args.lan_only {
        config.stun_servers.clear();
        config.turn_servers.clear();
    }
    if let (Some(url), Some(username), Some(credential)) =
        (&args.turn_url, &args.turn_username, &args.turn_credential)
    {
        config.turn_servers.push(TurnServerConfig {
            url: url.clone(),
            username: username.clone(),
            credential: credential.clone(),
        });
    }
    if let Some(max_peers) = args.max_peers {
        config.max_peers = max_peers;
    }
    if let Some(secs) = args.path_timeout_secs {
        config.path_discovery_timeout_secs = Some(secs);
    }

    config.validate()?;
    Ok(config)
}

fn build_peer(
    config: &PeerlinkConfig,
    signaling: Arc<dyn SignalingClient>,
) -> anyhow::Result<Arc<PeerOrchestrator>> {
    let devices = SampleMediaDevices::new();
    let factory = Arc::new(WebRtcTransportFactory::new(config, devices.tracks()));
    let peer = PeerOrchestrator::new(config.clone(), signaling, factory, Arc::new(devices))?;
    Ok(Arc::new(peer))
}

/// Print orchestrator updates as they happen
fn spawn_printer(mut updates: broadcast::Receiver<PeerUpdate>) {
    tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            match update {
                PeerUpdate::IdentityAssigned(id) => println!("* connection id is now {}", id),
                PeerUpdate::StatusChanged(status) => println!("* status: {:?}", status),
                PeerUpdate::PeerConnected { peer, path } => {
                    println!("* connected to {} ({})", peer, path)
                }
                PeerUpdate::PeerFailed(peer) => println!("* connection failed with {}", peer),
                PeerUpdate::PeerRemoved(peer) => println!("* {} left", peer),
                PeerUpdate::ChannelOpen(peer) => println!("* chat open with {}", peer),
                PeerUpdate::Message(message) if message.direction == Direction::Remote => {
                    println!("[{}] {}", message.sender_id, message.content)
                }
                PeerUpdate::Message(_) => {}
                PeerUpdate::CameraStatus { peer, enabled } => println!(
                    "* {} turned their camera {}",
                    peer,
                    if enabled { "on" } else { "off" }
                ),
                PeerUpdate::RemoteStream { peer, stream_id } => {
                    println!("* receiving media {} from {}", stream_id, peer)
                }
                PeerUpdate::Error(error) => println!("! {}", error),
            }
        }
    });
}

/// Answer every remote chat message with an echo
fn spawn_echo(host: Arc<PeerOrchestrator>) {
    let mut updates = host.subscribe();
    tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            if let PeerUpdate::Message(message) = update {
                if message.direction == Direction::Remote {
                    let reply = format!("echo: {}", message.content);
                    if let Err(e) = host.send_message(&reply).await {
                        warn!("Echo failed: {}", e);
                    }
                }
            }
        }
    });
}

async fn run_prompt(peer: &PeerOrchestrator, shutdown_flag: &AtomicBool) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_millis(100));

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = ticker.tick() => {
                if shutdown_flag.load(Ordering::SeqCst) {
                    break;
                }
                continue;
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            // stdin closed
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                break;
            }
        };

        match Command::parse(&line) {
            Command::Empty => {}
            Command::Say(text) => match peer.send_message(&text).await {
                Ok(report) => {
                    for (id, reason) in &report.failed {
                        println!("! not delivered to {}: {}", id, reason);
                    }
                    if report.message.is_some() && report.delivered.is_empty() {
                        println!("* nobody is connected yet");
                    }
                }
                Err(e) => println!("! {}", e),
            },
            Command::Video => {
                let on = peer.toggle_video().await;
                println!("* camera {}", if on { "on" } else { "off" });
            }
            Command::Audio => {
                let on = peer.toggle_audio();
                println!("* microphone {}", if on { "on" } else { "off" });
            }
            Command::Media => match peer.activate_media().await {
                Ok(()) => println!("* local media started"),
                Err(e) => println!("! {}", e),
            },
            Command::Peers => {
                let snapshot = peer.snapshot().await;
                if snapshot.peers.is_empty() {
                    println!("* no peers");
                }
                for record in snapshot.peers {
                    let path = record
                        .path
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "  {}  {}  {:?}  {}  path={}{}",
                        record.id,
                        record.role,
                        record.status,
                        record.state,
                        path,
                        if record.camera_off { "  camera off" } else { "" }
                    );
                }
            }
            Command::Connect(id) => {
                if let Err(e) = peer.connect_to_host(&id).await {
                    println!("! {}", e);
                }
            }
            Command::Disconnect(id) => {
                if !peer.disconnect_peer(&id).await {
                    println!("! no peer {}", id);
                }
            }
            Command::Status => {
                let snapshot = peer.snapshot().await;
                println!(
                    "  id={}  status={:?}  connections={}",
                    snapshot.my_identity.as_deref().unwrap_or("-"),
                    snapshot.connection_status,
                    snapshot.connections.len()
                );
                if let Some(error) = snapshot.error {
                    println!("  last error: {}", error);
                }
            }
            Command::Help => println!("{}", HELP),
            Command::Quit => break,
            Command::Unknown(text) => println!("! unknown command {} (try /help)", text),
        }
    }
}

fn init_tracing() {
    // RUST_LOG wins; logs go to stderr so the prompt stays readable
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
