//! Configuration types for the peer orchestrator

use crate::media::MediaConstraints;
use crate::reconnect::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Public STUN servers used when nothing else is configured
pub const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Main configuration for a `PeerOrchestrator` and its transport engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerlinkConfig {
    /// Signaling hub URL (ws://, wss://, http:// or https://)
    pub signaling_url: String,

    /// STUN server URLs
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Maximum concurrent sessions (default: 16)
    pub max_peers: u32,

    /// Label of the application data channel (default: "chat")
    pub data_channel_label: String,

    /// Data channel mode (default: Reliable)
    pub data_channel_mode: DataChannelMode,

    /// Local capture constraints
    pub media: MediaConstraints,

    /// Signaling reconnection schedule
    pub reconnect: ReconnectPolicy,

    /// How long to wait for `GetConnectionId` (default: 10000ms)
    pub identity_timeout_ms: u64,

    /// Fail sessions that have not connected within this window (default: unbounded)
    pub path_discovery_timeout_secs: Option<u64>,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Data channel mode
///
/// Determines the reliability of message delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataChannelMode {
    /// Reliable, ordered delivery (default)
    #[default]
    Reliable,
    /// Unreliable, unordered delivery (low latency)
    Unreliable,
}

impl DataChannelMode {
    /// Get the ordered setting for the transport engine
    pub fn ordered(&self) -> bool {
        match self {
            DataChannelMode::Reliable => true,
            DataChannelMode::Unreliable => false,
        }
    }

    /// Get the max retransmits setting for the transport engine
    pub fn max_retransmits(&self) -> Option<u16> {
        match self {
            DataChannelMode::Reliable => None,      // Unlimited retransmits
            DataChannelMode::Unreliable => Some(0), // No retransmits
        }
    }
}

impl Default for PeerlinkConfig {
    fn default() -> Self {
        Self {
            signaling_url: "http://localhost:5000/signalrhub".to_string(),
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            turn_servers: Vec::new(),
            max_peers: 16,
            data_channel_label: "chat".to_string(),
            data_channel_mode: DataChannelMode::Reliable,
            media: MediaConstraints::default(),
            reconnect: ReconnectPolicy::default(),
            identity_timeout_ms: 10_000,
            path_discovery_timeout_secs: None,
        }
    }
}

impl PeerlinkConfig {
    /// Create a default configuration pointing at the given hub
    pub fn new(signaling_url: impl Into<String>) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            ..Default::default()
        }
    }

    /// Parse a configuration from TOML text; missing keys take defaults
    pub fn from_toml_str(text: &str) -> crate::Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| crate::Error::InvalidConfig(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not a ws/wss/http/https URL
    /// - `max_peers` is not in range 1-256
    /// - `data_channel_label` is empty
    /// - an ICE server URL has the wrong scheme
    /// - media dimensions or `identity_timeout_ms` are zero
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        const SCHEMES: [&str; 4] = ["ws://", "wss://", "http://", "https://"];
        if !SCHEMES.iter().any(|s| self.signaling_url.starts_with(s)) {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws://, wss://, http:// or https://, got {}",
                self.signaling_url
            )));
        }

        if self.max_peers == 0 || self.max_peers > 256 {
            return Err(Error::InvalidConfig(format!(
                "max_peers must be in range 1-256, got {}",
                self.max_peers
            )));
        }

        if self.data_channel_label.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "data_channel_label must not be empty".to_string(),
            ));
        }

        for url in &self.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server URL must start with stun: or stuns:, got {}",
                    url
                )));
            }
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN server URL must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
        }

        if self.media.video_width == 0 || self.media.video_height == 0 {
            return Err(Error::InvalidConfig(format!(
                "video dimensions must be non-zero, got {}x{}",
                self.media.video_width, self.media.video_height
            )));
        }

        if self.identity_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "identity_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.path_discovery_timeout_secs == Some(0) {
            return Err(Error::InvalidConfig(
                "path_discovery_timeout_secs must be greater than 0 when set".to_string(),
            ));
        }

        Ok(())
    }

    /// WebSocket URL for the hub, mapping http(s) to ws(s)
    ///
    /// The hub client skips HTTP negotiation and goes straight to the
    /// WebSocket transport, so an `http://` hub URL is dialled as `ws://`.
    pub fn signaling_ws_url(&self) -> String {
        if let Some(rest) = self.signaling_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.signaling_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.signaling_url.clone()
        }
    }

    /// Identity retrieval timeout as a Duration
    pub fn identity_timeout(&self) -> Duration {
        Duration::from_millis(self.identity_timeout_ms)
    }

    /// Path discovery timeout as a Duration, if bounded
    pub fn path_discovery_timeout(&self) -> Option<Duration> {
        self.path_discovery_timeout_secs.map(Duration::from_secs)
    }

    /// Preset for peers on the same network: host candidates only
    ///
    /// # Example
    ///
    /// ```
    /// use peerlink_core::config::PeerlinkConfig;
    ///
    /// let config = PeerlinkConfig::lan_only("ws://localhost:5000/signalrhub");
    /// assert!(config.stun_servers.is_empty());
    /// assert_eq!(config.path_discovery_timeout_secs, Some(15));
    /// ```
    pub fn lan_only(signaling_url: &str) -> Self {
        Self {
            signaling_url: signaling_url.to_string(),
            stun_servers: Vec::new(),
            turn_servers: Vec::new(),
            path_discovery_timeout_secs: Some(15),
            ..Default::default()
        }
    }

    /// Add TURN servers to this configuration
    ///
    /// # Example
    ///
    /// ```
    /// use peerlink_core::config::{PeerlinkConfig, TurnServerConfig};
    ///
    /// let config = PeerlinkConfig::default().with_turn_servers(vec![TurnServerConfig {
    ///     url: "turn:turn.example.com:3478".to_string(),
    ///     username: "user".to_string(),
    ///     credential: "pass".to_string(),
    /// }]);
    /// assert_eq!(config.turn_servers.len(), 1);
    /// ```
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }

    /// Replace the STUN server list
    pub fn with_stun_servers(mut self, stun_servers: Vec<String>) -> Self {
        self.stun_servers = stun_servers;
        self
    }

    /// Set the data channel mode
    pub fn with_data_channel_mode(mut self, mode: DataChannelMode) -> Self {
        self.data_channel_mode = mode;
        self
    }

    /// Bound path discovery to the given number of seconds
    pub fn with_path_discovery_timeout(mut self, secs: u64) -> Self {
        self.path_discovery_timeout_secs = Some(secs);
        self
    }

    /// Set the signaling reconnection schedule
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the maximum number of concurrent sessions
    pub fn with_max_peers(mut self, max_peers: u32) -> Self {
        self.max_peers = max_peers;
        self
    }
}
