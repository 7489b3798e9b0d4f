use crate::error::{PeerError, Result};
use crate::node::RetryPolicy;
use crate::protocol::DEFAULT_MAX_FRAME_LEN;
use crate::relay::RelayMode;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 14000;
pub const DEFAULT_TOPIC: &str = "general";
pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_ECHO_SERVICE: &str = "icanhazip.com:80";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Ports of the local three-node test topology
const LOCAL_TOPOLOGY_PORTS: [u16; 3] = [14000, 14001, 14002];

pub const KEYSTORE_PASSPHRASE_ENV: &str = "PEERLINK_KEYSTORE_PASSPHRASE";

/// What a receive loop does after a frame fails to decode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeErrorPolicy {
    /// Drop the connection on the first corrupt frame
    #[default]
    Close,
    /// Report the frame and keep reading from the next line
    Skip,
}

impl FromStr for DecodeErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "close" => Ok(DecodeErrorPolicy::Close),
            "skip" => Ok(DecodeErrorPolicy::Skip),
            _ => Err(format!(
                "Invalid decode error policy: {s}. Valid options: close, skip"
            )),
        }
    }
}

impl fmt::Display for DecodeErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeErrorPolicy::Close => write!(f, "close"),
            DecodeErrorPolicy::Skip => write!(f, "skip"),
        }
    }
}

/// Per-network I/O settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSettings {
    pub connect_timeout: Duration,
    /// Deadline for one frame write. `None` waits for genuine completion,
    /// which lets a stalled peer hold a broadcast open indefinitely.
    pub write_timeout: Option<Duration>,
    pub max_frame_len: usize,
    pub decode_errors: DecodeErrorPolicy,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            decode_errors: DecodeErrorPolicy::default(),
        }
    }
}

/// Everything a node needs to start
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub port: u16,
    pub relay_port: Option<u16>,
    pub relay_mode: RelayMode,
    /// Advertise 127.0.0.1 instead of asking the echo service
    pub local: bool,
    pub peers: Vec<String>,
    pub topic: String,
    pub broadcast_interval: Duration,
    pub keystore_path: Option<PathBuf>,
    pub keystore_passphrase: Option<String>,
    pub echo_service: String,
    pub network: NetworkSettings,
    pub retry: RetryPolicy,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            relay_port: None,
            relay_mode: RelayMode::default(),
            local: false,
            peers: vec![],
            topic: DEFAULT_TOPIC.to_string(),
            broadcast_interval: DEFAULT_BROADCAST_INTERVAL,
            keystore_path: None,
            keystore_passphrase: None,
            echo_service: DEFAULT_ECHO_SERVICE.to_string(),
            network: NetworkSettings::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl NodeConfig {
    /// Pick up settings that only come from the environment
    pub fn with_env(mut self) -> Self {
        if let Ok(passphrase) = env::var(KEYSTORE_PASSPHRASE_ENV) {
            if !passphrase.is_empty() {
                self.keystore_passphrase = Some(passphrase);
            }
        }
        self
    }

    /// Overlay every field the file sets
    pub fn apply_file(&mut self, file: FileConfig) {
        if let Some(port) = file.port {
            self.port = port;
        }
        if file.relay_port.is_some() {
            self.relay_port = file.relay_port;
        }
        if let Some(mode) = file.relay_mode {
            self.relay_mode = mode;
        }
        if let Some(local) = file.local {
            self.local = local;
        }
        if let Some(peers) = file.peers {
            self.peers = peers;
        }
        if let Some(topic) = file.topic {
            self.topic = topic;
        }
        if let Some(secs) = file.delay_secs {
            self.broadcast_interval = Duration::from_secs(secs);
        }
        if file.keystore.is_some() {
            self.keystore_path = file.keystore;
        }
        if let Some(echo) = file.echo_service {
            self.echo_service = echo;
        }
        if let Some(ms) = file.connect_timeout_ms {
            self.network.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.write_timeout_ms {
            self.network.write_timeout = write_timeout_from_millis(ms);
        }
        if let Some(len) = file.max_frame_len {
            self.network.max_frame_len = len;
        }
        if let Some(policy) = file.decode_errors {
            self.network.decode_errors = policy;
        }
    }

    /// Peers to dial at startup. Without explicit peers this is the local
    /// test topology minus our own port.
    pub fn initial_peers(&self) -> Vec<String> {
        if !self.peers.is_empty() {
            return self.peers.clone();
        }
        LOCAL_TOPOLOGY_PORTS
            .iter()
            .filter(|port| **port != self.port)
            .map(|port| format!("127.0.0.1:{port}"))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.port != 0 && self.relay_port == Some(self.port) {
            return Err(PeerError::Config(format!(
                "Relay port {} must differ from the listening port",
                self.port
            )));
        }
        if self.broadcast_interval.is_zero() {
            return Err(PeerError::Config(
                "Broadcast interval must be positive".to_string(),
            ));
        }
        if self.network.connect_timeout.is_zero() {
            return Err(PeerError::Config(
                "Connect timeout must be positive".to_string(),
            ));
        }
        if self.network.max_frame_len == 0 {
            return Err(PeerError::Config(
                "Maximum frame length must be positive".to_string(),
            ));
        }
        if self.topic.is_empty() {
            return Err(PeerError::Config("Topic must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Zero disables the write deadline
pub fn write_timeout_from_millis(ms: u64) -> Option<Duration> {
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}

/// Optional settings read from a TOML file
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub relay_port: Option<u16>,
    pub relay_mode: Option<RelayMode>,
    pub local: Option<bool>,
    pub peers: Option<Vec<String>>,
    pub topic: Option<String>,
    pub delay_secs: Option<u64>,
    pub keystore: Option<PathBuf>,
    pub echo_service: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub write_timeout_ms: Option<u64>,
    pub max_frame_len: Option<usize>,
    pub decode_errors: Option<DecodeErrorPolicy>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<FileConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            PeerError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<FileConfig> {
        toml::from_str(contents).map_err(|e| PeerError::Config(format!("Invalid config: {e}")))
    }
}
