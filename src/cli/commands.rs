use crate::config::{write_timeout_from_millis, DecodeErrorPolicy, FileConfig, NodeConfig};
use crate::error::Result;
use crate::relay::RelayMode;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "peerlink",
    about = "A peer-to-peer node that broadcasts signed messages to its peers"
)]
pub struct Opt {
    #[arg(long, help = "Port to listen on [default: 14000]")]
    pub port: Option<u16>,
    #[arg(
        long = "enable-relay",
        value_name = "PORT",
        help = "Also accept connections on this relay port"
    )]
    pub relay_port: Option<u16>,
    #[arg(
        long = "relay-mode",
        value_name = "MODE",
        help = "Relay behaviour: signed | proxy [default: signed]"
    )]
    pub relay_mode: Option<RelayMode>,
    #[arg(long, help = "Advertise 127.0.0.1 instead of the external address")]
    pub local: bool,
    #[arg(
        long = "peer",
        value_name = "ADDR",
        help = "Peer to connect to (repeatable) [default: local test topology]"
    )]
    pub peers: Vec<String>,
    #[arg(
        long = "delay-secs",
        value_name = "SECS",
        help = "Seconds between broadcasts [default: 5]"
    )]
    pub delay_secs: Option<u64>,
    #[arg(long, help = "Topic for broadcast messages [default: general]")]
    pub topic: Option<String>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Load the node key from this file, creating it if missing"
    )]
    pub keystore: Option<PathBuf>,
    #[arg(long, value_name = "FILE", help = "TOML file with node settings")]
    pub config: Option<PathBuf>,
    #[arg(
        long = "write-timeout-ms",
        value_name = "MS",
        help = "Per-peer write deadline, 0 waits forever [default: 5000]"
    )]
    pub write_timeout_ms: Option<u64>,
    #[arg(
        long = "decode-errors",
        value_name = "POLICY",
        help = "What to do after a corrupt frame: close | skip [default: close]"
    )]
    pub decode_errors: Option<DecodeErrorPolicy>,
}

impl Opt {
    /// Defaults, then the config file, then flags
    pub fn into_config(self) -> Result<NodeConfig> {
        let mut config = NodeConfig::default().with_env();
        if let Some(path) = &self.config {
            config.apply_file(FileConfig::load(path)?);
        }

        if let Some(port) = self.port {
            config.port = port;
        }
        if self.relay_port.is_some() {
            config.relay_port = self.relay_port;
        }
        if let Some(mode) = self.relay_mode {
            config.relay_mode = mode;
        }
        if self.local {
            config.local = true;
        }
        if !self.peers.is_empty() {
            config.peers = self.peers;
        }
        if let Some(secs) = self.delay_secs {
            config.broadcast_interval = Duration::from_secs(secs);
        }
        if let Some(topic) = self.topic {
            config.topic = topic;
        }
        if self.keystore.is_some() {
            config.keystore_path = self.keystore;
        }
        if let Some(ms) = self.write_timeout_ms {
            config.network.write_timeout = write_timeout_from_millis(ms);
        }
        if let Some(policy) = self.decode_errors {
            config.network.decode_errors = policy;
        }

        config.validate()?;
        Ok(config)
    }
}
