//! Relay service: a second reachability path for the node.
//!
//! The two modes carry different trust guarantees and are never
//! interchangeable:
//!
//! - `Signed`: a second `PeerNetwork` on the relay address sharing the
//!   primary's connection table. Everything arriving there is verified
//!   exactly like on the primary address, and verified envelopes are
//!   forwarded (one hop, stamped with the relay identity) so peers on
//!   either address can talk to each other.
//! - `TransparentProxy`: a raw byte pipe back to the connecting peer's
//!   own address. No framing, no signatures, no verification.

pub mod proxy;

use crate::error::{PeerError, Result};
use crate::identity::Identity;
use crate::network::PeerNetwork;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{SocketAddr, TcpListener};
use std::str::FromStr;
use std::sync::Arc;

pub use proxy::{splice, ProxyRelay};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayMode {
    #[default]
    #[serde(rename = "signed")]
    Signed,
    #[serde(rename = "proxy")]
    TransparentProxy,
}

impl FromStr for RelayMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "signed" => Ok(RelayMode::Signed),
            "proxy" | "transparent-proxy" => Ok(RelayMode::TransparentProxy),
            other => Err(format!(
                "unknown relay mode '{other}' (expected 'signed' or 'proxy')"
            )),
        }
    }
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayMode::Signed => write!(f, "signed"),
            RelayMode::TransparentProxy => write!(f, "proxy"),
        }
    }
}

/// A running relay
pub enum RelayService {
    Signed(PeerNetwork),
    TransparentProxy(ProxyRelay),
}

impl RelayService {
    /// Serve the relay on an already bound listener.
    ///
    /// A signed relay shares the primary's connection table, handler and
    /// counters.
    ///
    /// For `Signed` the primary network should carry the same relay
    /// identity (`PeerNetwork::with_relay_identity`) so envelopes arriving
    /// on the primary address are forwarded to relay peers too.
    pub fn start(
        mode: RelayMode,
        primary: &PeerNetwork,
        listener: TcpListener,
        relay_identity: Identity,
    ) -> Result<RelayService> {
        match mode {
            RelayMode::Signed => {
                let local_addr = listener.local_addr()?;
                if primary.relay_identity().is_none() {
                    warn!("Primary network does not forward to relay peers");
                }
                let network = PeerNetwork::new(local_addr.to_string(), relay_identity.clone())
                    .with_settings(primary.settings().clone())
                    .with_handler(primary.handler())
                    .with_connections(Arc::clone(primary.connections()))
                    .with_stats(Arc::clone(primary.stats_handle()))
                    .with_relay_identity(relay_identity);
                network.adopt(listener)?.spawn()?;
                info!("Signed relay listening on {local_addr}");
                Ok(RelayService::Signed(network))
            }
            RelayMode::TransparentProxy => {
                let relay = ProxyRelay::start(listener, primary.settings().connect_timeout)?;
                Ok(RelayService::TransparentProxy(relay))
            }
        }
    }

    pub fn mode(&self) -> RelayMode {
        match self {
            RelayService::Signed(_) => RelayMode::Signed,
            RelayService::TransparentProxy(_) => RelayMode::TransparentProxy,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        match self {
            RelayService::Signed(network) => network
                .local_addr()
                .ok_or_else(|| PeerError::Network("Relay listener is not bound".to_string())),
            RelayService::TransparentProxy(relay) => Ok(relay.local_addr()),
        }
    }

    pub fn shutdown(&self) {
        match self {
            RelayService::Signed(network) => network.shutdown(),
            RelayService::TransparentProxy(relay) => relay.shutdown(),
        }
    }
}
