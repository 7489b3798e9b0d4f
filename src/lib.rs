//! # Peerlink - a minimal signed peer-to-peer node
//!
//! Every node owns an Ed25519 identity that signs its own public key
//! (a self-attestation bound to the address it claims). Nodes hold
//! long-lived bidirectional TCP links to their peers and broadcast signed
//! envelopes to all of them at once. Nothing reaches the application until
//! its signature checks out.
//!
//! ## Layout
//! - `identity/`: key pairs and self-attested node identities
//! - `protocol/`: the signed `Envelope` and its newline-delimited JSON codec
//! - `network/`: connection table, listener, connect, broadcast, receive loops
//! - `relay/`: the signed relay and the transparent proxy relay
//! - `node/`: startup wiring, reconnect supervision and the broadcast timer
//! - `storage/`: the on-disk (optionally encrypted) key store
//! - `config/`: defaults, TOML file and flag layering
//! - `cli/`: command-line flags
//! - `utils/`: crypto and serialization helpers
//!
//! ## Where to start
//! 1. `network/peer_network.rs` for listen / connect / broadcast
//! 2. `network/receive.rs` for what happens to every incoming frame
//! 3. `protocol/envelope.rs` for what gets signed and verified
//! 4. `relay/mod.rs` for the two relay trust models

pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod network;
pub mod node;
pub mod protocol;
pub mod relay;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub mod testnet;

pub use cli::Opt;
pub use config::{DecodeErrorPolicy, NetworkSettings, NodeConfig};
pub use error::{PeerError, Result};
pub use identity::{Identity, NodeKeypair};
pub use network::{
    AddressResolver, BroadcastReport, ChannelHandler, ConnectionTable, Delivered,
    EchoServiceResolver, LogHandler, LoopbackResolver, MessageHandler, PeerNetwork,
};
pub use node::{Node, RetryPolicy};
pub use protocol::{Envelope, EnvelopeReader, EnvelopeWriter};
pub use relay::{RelayMode, RelayService};
pub use storage::KeyStore;
