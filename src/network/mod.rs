//! Peer-to-peer networking
//!
//! Each node runs one `PeerNetwork` per role: the listener accepts
//! inbound links, `connect` opens outbound ones, and both kinds land in a
//! shared connection table with their own receive loop. `broadcast` signs
//! one envelope and writes it to every link in parallel.

pub mod address;
pub mod connection_table;
pub mod handler;
pub mod peer_network;
mod receive;
pub mod stats;

pub use address::{parse_echo_response, AddressResolver, EchoServiceResolver, LoopbackResolver};
pub use connection_table::{ConnectionTable, Direction, PeerLink};
pub use handler::{ChannelHandler, Delivered, LogHandler, MessageHandler};
pub use peer_network::{bind_listener, BroadcastReport, Listener, PeerNetwork};
pub use stats::{NetworkStats, StatsSnapshot};
