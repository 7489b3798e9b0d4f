//! Node identity
//!
//! A node is identified by its Ed25519 public key. The `Identity` record
//! binds that key to a claimed network address with a self-signature, and
//! `NodeKeypair` holds the private half used to sign envelopes.

pub mod keypair;
pub mod node;

pub use keypair::NodeKeypair;
pub use node::Identity;
