//! Persistent key storage
//!
//! The only state a node keeps on disk is its signing key, so its identity
//! survives restarts. Everything else lives in memory for the process
//! lifetime.

pub mod encrypted;
pub mod keystore;

pub use encrypted::{KeySealer, SecretBytes};
pub use keystore::KeyStore;
