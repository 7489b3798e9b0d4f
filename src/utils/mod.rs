//! Utility functions and helpers
//!
//! Ed25519 primitives, hex helpers for logs and the wire format, and the
//! bincode layer used for on-disk records.

pub mod crypto;
pub mod hex_serde;
pub mod serialization;

pub use crypto::{
    ed25519_verify, hex_decode, hex_encode, new_key_pair, random_bytes, short_id,
};

pub use serialization::{from_bytes, to_bytes};
