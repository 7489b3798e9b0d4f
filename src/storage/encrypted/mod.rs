//! Encryption for private key material at rest
//!
//! Only the node's private key needs protection. Identities and envelopes
//! are public by construction.

pub mod cipher;

pub use cipher::{KeySealer, Sealed, SecretBytes, NONCE_LEN, SALT_LEN};
