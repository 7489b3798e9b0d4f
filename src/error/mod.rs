//! Error handling for the peer node
//!
//! Fatal setup failures (key generation, bind) and per-operation failures
//! (connect, decode, write) share one error type. Callers decide which
//! ones stop the node and which ones are logged and dropped.

use std::fmt;

/// Result type alias for peer node operations
pub type Result<T> = std::result::Result<T, PeerError>;

/// Error types for identity, protocol and network operations
#[derive(Debug, Clone)]
pub enum PeerError {
    /// Key generation, signing or key parsing failures
    Crypto(String),
    /// Connection establishment and transmission errors
    Network(String),
    /// Listener could not bind its address
    Bind(String),
    /// Envelope encoding/decoding errors (corrupt or oversized frames)
    Serialization(String),
    /// Stream and file I/O errors
    Io(String),
    /// A node record whose self-attestation does not verify
    InvalidIdentity(String),
    /// Key store read/write errors
    Keystore(String),
    /// Encryption/decryption errors
    Encryption(String),
    /// Configuration errors
    Config(String),
    /// External address lookup failed
    AddressResolution(String),
}

impl fmt::Display for PeerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            PeerError::Network(msg) => write!(f, "Network error: {msg}"),
            PeerError::Bind(msg) => write!(f, "Bind error: {msg}"),
            PeerError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            PeerError::Io(msg) => write!(f, "I/O error: {msg}"),
            PeerError::InvalidIdentity(msg) => write!(f, "Invalid identity: {msg}"),
            PeerError::Keystore(msg) => write!(f, "Key store error: {msg}"),
            PeerError::Encryption(msg) => write!(f, "Encryption error: {msg}"),
            PeerError::Config(msg) => write!(f, "Configuration error: {msg}"),
            PeerError::AddressResolution(msg) => write!(f, "Address resolution error: {msg}"),
        }
    }
}

impl std::error::Error for PeerError {}

impl PeerError {
    /// Whether a read loop can keep going after this error.
    ///
    /// Only framing/decoding problems are recoverable; the stream itself is
    /// still usable and the next frame starts after the next newline.
    pub fn is_recoverable_decode(&self) -> bool {
        matches!(self, PeerError::Serialization(_))
    }
}

impl From<std::io::Error> for PeerError {
    fn from(err: std::io::Error) -> Self {
        PeerError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PeerError {
    fn from(err: serde_json::Error) -> Self {
        PeerError::Serialization(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for PeerError {
    fn from(err: bincode::error::EncodeError) -> Self {
        PeerError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for PeerError {
    fn from(err: bincode::error::DecodeError) -> Self {
        PeerError::Serialization(err.to_string())
    }
}
