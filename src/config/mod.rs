//! Configuration management
//!
//! Defaults, an optional TOML file and command-line flags are layered into
//! one `NodeConfig`. The core only sees plain values from it.

pub mod settings;

pub use settings::{
    write_timeout_from_millis, DecodeErrorPolicy, FileConfig, NetworkSettings, NodeConfig,
    DEFAULT_PORT, DEFAULT_TOPIC, KEYSTORE_PASSPHRASE_ENV,
};
