//! Command-line interface
//!
//! Flag parsing for the node binary. Flags are layered over the config
//! file and the built-in defaults.

pub mod commands;

pub use commands::Opt;
