//! Testnet helpers for networking tests
//!
//! Spins up throwaway nodes on ephemeral loopback ports so tests can run
//! in parallel without fighting over the default ports.

pub mod test_utils;

pub use test_utils::*;
