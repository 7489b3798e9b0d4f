//! Node driver
//!
//! Wires configuration, identity, the primary network and the optional
//! relay together, then keeps peers connected and broadcasts on a timer.
//! Retry lives here, on top of the single-shot `connect`/`broadcast`.

pub mod retry;
pub mod runtime;

pub use retry::RetryPolicy;
pub use runtime::Node;
