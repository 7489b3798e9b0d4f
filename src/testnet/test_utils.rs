//! Test utilities for network testing

use crate::config::NetworkSettings;
use crate::error::Result;
use crate::identity::{Identity, NodeKeypair};
use crate::network::{bind_listener, ChannelHandler, Delivered, PeerNetwork};
use std::net::{SocketAddr, TcpListener};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// How long tests wait for anything asynchronous to happen
pub const WAIT: Duration = Duration::from_secs(5);

/// A listening network whose verified envelopes land in `inbox`
pub struct TestNode {
    pub network: PeerNetwork,
    pub keypair: NodeKeypair,
    pub addr: SocketAddr,
    pub inbox: Receiver<Delivered>,
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.network.shutdown();
    }
}

/// Create a temporary directory for key stores
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(tempfile::tempdir()?)
}

pub fn spawn_node() -> TestNode {
    spawn_node_with(NetworkSettings::default())
}

pub fn spawn_node_with(settings: NetworkSettings) -> TestNode {
    let listener = bind_listener("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (identity, keypair) = Identity::generate(addr).unwrap();
    let (handler, inbox) = ChannelHandler::new();

    let network = PeerNetwork::new(addr.to_string(), identity)
        .with_settings(settings)
        .with_handler(Arc::new(handler));
    network.adopt(listener).unwrap().spawn().unwrap();

    TestNode {
        network,
        keypair,
        addr,
        inbox,
    }
}

/// An address nothing listens on
pub fn closed_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

/// Poll `condition` every 10ms until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawned_nodes_get_distinct_ports() {
        let a = spawn_node();
        let b = spawn_node();
        assert_ne!(a.addr, b.addr);
        assert_eq!(a.network.identity().address(), a.addr);
        assert!(a.network.identity().verify_self_attestation());
    }

    #[test]
    fn test_closed_address_refuses() {
        let address = closed_address();
        assert!(std::net::TcpStream::connect(address).is_err());
    }

    #[test]
    fn test_wait_until_times_out() {
        assert!(!wait_until(Duration::from_millis(50), || false));
        let mut calls = 0;
        assert!(wait_until(WAIT, || {
            calls += 1;
            calls == 3
        }));
    }
}
