//! Network integration tests
//!
//! Real nodes on loopback ports, driven only through the public API.

use peerlink::network::bind_listener;
use peerlink::protocol::EnvelopeWriter;
use peerlink::{
    ChannelHandler, Delivered, Envelope, Identity, LoopbackResolver, NetworkSettings, Node,
    NodeConfig, NodeKeypair, PeerNetwork, RelayMode, RetryPolicy,
};
use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

struct Peer {
    network: PeerNetwork,
    keypair: NodeKeypair,
    addr: SocketAddr,
    inbox: Receiver<Delivered>,
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.network.shutdown();
    }
}

fn spawn_peer(settings: NetworkSettings) -> Peer {
    let listener = bind_listener("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (identity, keypair) = Identity::generate(addr).unwrap();
    let (handler, inbox) = ChannelHandler::new();
    let network = PeerNetwork::new(addr.to_string(), identity)
        .with_settings(settings)
        .with_handler(Arc::new(handler));
    network.adopt(listener).unwrap().spawn().unwrap();
    Peer {
        network,
        keypair,
        addr,
        inbox,
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn closed_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

fn local_node_config(peers: Vec<String>) -> NodeConfig {
    NodeConfig {
        port: 0,
        local: true,
        peers,
        broadcast_interval: Duration::from_secs(60),
        retry: RetryPolicy {
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(500),
            ..RetryPolicy::default()
        },
        ..NodeConfig::default()
    }
}

#[test]
fn test_broadcast_reaches_every_connected_peer() {
    let a = spawn_peer(NetworkSettings::default());
    let b = spawn_peer(NetworkSettings::default());
    let c = spawn_peer(NetworkSettings::default());

    a.network.connect(&b.addr.to_string()).unwrap();
    a.network.connect(&c.addr.to_string()).unwrap();

    let report = a.network.broadcast("general", b"hi", &a.keypair).unwrap();
    assert_eq!(report.delivered.len(), 2);
    assert!(report.all_delivered());

    for peer in [&b, &c] {
        let delivered = peer.inbox.recv_timeout(WAIT).unwrap();
        assert!(delivered.envelope.verify());
        assert_eq!(delivered.envelope.topic, "general");
        assert_eq!(delivered.envelope.content, b"hi");
        assert_eq!(
            delivered.envelope.from.as_ref().unwrap().public_key(),
            a.keypair.public_key()
        );
        assert!(delivered.envelope.relay.is_none());
    }
}

#[test]
fn test_broadcast_completes_with_unresponsive_and_closed_peers() {
    let a = spawn_peer(NetworkSettings::default());
    let b = spawn_peer(NetworkSettings::default());
    a.network.connect(&b.addr.to_string()).unwrap();

    // Two peers that accept and never read, one that hangs up at once
    let mut silent = Vec::new();
    for _ in 0..2 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        a.network
            .connect(&listener.local_addr().unwrap().to_string())
            .unwrap();
        let (stream, _) = listener.accept().unwrap();
        silent.push((listener, stream));
    }
    let hangup = TcpListener::bind("127.0.0.1:0").unwrap();
    a.network
        .connect(&hangup.local_addr().unwrap().to_string())
        .unwrap();
    drop(hangup.accept().unwrap());
    drop(hangup);

    let started = Instant::now();
    let report = a.network.broadcast("general", b"still here", &a.keypair).unwrap();
    assert!(started.elapsed() < WAIT);
    assert!(report.delivered.contains(&b.addr.to_string()));

    let delivered = b.inbox.recv_timeout(WAIT).unwrap();
    assert_eq!(delivered.envelope.content, b"still here");

    // The closed peer drops out of the table once its receive loop notices
    assert!(wait_until(WAIT, || a.network.connections().len() == 3));
}

#[test]
fn test_write_deadline_bounds_a_stalled_peer() {
    let a = spawn_peer(NetworkSettings {
        write_timeout: Some(Duration::from_millis(200)),
        ..NetworkSettings::default()
    });
    let b = spawn_peer(NetworkSettings {
        max_frame_len: 64 * 1024 * 1024,
        ..NetworkSettings::default()
    });
    a.network.connect(&b.addr.to_string()).unwrap();

    let stalled = TcpListener::bind("127.0.0.1:0").unwrap();
    let stalled_addr = stalled.local_addr().unwrap().to_string();
    a.network.connect(&stalled_addr).unwrap();
    let (_never_read, _) = stalled.accept().unwrap();

    // Far more than the kernel buffers on both ends can hold
    let content = vec![0x5a; 16 * 1024 * 1024];
    let started = Instant::now();
    let report = a.network.broadcast("bulk", &content, &a.keypair).unwrap();

    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, stalled_addr);
    assert_eq!(report.delivered, vec![b.addr.to_string()]);

    let delivered = b.inbox.recv_timeout(Duration::from_secs(30)).unwrap();
    assert_eq!(delivered.envelope.content.len(), content.len());

    // Part of a frame may already be on the stalled wire, so the link is
    // never written to again
    let next = a.network.broadcast("bulk", b"next", &a.keypair).unwrap();
    assert_eq!(next.delivered, vec![b.addr.to_string()]);
    assert!(wait_until(WAIT, || !a.network.connections().contains(&stalled_addr)));
    assert_eq!(b.inbox.recv_timeout(WAIT).unwrap().envelope.content, b"next");
}

#[test]
fn test_tampered_envelope_is_not_delivered() {
    let node = spawn_peer(NetworkSettings::default());
    let (sender, key) = Identity::generate(node.addr).unwrap();

    let mut tampered = Envelope::sign("general", b"pay 10", &sender, &key);
    tampered.content = b"pay 99".to_vec();

    let mut writer = EnvelopeWriter::new(TcpStream::connect(node.addr).unwrap());
    writer.write(&tampered).unwrap();
    writer
        .write(&Envelope::sign("general", b"after", &sender, &key))
        .unwrap();

    let delivered = node.inbox.recv_timeout(WAIT).unwrap();
    assert_eq!(delivered.envelope.content, b"after");
    assert_eq!(node.network.stats().invalid_signatures, 1);
}

#[test]
fn test_peer_shutdown_removes_entry() {
    let a = spawn_peer(NetworkSettings::default());
    let b = spawn_peer(NetworkSettings::default());
    b.network.connect(&a.addr.to_string()).unwrap();
    assert!(wait_until(WAIT, || a.network.connections().len() == 1));

    b.network.shutdown();
    assert!(wait_until(WAIT, || a.network.connections().is_empty()));
    assert!(wait_until(WAIT, || a.network.stats().closed == 1));
}

#[test]
fn test_signed_relay_joins_both_addresses() {
    let mut config = local_node_config(vec![closed_address()]);
    config.relay_port = Some(0);
    let (handler, node_inbox) = ChannelHandler::new();
    let node = Node::start_with(config, &LoopbackResolver, Arc::new(handler)).unwrap();

    let primary = format!("127.0.0.1:{}", node.local_addr().unwrap().port());
    let relay = format!(
        "127.0.0.1:{}",
        node.relay().unwrap().local_addr().unwrap().port()
    );

    let direct = spawn_peer(NetworkSettings::default());
    let via_relay = spawn_peer(NetworkSettings::default());
    direct.network.connect(&primary).unwrap();
    via_relay.network.connect(&relay).unwrap();
    assert!(wait_until(WAIT, || node.network().connections().len() == 2));

    via_relay
        .network
        .broadcast("general", b"relay to primary", &via_relay.keypair)
        .unwrap();
    let got = direct.inbox.recv_timeout(WAIT).unwrap();
    assert!(got.envelope.verify());
    assert_eq!(got.envelope.content, b"relay to primary");
    assert_eq!(
        got.envelope.from.as_ref().unwrap().public_key(),
        via_relay.keypair.public_key()
    );
    assert_eq!(
        got.envelope.relay.as_ref().unwrap().public_key(),
        node.public_key()
    );
    assert_eq!(
        node_inbox.recv_timeout(WAIT).unwrap().envelope.content,
        b"relay to primary"
    );

    direct
        .network
        .broadcast("general", b"primary to relay", &direct.keypair)
        .unwrap();
    let got = via_relay.inbox.recv_timeout(WAIT).unwrap();
    assert_eq!(got.envelope.content, b"primary to relay");

    node.shutdown();
    node.run();
}

#[test]
fn test_proxy_relay_closes_when_dial_back_fails() {
    let mut config = local_node_config(vec![closed_address()]);
    config.relay_port = Some(0);
    config.relay_mode = RelayMode::TransparentProxy;
    let node = Node::start_with(config, &LoopbackResolver, Arc::new(ChannelHandler::new().0))
        .unwrap();
    let relay = node.relay().unwrap();
    assert_eq!(relay.mode(), RelayMode::TransparentProxy);

    let mut client = TcpStream::connect(relay.local_addr().unwrap()).unwrap();
    client.set_read_timeout(Some(WAIT)).unwrap();
    let mut buf = [0u8; 8];
    match client.read(&mut buf) {
        Ok(n) => assert_eq!(n, 0),
        Err(e) => assert!(!matches!(
            e.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        )),
    }

    node.shutdown();
    node.run();
}
