use crate::config::NetworkSettings;
use crate::error::{PeerError, Result};
use crate::identity::{Identity, NodeKeypair};
use crate::network::connection_table::{ConnectionTable, Direction, PeerLink};
use crate::network::handler::{LogHandler, MessageHandler};
use crate::network::receive;
use crate::network::stats::{NetworkStats, StatsSnapshot};
use crate::protocol::{encode_frame, Envelope};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Pause after a failed accept so a persistent error (e.g. out of file
/// descriptors) does not spin the listener
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);
const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of one fan-out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers whose write completed
    pub delivered: Vec<String>,
    /// Peers whose write failed, with the error text
    pub failed: Vec<(String, String)>,
}

impl BroadcastReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Bind a TCP listener. Failure here is fatal for the network using it.
pub fn bind_listener(address: &str) -> Result<TcpListener> {
    TcpListener::bind(address)
        .map_err(|e| PeerError::Bind(format!("Failed to bind to {address}: {e}")))
}

/// Unblock a listener stuck in `accept` by connecting to it once
pub(crate) fn wake_listener(bound: SocketAddr) {
    let target = match bound.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), bound.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), bound.port())
        }
        _ => bound,
    };
    let _ = TcpStream::connect_timeout(&target, WAKE_TIMEOUT);
}

/// A node's runtime for one network role (primary or relay).
///
/// Cloning is cheap and every clone drives the same connection table,
/// statistics and shutdown flag.
#[derive(Clone)]
pub struct PeerNetwork {
    listen_address: String,
    identity: Identity,
    connections: Arc<ConnectionTable>,
    settings: NetworkSettings,
    handler: Arc<dyn MessageHandler>,
    stats: Arc<NetworkStats>,
    relay_identity: Option<Identity>,
    shutdown: Arc<AtomicBool>,
    bound_addr: Arc<Mutex<Option<SocketAddr>>>,
}

impl PeerNetwork {
    pub fn new(listen_address: impl Into<String>, identity: Identity) -> Self {
        Self {
            listen_address: listen_address.into(),
            identity,
            connections: Arc::new(ConnectionTable::new()),
            settings: NetworkSettings::default(),
            handler: Arc::new(LogHandler),
            stats: Arc::new(NetworkStats::new()),
            relay_identity: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            bound_addr: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_settings(mut self, settings: NetworkSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Share an existing connection table (used by the signed relay)
    pub fn with_connections(mut self, connections: Arc<ConnectionTable>) -> Self {
        self.connections = connections;
        self
    }

    /// Share existing counters (used by the signed relay)
    pub fn with_stats(mut self, stats: Arc<NetworkStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Forward every verified, not yet relayed envelope to all other
    /// connections, stamped with this relay identity
    pub fn with_relay_identity(mut self, relay_identity: Identity) -> Self {
        self.relay_identity = Some(relay_identity);
        self
    }

    pub fn listen_address(&self) -> &str {
        &self.listen_address
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn relay_identity(&self) -> Option<&Identity> {
        self.relay_identity.as_ref()
    }

    pub fn connections(&self) -> &Arc<ConnectionTable> {
        &self.connections
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    pub fn handler(&self) -> Arc<dyn MessageHandler> {
        Arc::clone(&self.handler)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn stats_handle(&self) -> &Arc<NetworkStats> {
        &self.stats
    }

    /// Address the listener actually bound, once `bind`/`adopt` ran
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Bind the configured listen address
    pub fn bind(&self) -> Result<Listener> {
        self.adopt(bind_listener(&self.listen_address)?)
    }

    /// Serve connections on an already bound listener
    pub fn adopt(&self, listener: TcpListener) -> Result<Listener> {
        let local_addr = listener.local_addr()?;
        *self.bound_addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(local_addr);
        Ok(Listener {
            listener,
            local_addr,
            network: self.clone(),
        })
    }

    /// Bind and accept connections until shutdown. Only a bind failure is
    /// returned; accept errors are logged and the loop keeps going.
    pub fn listen(&self) -> Result<()> {
        self.bind()?.run();
        Ok(())
    }

    /// Open an outbound link and register it under `address`.
    ///
    /// A failure leaves the table untouched. Retrying is up to the caller.
    pub fn connect(&self, address: &str) -> Result<()> {
        let stream = match self.dial(address) {
            Ok(stream) => stream,
            Err(e) => {
                self.stats.record_connect_failure();
                return Err(e);
            }
        };

        self.register(address.to_string(), stream, Direction::Outbound)?;
        self.stats.record_connected();
        info!("Connected to peer {address}");
        Ok(())
    }

    fn dial(&self, address: &str) -> Result<TcpStream> {
        let addrs = address
            .to_socket_addrs()
            .map_err(|e| PeerError::Network(format!("Invalid address {address}: {e}")))?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.settings.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }
        Err(PeerError::Network(match last_error {
            Some(e) => format!("Failed to connect to {address}: {e}"),
            None => format!("{address} resolved to no addresses"),
        }))
    }

    /// Sign one envelope and send it to every current connection at once.
    ///
    /// Returns after every write has finished or failed. A failing peer
    /// neither stops the other writes nor leaves the table here; its receive
    /// loop removes it once the socket is seen closed.
    pub fn broadcast(
        &self,
        topic: &str,
        content: &[u8],
        keypair: &NodeKeypair,
    ) -> Result<BroadcastReport> {
        let envelope = Envelope::sign(topic, content, &self.identity, keypair);
        let frame = encode_frame(&envelope)?;
        self.stats.record_broadcast();

        let report = self.fan_out(&frame, None);
        debug!(
            "Broadcast on {topic:?} reached {}/{} peers",
            report.delivered.len(),
            report.attempted()
        );
        Ok(report)
    }

    /// Write `frame` to every link except `exclude` and its outbound twin.
    ///
    /// Two nodes that dial each other hold two links for the same pair. An
    /// inbound link whose peer announced an address we also hold an
    /// outbound link to is left out, so each peer gets one copy.
    fn fan_out(&self, frame: &[u8], exclude: Option<&PeerLink>) -> BroadcastReport {
        let snapshot = self.connections.snapshot();
        let outbound: HashSet<SocketAddr> = snapshot
            .iter()
            .filter(|(_, link)| link.direction() == Direction::Outbound && !link.is_broken())
            .filter_map(|(address, _)| address.parse().ok())
            .collect();
        let excluded_twin = exclude.and_then(PeerLink::announced);

        let links: Vec<Arc<PeerLink>> = snapshot
            .into_iter()
            .filter(|(address, _)| {
                exclude.map_or(true, |source| source.address() != address.as_str())
            })
            .filter(|(address, link)| {
                let twin = link.direction() == Direction::Outbound
                    && excluded_twin.is_some()
                    && address.parse::<SocketAddr>().ok() == excluded_twin;
                !twin
            })
            .filter(|(_, link)| {
                link.direction() != Direction::Inbound
                    || !link.announced().is_some_and(|addr| outbound.contains(&addr))
            })
            .map(|(_, link)| link)
            .collect();

        let outcomes: Vec<(String, Result<()>)> = thread::scope(|scope| {
            let pending: Vec<_> = links
                .iter()
                .map(|link| {
                    let spawned = thread::Builder::new()
                        .name(format!("send-{}", link.address()))
                        .spawn_scoped(scope, move || link.send_frame(frame));
                    (link, spawned)
                })
                .collect();

            pending
                .into_iter()
                .map(|(link, spawned)| {
                    let outcome = match spawned {
                        Ok(handle) => handle.join().unwrap_or_else(|_| {
                            Err(PeerError::Network(format!(
                                "Send thread for {} panicked",
                                link.address()
                            )))
                        }),
                        Err(e) => Err(PeerError::Network(format!(
                            "Failed to start send thread for {}: {e}",
                            link.address()
                        ))),
                    };
                    (link.address().to_string(), outcome)
                })
                .collect()
        });

        let mut report = BroadcastReport::default();
        for (address, outcome) in outcomes {
            match outcome {
                Ok(()) => report.delivered.push(address),
                Err(e) => {
                    warn!("{e}");
                    report.failed.push((address, e.to_string()));
                }
            }
        }
        self.stats
            .record_sends(report.delivered.len(), report.failed.len());
        report
    }

    /// Verify and deliver one decoded envelope. Invalid ones stop here.
    pub(crate) fn handle_envelope(&self, envelope: Envelope, link: &PeerLink) {
        let peer = link.address();
        self.stats.record_received();

        if !envelope.verify() {
            self.stats.record_invalid_signature();
            warn!(
                "Invalid message signature from {peer} (topic {:?})",
                envelope.topic
            );
            return;
        }

        if link.direction() == Direction::Inbound && !envelope.is_relayed() {
            if let Some(sender) = envelope.sender() {
                link.announce(sender.address());
            }
        }

        self.stats.record_delivered();
        self.handler.on_message(&envelope, peer);

        if let Some(relay) = &self.relay_identity {
            if !envelope.is_relayed() {
                self.forward(&envelope.relayed_by(relay), link);
            }
        }
    }

    fn forward(&self, envelope: &Envelope, source: &PeerLink) {
        let frame = match encode_frame(envelope) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode relayed envelope: {e}");
                return;
            }
        };
        let report = self.fan_out(&frame, Some(source));
        self.stats.record_forwarded(report.delivered.len());
        debug!(
            "Relayed envelope from {} to {} peers",
            source.address(),
            report.delivered.len()
        );
    }

    fn accept(&self, stream: TcpStream) {
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Failed to get peer address: {e}");
                return;
            }
        };

        self.stats.record_accepted();
        info!("Accepted connection from {peer_addr}");

        if let Err(e) = self.register(peer_addr.to_string(), stream, Direction::Inbound) {
            warn!("Dropping connection from {peer_addr}: {e}");
        }
    }

    /// Put a fresh stream in the table and start its receive loop
    fn register(
        &self,
        address: String,
        stream: TcpStream,
        direction: Direction,
    ) -> Result<Arc<PeerLink>> {
        if self.is_shut_down() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            return Err(PeerError::Network("Network is shutting down".to_string()));
        }

        stream.set_write_timeout(self.settings.write_timeout)?;
        let _ = stream.set_nodelay(true);
        let reader = stream.try_clone()?;
        let link = Arc::new(PeerLink::new(address.clone(), stream, direction)?);

        if let Some(previous) = self.connections.put(address.clone(), Arc::clone(&link)) {
            debug!("Replacing existing link to {address}");
            previous.close();
        }

        let network = self.clone();
        let loop_link = Arc::clone(&link);
        let spawned = thread::Builder::new()
            .name(format!("recv-{address}"))
            .spawn(move || receive::run(network, loop_link, reader));

        if let Err(e) = spawned {
            self.connections.remove_if_same(&address, &link);
            link.close();
            return Err(PeerError::Network(format!(
                "Failed to start receive loop for {address}: {e}"
            )));
        }
        Ok(link)
    }

    /// Called by a receive loop when its stream is done
    pub(crate) fn release(&self, link: &Arc<PeerLink>) {
        link.close();
        if self.connections.remove_if_same(link.address(), link) {
            debug!("Removed {} link {}", link.direction(), link.address());
        }
        self.stats.record_closed();
    }

    /// Stop accepting, close every registered link and wake the listener.
    ///
    /// Links are closed through the table, so a table shared with a relay
    /// network loses the relay's links too.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down network on {}", self.listen_address);

        self.connections.for_each(|_, link| link.close());
        if let Some(bound) = self.local_addr() {
            wake_listener(bound);
        }
    }
}

/// A bound listener that hands every accepted stream to its network
pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
    network: PeerNetwork,
}

impl Listener {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept until the network shuts down
    pub fn run(self) {
        info!(
            "Listening on {} as {}",
            self.local_addr,
            self.network.identity()
        );

        for stream in self.listener.incoming() {
            if self.network.is_shut_down() {
                break;
            }
            match stream {
                Ok(stream) => self.network.accept(stream),
                Err(e) => {
                    error!("Error accepting connection: {e}");
                    thread::sleep(ACCEPT_ERROR_BACKOFF);
                }
            }
        }

        info!("Listener on {} stopped", self.local_addr);
    }

    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let name = format!("listen-{}", self.local_addr);
        thread::Builder::new()
            .name(name)
            .spawn(move || self.run())
            .map_err(|e| PeerError::Network(format!("Failed to start listener thread: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecodeErrorPolicy;
    use crate::protocol::EnvelopeWriter;
    use crate::testnet::{closed_address, spawn_node, spawn_node_with, wait_until, WAIT};
    use std::io::Write;

    #[test]
    fn test_bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = taken.local_addr().unwrap().to_string();
        let (identity, _) = Identity::generate(taken.local_addr().unwrap()).unwrap();

        let network = PeerNetwork::new(address, identity);
        assert!(matches!(network.bind(), Err(PeerError::Bind(_))));
    }

    #[test]
    fn test_connect_failure_is_not_registered() {
        let node = spawn_node();
        let address = closed_address();

        assert!(node.network.connect(&address).is_err());
        assert!(!node.network.connections().contains(&address));
        assert_eq!(node.network.stats().connect_failures, 1);

        assert!(node.network.connect("not an address").is_err());
        assert!(node.network.connections().is_empty());
    }

    #[test]
    fn test_connect_registers_both_sides() {
        let a = spawn_node();
        let b = spawn_node();

        a.network.connect(&b.addr.to_string()).unwrap();
        assert!(a.network.connections().contains(&b.addr.to_string()));
        assert!(wait_until(WAIT, || b.network.connections().len() == 1));
        assert_eq!(b.network.stats().accepted, 1);
    }

    #[test]
    fn test_reply_travels_back_over_inbound_link() {
        let a = spawn_node();
        let b = spawn_node();

        a.network.connect(&b.addr.to_string()).unwrap();
        assert!(wait_until(WAIT, || b.network.connections().len() == 1));

        let report = b.network.broadcast("general", b"pong", &b.keypair).unwrap();
        assert_eq!(report.delivered.len(), 1);

        let delivered = a.inbox.recv_timeout(WAIT).unwrap();
        assert_eq!(delivered.envelope.content, b"pong");
        assert_eq!(delivered.peer, b.addr.to_string());
    }

    #[test]
    fn test_broadcast_with_no_connections() {
        let node = spawn_node();
        let report = node.network.broadcast("general", b"alone", &node.keypair).unwrap();
        assert_eq!(report.attempted(), 0);
        assert!(report.all_delivered());
        assert_eq!(node.network.stats().broadcasts, 1);
    }

    #[test]
    fn test_timed_out_write_breaks_link() {
        let node = spawn_node_with(NetworkSettings {
            write_timeout: Some(Duration::from_millis(200)),
            ..NetworkSettings::default()
        });
        // Accepts but never reads, so the socket buffers fill up
        let stalled = TcpListener::bind("127.0.0.1:0").unwrap();
        let stalled_addr = stalled.local_addr().unwrap().to_string();
        node.network.connect(&stalled_addr).unwrap();
        let (_held, _) = stalled.accept().unwrap();

        let big = vec![b'x'; 16 * 1024 * 1024];
        let first = node.network.broadcast("general", &big, &node.keypair).unwrap();
        assert_eq!(first.failed.len(), 1);
        assert_eq!(first.failed[0].0, stalled_addr);

        let second = node.network.broadcast("general", b"next", &node.keypair).unwrap();
        assert!(second.delivered.is_empty());
        assert!(wait_until(WAIT, || !node.network.connections().contains(&stalled_addr)));
    }

    #[test]
    fn test_mutual_dial_delivers_one_copy() {
        let a = spawn_node();
        let b = spawn_node();
        a.network.connect(&b.addr.to_string()).unwrap();
        b.network.connect(&a.addr.to_string()).unwrap();
        assert!(wait_until(WAIT, || a.network.connections().len() == 2));
        assert!(wait_until(WAIT, || b.network.connections().len() == 2));

        // Until a peer has announced itself both of its links are used
        let first = a.network.broadcast("general", b"one", &a.keypair).unwrap();
        assert_eq!(first.delivered.len(), 2);
        for _ in 0..2 {
            assert_eq!(b.inbox.recv_timeout(WAIT).unwrap().envelope.content, b"one");
        }

        let second = b.network.broadcast("general", b"two", &b.keypair).unwrap();
        assert_eq!(second.delivered, vec![a.addr.to_string()]);
        assert_eq!(a.inbox.recv_timeout(WAIT).unwrap().envelope.content, b"two");

        let third = a.network.broadcast("general", b"three", &a.keypair).unwrap();
        assert_eq!(third.delivered, vec![b.addr.to_string()]);
        assert_eq!(b.inbox.recv_timeout(WAIT).unwrap().envelope.content, b"three");
        assert!(b.inbox.recv_timeout(Duration::from_millis(300)).is_err());

        // Both links stay registered; only the fan-out skips the twin
        assert_eq!(a.network.connections().len(), 2);
    }

    #[test]
    fn test_wrongly_signed_envelope_is_dropped_and_loop_continues() {
        let node = spawn_node();
        let (sender, sender_key) = Identity::generate(node.addr).unwrap();
        let (_, other_key) = Identity::generate(node.addr).unwrap();

        let stream = TcpStream::connect(node.addr).unwrap();
        let mut writer = EnvelopeWriter::new(stream);
        writer
            .write(&Envelope::sign("general", b"forged", &sender, &other_key))
            .unwrap();
        writer
            .write(&Envelope::sign("general", b"genuine", &sender, &sender_key))
            .unwrap();

        let delivered = node.inbox.recv_timeout(WAIT).unwrap();
        assert_eq!(delivered.envelope.content, b"genuine");
        assert!(node.inbox.try_recv().is_err());

        let stats = node.network.stats();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.invalid_signatures, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.closed, 0);
    }

    #[test]
    fn test_clean_close_ends_loop_and_removes_entry() {
        let node = spawn_node();
        let stream = TcpStream::connect(node.addr).unwrap();
        let local = stream.local_addr().unwrap().to_string();

        assert!(wait_until(WAIT, || node.network.connections().contains(&local)));
        drop(stream);

        assert!(wait_until(WAIT, || node.network.stats().closed == 1));
        assert!(!node.network.connections().contains(&local));
        assert_eq!(node.network.stats().decode_errors, 0);
    }

    #[test]
    fn test_decode_error_closes_by_default() {
        let node = spawn_node();
        let (sender, key) = Identity::generate(node.addr).unwrap();

        let mut stream = TcpStream::connect(node.addr).unwrap();
        stream.write_all(b"this is not an envelope\n").unwrap();
        assert!(wait_until(WAIT, || node.network.stats().closed == 1));

        // Anything written after the corrupt frame is never read
        let mut writer = EnvelopeWriter::new(stream);
        let _ = writer.write(&Envelope::sign("general", b"late", &sender, &key));
        assert!(node.inbox.recv_timeout(Duration::from_millis(300)).is_err());
        assert_eq!(node.network.stats().decode_errors, 1);
    }

    #[test]
    fn test_decode_error_skipped_when_configured() {
        let node = spawn_node_with(NetworkSettings {
            decode_errors: DecodeErrorPolicy::Skip,
            ..NetworkSettings::default()
        });
        let (sender, key) = Identity::generate(node.addr).unwrap();

        let mut stream = TcpStream::connect(node.addr).unwrap();
        stream.write_all(b"{\"topic\": garbage\n").unwrap();
        let mut writer = EnvelopeWriter::new(stream);
        writer
            .write(&Envelope::sign("general", b"still here", &sender, &key))
            .unwrap();

        let delivered = node.inbox.recv_timeout(WAIT).unwrap();
        assert_eq!(delivered.envelope.content, b"still here");
        assert_eq!(node.network.stats().decode_errors, 1);
        assert_eq!(node.network.stats().closed, 0);
    }

    #[test]
    fn test_shutdown_stops_listener_and_closes_links() {
        let a = spawn_node();
        let b = spawn_node();
        a.network.connect(&b.addr.to_string()).unwrap();
        assert!(wait_until(WAIT, || b.network.connections().len() == 1));

        b.network.shutdown();
        assert!(b.network.is_shut_down());
        assert!(wait_until(WAIT, || b.network.connections().is_empty()));
        assert!(wait_until(WAIT, || a.network.connections().is_empty()));

        // The listener is gone, so new connections are refused or dropped
        let late = a.network.connect(&b.addr.to_string());
        if late.is_ok() {
            assert!(wait_until(WAIT, || a.network.connections().is_empty()));
        }
    }
}
