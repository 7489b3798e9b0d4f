use crate::config::NodeConfig;
use crate::error::{PeerError, Result};
use crate::identity::{Identity, NodeKeypair};
use crate::network::{
    bind_listener, AddressResolver, EchoServiceResolver, LogHandler, LoopbackResolver,
    MessageHandler, PeerNetwork, StatsSnapshot,
};
use crate::node::RetryPolicy;
use crate::relay::{RelayMode, RelayService};
use crate::storage::KeyStore;
use log::{debug, error, info, warn};
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often a connected peer's entry is checked for disappearance
const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_millis(250);
/// Granularity of sleeps that must notice shutdown
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// A running node: primary network, optional relay, and the driver
/// threads that keep peers connected and broadcast periodically
pub struct Node {
    config: NodeConfig,
    keypair: Arc<NodeKeypair>,
    network: PeerNetwork,
    relay: Option<RelayService>,
    workers: Vec<JoinHandle<()>>,
}

impl Node {
    /// Start a node, asking the echo service for our address unless the
    /// config says `local`
    pub fn start(config: NodeConfig) -> Result<Node> {
        let resolver: Box<dyn AddressResolver> = if config.local {
            Box::new(LoopbackResolver)
        } else {
            Box::new(EchoServiceResolver::new(config.echo_service.clone()))
        };
        Self::start_with(config, resolver.as_ref(), Arc::new(LogHandler))
    }

    pub fn start_with(
        config: NodeConfig,
        resolver: &dyn AddressResolver,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Node> {
        config.validate()?;

        let ip = resolver.resolve()?;
        let keypair = load_keypair(&config)?;

        // Bind before attesting so the identity carries the real port
        let primary_listener = bind_listener(&format!("0.0.0.0:{}", config.port))?;
        let primary_port = primary_listener.local_addr()?.port();
        let identity = Identity::attest(&keypair, SocketAddr::new(ip, primary_port));
        info!("Node ID: {}", identity.id_hex());
        info!("Advertising {}", identity.address());

        let relay_setup = match config.relay_port {
            Some(port) => Some(bind_relay(&keypair, ip, port)?),
            None => None,
        };

        let mut network = PeerNetwork::new(format!("0.0.0.0:{primary_port}"), identity)
            .with_settings(config.network.clone())
            .with_handler(handler);
        if let (Some((_, relay_identity)), RelayMode::Signed) = (&relay_setup, config.relay_mode)
        {
            network = network.with_relay_identity(relay_identity.clone());
        }

        let mut workers = vec![network.adopt(primary_listener)?.spawn()?];

        let relay = match relay_setup {
            Some((listener, relay_identity)) => Some(RelayService::start(
                config.relay_mode,
                &network,
                listener,
                relay_identity,
            )?),
            None => None,
        };

        let keypair = Arc::new(keypair);
        for peer in config.initial_peers() {
            workers.push(spawn_worker(format!("connect-{peer}"), {
                let network = network.clone();
                let retry = config.retry.clone();
                move || supervise_peer(network, peer, retry)
            })?);
        }
        workers.push(spawn_worker("broadcast".to_string(), {
            let network = network.clone();
            let keypair = Arc::clone(&keypair);
            let topic = config.topic.clone();
            let interval = config.broadcast_interval;
            move || broadcast_loop(network, keypair, topic, interval)
        })?);

        Ok(Node {
            config,
            keypair,
            network,
            relay,
            workers,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn identity(&self) -> &Identity {
        self.network.identity()
    }

    pub fn public_key(&self) -> &[u8] {
        self.keypair.public_key()
    }

    pub fn network(&self) -> &PeerNetwork {
        &self.network
    }

    pub fn relay(&self) -> Option<&RelayService> {
        self.relay.as_ref()
    }

    /// Counters for the primary network, including a signed relay's
    /// listener, which shares them
    pub fn stats(&self) -> StatsSnapshot {
        self.network.stats()
    }

    /// Address the primary listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.network
            .local_addr()
            .ok_or_else(|| PeerError::Network("Listener is not bound".to_string()))
    }

    /// Stop the relay, the primary network and every driver thread
    pub fn shutdown(&self) {
        if let Some(relay) = &self.relay {
            relay.shutdown();
        }
        self.network.shutdown();
    }

    /// Block until every driver thread has finished (i.e. after shutdown)
    pub fn run(self) {
        for worker in self.workers {
            if worker.join().is_err() {
                error!("A node worker thread panicked");
            }
        }
    }
}

fn load_keypair(config: &NodeConfig) -> Result<NodeKeypair> {
    match &config.keystore_path {
        Some(path) => {
            let mut store = KeyStore::new(path);
            if let Some(passphrase) = &config.keystore_passphrase {
                store = store.with_passphrase(passphrase);
            }
            store.load_or_generate()
        }
        None => {
            info!("No key store configured, using an ephemeral identity");
            NodeKeypair::generate()
        }
    }
}

/// The relay runs under the node's key, attested for the relay address
fn bind_relay(keypair: &NodeKeypair, ip: IpAddr, port: u16) -> Result<(TcpListener, Identity)> {
    let listener = bind_listener(&format!("0.0.0.0:{port}"))?;
    let relay_port = listener.local_addr()?.port();
    let identity = Identity::attest(keypair, SocketAddr::new(ip, relay_port));
    info!("Relay address: {}", identity.address());
    Ok((listener, identity))
}

fn spawn_worker<F>(name: String, work: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(work)
        .map_err(|e| PeerError::Network(format!("Failed to start {name} thread: {e}")))
}

/// Sleep for `duration` unless the network shuts down first.
/// Returns false on shutdown.
fn pause(network: &PeerNetwork, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if network.is_shut_down() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(SHUTDOWN_POLL.min(deadline - now));
    }
}

/// Keep one outbound link to `peer` alive, redialling with backoff
/// whenever its entry leaves the connection table
fn supervise_peer(network: PeerNetwork, peer: String, retry: RetryPolicy) {
    let mut attempt = 0u32;

    while !network.is_shut_down() {
        if network.connections().contains(&peer) {
            attempt = 0;
            if !pause(&network, LIVENESS_CHECK_INTERVAL) {
                break;
            }
            continue;
        }

        if !retry.allows(attempt) {
            warn!("Giving up on peer {peer} after {attempt} attempts");
            return;
        }

        match network.connect(&peer) {
            Ok(()) => attempt = 0,
            Err(e) => {
                let delay = retry.delay(attempt);
                attempt = attempt.saturating_add(1);
                debug!("{e}; retrying in {delay:?}");
                if !pause(&network, delay) {
                    break;
                }
            }
        }
    }
    debug!("Connector for {peer} stopped");
}

fn broadcast_loop(
    network: PeerNetwork,
    keypair: Arc<NodeKeypair>,
    topic: String,
    interval: Duration,
) {
    let content = format!("Hello from {}!", network.identity().address());

    while pause(&network, interval) {
        match network.broadcast(&topic, content.as_bytes(), &keypair) {
            Ok(report) if report.attempted() > 0 => debug!(
                "Sent {:?} to {}/{} peers",
                content,
                report.delivered.len(),
                report.attempted()
            ),
            Ok(_) => debug!("No peers to broadcast to"),
            Err(e) => error!("Broadcast failed: {e}"),
        }
    }
    debug!("Broadcaster stopped");
}
