use crate::error::{PeerError, Result};
use crate::network::peer_network::wake_listener;
use log::{debug, error, info, warn};
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Pipes every inbound connection to a fresh connection back to the
/// address it came from.
///
/// Bytes pass through untouched. Nothing here frames, signs or verifies,
/// so a proxied stream has no authenticity or integrity guarantee.
pub struct ProxyRelay {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
}

impl ProxyRelay {
    pub fn start(listener: TcpListener, connect_timeout: Duration) -> Result<ProxyRelay> {
        let local_addr = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&shutdown);
        thread::Builder::new()
            .name(format!("proxy-{local_addr}"))
            .spawn(move || accept_loop(listener, flag, connect_timeout))
            .map_err(|e| PeerError::Network(format!("Failed to start proxy relay: {e}")))?;

        warn!(
            "Transparent proxy relay on {local_addr}: traffic is not verified and carries no authenticity guarantee"
        );
        Ok(ProxyRelay {
            local_addr,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting. Splices already running end with their streams.
    pub fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            info!("Shutting down proxy relay on {}", self.local_addr);
            wake_listener(self.local_addr);
        }
    }
}

fn accept_loop(listener: TcpListener, shutdown: Arc<AtomicBool>, connect_timeout: Duration) {
    for stream in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let spawned = thread::Builder::new()
                    .name("proxy-conn".to_string())
                    .spawn(move || {
                        if let Err(e) = proxy_back(stream, connect_timeout) {
                            warn!("Proxy connection failed: {e}");
                        }
                    });
                if let Err(e) = spawned {
                    error!("Failed to spawn proxy connection thread: {e}");
                }
            }
            Err(e) => {
                error!("Error accepting proxy connection: {e}");
                thread::sleep(ACCEPT_ERROR_BACKOFF);
            }
        }
    }
}

/// Dial the inbound peer's own address and splice the two streams
fn proxy_back(inbound: TcpStream, connect_timeout: Duration) -> Result<()> {
    let peer_addr = inbound.peer_addr()?;
    info!("Proxying {peer_addr} back to itself");

    let upstream = match TcpStream::connect_timeout(&peer_addr, connect_timeout) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = inbound.shutdown(Shutdown::Both);
            return Err(PeerError::Network(format!(
                "Failed to dial back {peer_addr}: {e}"
            )));
        }
    };

    let (sent, received) = splice(inbound, upstream)?;
    debug!("Proxy for {peer_addr} done ({sent} bytes up, {received} bytes down)");
    Ok(())
}

/// Copy bytes both ways until each side has finished sending.
///
/// Returns the byte counts `(a -> b, b -> a)`. The end of one direction
/// is passed on as a write shutdown, so the other side still sees a clean
/// end of stream.
pub fn splice(a: TcpStream, b: TcpStream) -> Result<(u64, u64)> {
    let a_reader = a.try_clone()?;
    let b_reader = b.try_clone()?;

    let forward = thread::Builder::new()
        .name("splice".to_string())
        .spawn(move || pipe(a_reader, b))
        .map_err(|e| PeerError::Network(format!("Failed to start splice thread: {e}")))?;
    let backward = pipe(b_reader, a);

    let forward = forward
        .join()
        .map_err(|_| PeerError::Network("Splice thread panicked".to_string()))?;
    Ok((forward?, backward?))
}

fn pipe(mut from: TcpStream, mut to: TcpStream) -> Result<u64> {
    let copied = io::copy(&mut from, &mut to);
    let _ = to.shutdown(Shutdown::Write);
    if copied.is_err() {
        let _ = from.shutdown(Shutdown::Read);
    }
    Ok(copied?)
}
