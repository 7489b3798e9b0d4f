use crate::error::{PeerError, Result};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Which side opened the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// One open, bidirectional TCP link to a peer.
///
/// Writes are serialised through a mutex so frames from concurrent
/// broadcasts never interleave. The read half is owned by the link's
/// receive loop.
///
/// A failed write may leave part of a frame on the wire, so the first
/// failure breaks the link for good: the socket is shut down and every
/// later send is refused until the receive loop removes the entry.
pub struct PeerLink {
    address: String,
    direction: Direction,
    control: TcpStream,
    writer: Mutex<TcpStream>,
    broken: AtomicBool,
    /// Listening address the peer attested in its first direct envelope
    announced: OnceLock<SocketAddr>,
}

impl PeerLink {
    pub fn new(address: String, stream: TcpStream, direction: Direction) -> Result<PeerLink> {
        let writer = stream
            .try_clone()
            .map_err(|e| PeerError::Network(format!("Failed to clone stream for {address}: {e}")))?;
        Ok(PeerLink {
            address,
            direction,
            control: stream,
            writer: Mutex::new(writer),
            broken: AtomicBool::new(false),
            announced: OnceLock::new(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Write one complete frame and flush it
    pub fn send_frame(&self, frame: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_broken() {
            return Err(PeerError::Network(format!(
                "Link to {} is broken after an earlier failed send",
                self.address
            )));
        }
        writer
            .write_all(frame)
            .and_then(|_| writer.flush())
            .map_err(|e| {
                self.broken.store(true, Ordering::SeqCst);
                self.close();
                PeerError::Network(format!("Failed to send to {}: {e}", self.address))
            })
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    /// Shut the socket down in both directions, ending the receive loop
    pub fn close(&self) {
        let _ = self.control.shutdown(Shutdown::Both);
    }

    /// Remember the address the peer listens on. Only the first call counts.
    pub fn announce(&self, address: SocketAddr) {
        let _ = self.announced.set(address);
    }

    pub fn announced(&self) -> Option<SocketAddr> {
        self.announced.get().copied()
    }
}

impl fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLink")
            .field("address", &self.address)
            .field("direction", &self.direction)
            .finish()
    }
}

/// Live links keyed by peer address, at most one per address.
///
/// Every access goes through the lock. Iteration always works on a
/// snapshot taken under the read lock, so a broadcast sees a fixed set of
/// links even while connects and disconnects keep mutating the table.
pub struct ConnectionTable<L = PeerLink> {
    inner: RwLock<HashMap<String, Arc<L>>>,
}

impl<L> Default for ConnectionTable<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L> ConnectionTable<L> {
    pub fn new() -> Self {
        ConnectionTable {
            inner: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<L>>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<L>>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a link, returning the one it replaced, if any
    pub fn put(&self, address: impl Into<String>, link: Arc<L>) -> Option<Arc<L>> {
        self.write().insert(address.into(), link)
    }

    pub fn get(&self, address: &str) -> Option<Arc<L>> {
        self.read().get(address).cloned()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.read().contains_key(address)
    }

    pub fn remove(&self, address: &str) -> Option<Arc<L>> {
        self.write().remove(address)
    }

    /// Remove the entry only if it still refers to `link`.
    ///
    /// A receive loop that ends must not evict a newer link that replaced
    /// its own under the same address.
    pub fn remove_if_same(&self, address: &str, link: &Arc<L>) -> bool {
        let mut inner = self.write();
        let same = inner
            .get(address)
            .is_some_and(|current| Arc::ptr_eq(current, link));
        if same {
            inner.remove(address);
        }
        same
    }

    /// Point-in-time copy of every entry
    pub fn snapshot(&self) -> Vec<(String, Arc<L>)> {
        self.read()
            .iter()
            .map(|(address, link)| (address.clone(), Arc::clone(link)))
            .collect()
    }

    /// Visit a snapshot of the entries. The lock is not held while
    /// `visit` runs, so it may block or touch the table itself.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&str, &Arc<L>),
    {
        for (address, link) in self.snapshot() {
            visit(&address, &link);
        }
    }

    pub fn addresses(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
