use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one Peer Network.
///
/// Dropped frames and rejected signatures never reach the message handler,
/// so this is where they become observable.
#[derive(Debug, Default)]
pub struct NetworkStats {
    accepted: AtomicU64,
    connected: AtomicU64,
    connect_failures: AtomicU64,
    received: AtomicU64,
    delivered: AtomicU64,
    invalid_signatures: AtomicU64,
    decode_errors: AtomicU64,
    closed: AtomicU64,
    broadcasts: AtomicU64,
    sends_ok: AtomicU64,
    send_failures: AtomicU64,
    forwarded: AtomicU64,
}

/// Point-in-time copy of [`NetworkStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub connected: u64,
    pub connect_failures: u64,
    pub received: u64,
    pub delivered: u64,
    pub invalid_signatures: u64,
    pub decode_errors: u64,
    pub closed: u64,
    pub broadcasts: u64,
    pub sends_ok: u64,
    pub send_failures: u64,
    pub forwarded: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl NetworkStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        bump(&self.accepted);
    }

    pub fn record_connected(&self) {
        bump(&self.connected);
    }

    pub fn record_connect_failure(&self) {
        bump(&self.connect_failures);
    }

    pub fn record_received(&self) {
        bump(&self.received);
    }

    pub fn record_delivered(&self) {
        bump(&self.delivered);
    }

    pub fn record_invalid_signature(&self) {
        bump(&self.invalid_signatures);
    }

    pub fn record_decode_error(&self) {
        bump(&self.decode_errors);
    }

    pub fn record_closed(&self) {
        bump(&self.closed);
    }

    pub fn record_broadcast(&self) {
        bump(&self.broadcasts);
    }

    pub fn record_sends(&self, ok: usize, failed: usize) {
        self.sends_ok.fetch_add(ok as u64, Ordering::Relaxed);
        self.send_failures.fetch_add(failed as u64, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self, count: usize) {
        self.forwarded.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            invalid_signatures: self.invalid_signatures.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            sends_ok: self.sends_ok.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
        }
    }
}
