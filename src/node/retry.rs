use rand::Rng;
use std::time::Duration;

const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);
const DEFAULT_JITTER: f64 = 0.2;

/// Exponential backoff for reconnecting to a peer.
///
/// Delays double from `initial_backoff` up to `max_backoff`. With jitter
/// `j` each delay is drawn from `[d * (1 - j), d]`, so a group of nodes
/// restarted together does not redial in lockstep.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
    /// Fraction of each delay that may be shaved off at random (0.0..=1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            max_attempts: None,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Whether attempt number `attempt` (0-based) may still run
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }

    /// Delay after failed attempt `attempt`, before jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return base;
        }
        let shave = rand::thread_rng().gen_range(0.0..=jitter);
        base.mul_f64(1.0 - shave)
    }
}
