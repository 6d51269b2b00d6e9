//! Engine tuning knobs.

use std::time::Duration;

use common::Money;

/// Settings shared by every engine service.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Tip added to each generated bill, in basis points of the subtotal.
    pub tip_bps: u32,
    /// Tolerance for split validation and reconciliation.
    pub epsilon: Money,
    /// Upper bound on waiting for a session lock.
    pub lock_timeout: Duration,
    /// Waiting sessions older than this are abandoned by the idle sweep.
    /// `None` disables the sweep.
    pub idle_window: Option<Duration>,
    /// Buffered events per restaurant channel before slow subscribers lag.
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    pub fn with_tip_bps(mut self, tip_bps: u32) -> Self {
        self.tip_bps = tip_bps;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_idle_window(mut self, window: Duration) -> Self {
        self.idle_window = Some(window);
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tip_bps: 0,
            epsilon: Money::from_cents(1),
            lock_timeout: Duration::from_secs(5),
            idle_window: None,
            event_channel_capacity: 1024,
        }
    }
}
