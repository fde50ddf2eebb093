use core::time::Duration;

/// Settle-time discipline applied whenever the shared clock lines are
/// released.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ArbiterConfig {
    /// Lower bound of the random jitter slept before the fixed delay. Skipped
    /// when the releasing bus is runtime suspended.
    pub settle_jitter_min: Duration,

    /// Upper bound of the random jitter.
    pub settle_jitter_max: Duration,

    /// Fixed delay that is always slept before the next holder may proceed.
    pub settle_fixed: Duration,
}

impl ArbiterConfig {
    /// No settle delay at all. Only sensible when nothing is electrically
    /// shared, e.g. in tests.
    pub const IMMEDIATE: Self = Self {
        settle_jitter_min: Duration::ZERO,
        settle_jitter_max: Duration::ZERO,
        settle_fixed: Duration::ZERO,
    };
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            settle_jitter_min: Duration::from_micros(100),
            settle_jitter_max: Duration::from_micros(200),
            settle_fixed: Duration::from_millis(1),
        }
    }
}
