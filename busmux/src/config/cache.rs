use core::time::Duration;

/// Refresh policy of a [`RegisterCache`](crate::hwmon::RegisterCache).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct CacheConfig {
    /// Age after which the cached snapshot is considered stale.
    pub refresh_interval: Duration,

    /// Number of complete register bursts read per refresh. Bursts after the
    /// first only exist for noise immunity on the shared lines, the last one
    /// wins.
    pub read_bursts: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_millis(10),
            read_bursts: 20,
        }
    }
}
