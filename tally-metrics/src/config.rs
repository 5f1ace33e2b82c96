use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Parameters used by the [`AggregatorService`](crate::AggregatorService) and [`reduce`](crate::reduce).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AggregatorConfig {
    /// The interval in milliseconds between two flushes.
    ///
    /// Defaults to `10000` milliseconds. Unless `no_aggregate_counters` is set, counters are
    /// reported as a rate per second over this interval.
    pub flush_interval: u64,

    /// The percentile reported for timers, from `1` to `100`.
    ///
    /// Defaults to `90`.
    pub pct_threshold: u8,

    /// Time in seconds after which keys without writes are deleted.
    ///
    /// Defaults to `0`, which disables expiry.
    pub expire: u64,

    /// Reports counters as raw sums instead of per-second rates.
    ///
    /// Defaults to `false`.
    pub no_aggregate_counters: bool,

    /// Deletes gauges after they have been reported once.
    ///
    /// Defaults to `false`, which reports the last value of a gauge on every flush until it
    /// expires.
    pub delete_gauges: bool,

    /// Performs a final flush when the aggregator shuts down.
    ///
    /// Defaults to `false`.
    pub flush_on_shutdown: bool,
}

impl AggregatorConfig {
    /// Returns the flush interval as [`Duration`].
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval)
    }

    /// Returns the expiry window, or `None` if expiry is disabled.
    pub fn expire(&self) -> Option<Duration> {
        match self.expire {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            flush_interval: 10_000,
            pct_threshold: 90,
            expire: 0,
            no_aggregate_counters: false,
            delete_gauges: false,
            flush_on_shutdown: false,
        }
    }
}
