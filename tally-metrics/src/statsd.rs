use tally_statsd::{CounterMetric, GaugeMetric, TimerMetric};

/// Counter metrics for Tally Metrics.
pub enum MetricCounters {
    /// Incremented for every metric that is applied to the aggregate store.
    ///
    /// Tagged by metric type.
    Received,

    /// Incremented for every key deleted because it received no writes within the expiry window.
    ///
    /// Tagged by namespace: `counters`, `gauges` or `timers`.
    Expired,

    /// Incremented by the number of metrics reported in a flush.
    Flushed,
}

impl CounterMetric for MetricCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::Received => "metrics.received",
            Self::Expired => "metrics.expired",
            Self::Flushed => "metrics.flushed",
        }
    }
}

/// Gauge metrics for Tally Metrics.
pub enum MetricGauges {
    /// The number of keys held in the aggregate store after a flush.
    ///
    /// Tagged by namespace.
    Keys,
}

impl GaugeMetric for MetricGauges {
    fn name(&self) -> &'static str {
        match *self {
            Self::Keys => "metrics.keys",
        }
    }
}

/// Timer metrics for Tally Metrics.
pub enum MetricTimers {
    /// Time in milliseconds spent reducing the aggregate store into a snapshot.
    ///
    /// Delivering the snapshot to sinks is outside of this timer.
    FlushDuration,
}

impl TimerMetric for MetricTimers {
    fn name(&self) -> &'static str {
        match *self {
            Self::FlushDuration => "metrics.flush_duration",
        }
    }
}
