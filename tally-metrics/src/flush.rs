use std::collections::BTreeMap;

use serde::Serialize;
use tally_common::UnixTimestamp;
use tally_statsd::metric;

use crate::config::AggregatorConfig;
use crate::statsd::{MetricCounters, MetricGauges};
use crate::store::AggregateStore;

/// Statistics of one timer over a flush interval.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimerSummary {
    /// The smallest sample.
    pub min: f64,
    /// The largest sample.
    pub max: f64,
    /// The arithmetic mean of all samples.
    pub mean: f64,
    /// The number of samples.
    pub count: usize,
    /// The sample at the configured percentile.
    pub percentile_value: f64,
    /// The percentile that `percentile_value` was computed for.
    pub pct_threshold: u8,
}

impl TimerSummary {
    /// Computes the summary of a non-empty slice of samples sorted in ascending order.
    fn from_sorted(samples: &[f64], pct_threshold: u8) -> Option<Self> {
        let count = samples.len();
        let min = *samples.first()?;
        let max = *samples.last()?;

        let (mean, percentile_value) = if count == 1 {
            (min, min)
        } else {
            let thresh_index = (usize::from(pct_threshold) * count / 100).clamp(1, count);
            let sum: f64 = samples.iter().sum();
            (sum / count as f64, samples[thresh_index - 1])
        };

        Some(Self {
            min,
            max,
            mean,
            count,
            percentile_value,
            pct_threshold,
        })
    }
}

/// The immutable result of one flush, handed to every sink.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Snapshot {
    /// Reported counter values, as rates per second or raw sums.
    pub counters: BTreeMap<String, f64>,
    /// Reported gauge values.
    pub gauges: BTreeMap<String, f64>,
    /// Reported timer summaries.
    pub timers: BTreeMap<String, TimerSummary>,
}

impl Snapshot {
    /// Returns the number of reported metrics.
    pub fn len(&self) -> usize {
        self.counters.len() + self.gauges.len() + self.timers.len()
    }

    /// Returns `true` if the snapshot does not report any metric.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reduces the aggregate store into a [`Snapshot`].
///
/// Expired keys are deleted before anything is reported. Reported counters are reset to zero,
/// reported timers lose their samples, and gauges are deleted if
/// [`delete_gauges`](AggregatorConfig::delete_gauges) is set. Flushing never refreshes the
/// `last_update` of an entry.
pub fn reduce(
    store: &mut AggregateStore,
    timestamp: UnixTimestamp,
    config: &AggregatorConfig,
) -> Snapshot {
    let expire = config.expire();
    let is_expired =
        |last_update: UnixTimestamp| expire.is_some_and(|e| timestamp.saturating_since(last_update) > e);

    let mut snapshot = Snapshot::default();
    let interval_secs = config.flush_interval as f64 / 1000.0;

    let before = store.counters.len();
    store.counters.retain(|_, entry| !is_expired(entry.last_update));
    let expired_counters = before - store.counters.len();

    for (key, entry) in &mut store.counters {
        if !entry.dirty {
            continue;
        }

        let value = if config.no_aggregate_counters {
            entry.value
        } else {
            entry.value / interval_secs
        };

        snapshot.counters.insert(key.clone(), value);
        entry.value = 0.0;
        entry.dirty = false;
    }

    let before = store.gauges.len();
    store.gauges.retain(|_, entry| !is_expired(entry.last_update));
    let expired_gauges = before - store.gauges.len();

    for (key, entry) in &store.gauges {
        snapshot.gauges.insert(key.clone(), entry.value);
    }

    if config.delete_gauges {
        store.gauges.clear();
    }

    let before = store.timers.len();
    store.timers.retain(|_, entry| !is_expired(entry.last_update));
    let expired_timers = before - store.timers.len();

    for (key, entry) in &mut store.timers {
        entry.samples.sort_by(f64::total_cmp);
        if let Some(summary) = TimerSummary::from_sorted(&entry.samples, config.pct_threshold) {
            snapshot.timers.insert(key.clone(), summary);
        }
        entry.samples.clear();
    }

    for (namespace, expired) in [
        ("counters", expired_counters),
        ("gauges", expired_gauges),
        ("timers", expired_timers),
    ] {
        if expired > 0 {
            tally_log::debug!(namespace, expired, "deleted expired keys");
        }
        metric!(
            counter(MetricCounters::Expired) += expired as i64,
            namespace = namespace
        );
    }

    let stats = store.stats();
    metric!(counter(MetricCounters::Flushed) += snapshot.len() as i64);
    metric!(gauge(MetricGauges::Keys) = stats.counters as u64, namespace = "counters");
    metric!(gauge(MetricGauges::Keys) = stats.gauges as u64, namespace = "gauges");
    metric!(gauge(MetricGauges::Keys) = stats.timers as u64, namespace = "timers");

    snapshot
}
