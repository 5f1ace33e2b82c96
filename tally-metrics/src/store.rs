use std::collections::HashMap;

use tally_common::UnixTimestamp;

use crate::protocol::{Metric, MetricValue};

/// Aggregated state of a counter.
#[derive(Clone, Debug, PartialEq)]
pub struct CounterEntry {
    /// The sum of all scaled deltas since the last flush.
    pub value: f64,
    /// Whether the counter received an increment since the last flush.
    pub dirty: bool,
    /// Time of the last increment.
    pub last_update: UnixTimestamp,
}

/// Aggregated state of a gauge.
#[derive(Clone, Debug, PartialEq)]
pub struct GaugeEntry {
    /// The last reported value.
    pub value: f64,
    /// Time of the last write.
    pub last_update: UnixTimestamp,
}

/// Aggregated state of a timer.
#[derive(Clone, Debug, PartialEq)]
pub struct TimerEntry {
    /// All samples since the last flush, in arrival order.
    pub samples: Vec<f64>,
    /// Time of the last sample.
    pub last_update: UnixTimestamp,
}

/// Number of entries held in each namespace of an [`AggregateStore`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StoreStats {
    /// Number of counter keys.
    pub counters: usize,
    /// Number of gauge keys.
    pub gauges: usize,
    /// Number of timer keys.
    pub timers: usize,
}

impl StoreStats {
    /// Total number of keys across all namespaces.
    pub fn total(&self) -> usize {
        self.counters + self.gauges + self.timers
    }
}

/// In-memory state of all counters, gauges and timers.
///
/// The three namespaces are independent: the same key can exist as a counter, a gauge and a timer
/// at the same time. Every write refreshes the entry's `last_update`, which is the only input to
/// expiry during [`reduce`](crate::reduce).
#[derive(Clone, Debug, Default)]
pub struct AggregateStore {
    pub(crate) counters: HashMap<String, CounterEntry>,
    pub(crate) gauges: HashMap<String, GaugeEntry>,
    pub(crate) timers: HashMap<String, TimerEntry>,
}

impl AggregateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta` to the counter `key`, creating it at zero if it does not exist.
    pub fn record_counter(&mut self, key: &str, delta: f64, now: UnixTimestamp) {
        match self.counters.get_mut(key) {
            Some(entry) => {
                entry.value += delta;
                entry.dirty = true;
                entry.last_update = now;
            }
            None => {
                self.counters.insert(
                    key.to_owned(),
                    CounterEntry {
                        value: delta,
                        dirty: true,
                        last_update: now,
                    },
                );
            }
        }
    }

    /// Sets the gauge `key` to `value`.
    pub fn record_gauge(&mut self, key: &str, value: f64, now: UnixTimestamp) {
        match self.gauges.get_mut(key) {
            Some(entry) => {
                entry.value = value;
                entry.last_update = now;
            }
            None => {
                self.gauges.insert(
                    key.to_owned(),
                    GaugeEntry {
                        value,
                        last_update: now,
                    },
                );
            }
        }
    }

    /// Appends `sample` to the timer `key`.
    pub fn record_timer(&mut self, key: &str, sample: f64, now: UnixTimestamp) {
        match self.timers.get_mut(key) {
            Some(entry) => {
                entry.samples.push(sample);
                entry.last_update = now;
            }
            None => {
                self.timers.insert(
                    key.to_owned(),
                    TimerEntry {
                        samples: vec![sample],
                        last_update: now,
                    },
                );
            }
        }
    }

    /// Applies a decoded metric to the store.
    ///
    /// Counter deltas are scaled by the inverse of their sample rate.
    pub fn insert(&mut self, metric: &Metric, now: UnixTimestamp) {
        let value = metric.scaled_value();
        match metric.value {
            MetricValue::Counter(_) => self.record_counter(&metric.name, value, now),
            MetricValue::Gauge(_) => self.record_gauge(&metric.name, value, now),
            MetricValue::Timer(_) => self.record_timer(&metric.name, value, now),
        }
    }

    /// Returns the counter for `key`, if it exists.
    pub fn counter(&self, key: &str) -> Option<&CounterEntry> {
        self.counters.get(key)
    }

    /// Returns the gauge for `key`, if it exists.
    pub fn gauge(&self, key: &str) -> Option<&GaugeEntry> {
        self.gauges.get(key)
    }

    /// Returns the pending samples of timer `key`, if it exists.
    pub fn timer_samples(&self, key: &str) -> Option<&[f64]> {
        self.timers.get(key).map(|entry| entry.samples.as_slice())
    }

    /// Returns the number of keys per namespace.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            counters: self.counters.len(),
            gauges: self.gauges.len(),
            timers: self.timers.len(),
        }
    }

    /// Returns `true` if the store holds no keys at all.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.gauges.is_empty() && self.timers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: u64) -> UnixTimestamp {
        UnixTimestamp::from_secs(secs)
    }

    #[test]
    fn test_counter_sums_deltas() {
        let mut store = AggregateStore::new();
        store.record_counter("hits", 1.0, ts(10));
        store.record_counter("hits", 2.5, ts(11));
        store.record_counter("hits", -0.5, ts(12));

        assert_eq!(
            store.counter("hits"),
            Some(&CounterEntry {
                value: 3.0,
                dirty: true,
                last_update: ts(12),
            })
        );
    }

    #[test]
    fn test_gauge_last_write_wins() {
        let mut store = AggregateStore::new();
        store.record_gauge("load", 1.0, ts(10));
        store.record_gauge("load", 7.0, ts(11));

        let entry = store.gauge("load").unwrap();
        assert_eq!(entry.value, 7.0);
        assert_eq!(entry.last_update, ts(11));
    }

    #[test]
    fn test_timer_appends() {
        let mut store = AggregateStore::new();
        store.record_timer("db", 5.0, ts(10));
        store.record_timer("db", 3.0, ts(10));

        assert_eq!(store.timer_samples("db"), Some(&[5.0, 3.0][..]));
        assert_eq!(store.timer_samples("missing"), None);
    }

    #[test]
    fn test_namespaces_independent() {
        let mut store = AggregateStore::new();
        store.record_counter("x", 1.0, ts(1));
        store.record_gauge("x", 2.0, ts(1));
        store.record_timer("x", 3.0, ts(1));

        assert_eq!(store.counter("x").unwrap().value, 1.0);
        assert_eq!(store.gauge("x").unwrap().value, 2.0);
        assert_eq!(store.timer_samples("x"), Some(&[3.0][..]));
        assert_eq!(
            store.stats(),
            StoreStats {
                counters: 1,
                gauges: 1,
                timers: 1,
            }
        );
        assert_eq!(store.stats().total(), 3);
    }

    #[test]
    fn test_insert_scales_counters() {
        let mut store = AggregateStore::new();
        for metric in Metric::parse_all(b"gorets:1|c\ngorets:1|c|@0.1\ngaugor:333|g|@0.5") {
            store.insert(&metric.unwrap(), ts(100));
        }

        let counter = store.counter("gorets").unwrap().value;
        assert!((counter - 11.0).abs() < 1e-9);
        assert_eq!(store.gauge("gaugor").unwrap().value, 333.0);
    }

    #[test]
    fn test_is_empty() {
        let mut store = AggregateStore::new();
        assert!(store.is_empty());
        store.record_gauge("g", 0.0, ts(0));
        assert!(!store.is_empty());
    }
}
