use std::io::Write;

use async_trait::async_trait;
use tally_common::UnixTimestamp;
use tally_metrics::Snapshot;

use crate::sinks::{Sink, SinkContext, SinkError};

/// Formats a snapshot as human readable lines, one per metric.
pub fn format_snapshot(snapshot: &Snapshot) -> Vec<String> {
    let counters = snapshot
        .counters
        .iter()
        .map(|(key, value)| format!("{key} => count={value}"));

    let gauges = snapshot
        .gauges
        .iter()
        .map(|(key, value)| format!("{key} => value={value}"));

    let timers = snapshot.timers.iter().map(|(key, summary)| {
        format!(
            "{key} => lower={}, mean={}, upper={}, {}pct={}, count={}",
            summary.min,
            summary.mean,
            summary.max,
            summary.pct_threshold,
            summary.percentile_value,
            summary.count,
        )
    });

    counters.chain(gauges).chain(timers).collect()
}

/// Prints every flushed metric to stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    debug: bool,
}

impl ConsoleSink {
    /// Creates a new console sink.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Sink for ConsoleSink {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn init(&mut self, context: &SinkContext) -> Result<(), SinkError> {
        self.debug = context.debug;
        Ok(())
    }

    async fn deliver(
        &mut self,
        timestamp: UnixTimestamp,
        snapshot: &Snapshot,
    ) -> Result<(), SinkError> {
        if self.debug {
            tally_log::debug!(
                "printing {} metrics flushed at {}",
                snapshot.len(),
                timestamp.as_secs()
            );
        }

        let mut stdout = std::io::stdout().lock();
        for line in format_snapshot(snapshot) {
            writeln!(stdout, "{line}")?;
        }
        stdout.flush()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tally_metrics::{AggregateStore, AggregatorConfig, Metric, reduce};

    use super::*;

    fn snapshot(data: &str) -> Snapshot {
        let now = UnixTimestamp::from_secs(1_700_000_000);
        let mut store = AggregateStore::new();
        for metric in Metric::parse_all(data.as_bytes()) {
            store.insert(&metric.unwrap(), now);
        }
        reduce(&mut store, now, &AggregatorConfig::default())
    }

    #[test]
    fn test_format_snapshot() {
        let snapshot = snapshot(
            "gorets:1|c\ngorets:1|c|@0.1\nglork:320|ms\nglork:100|ms\ngaugor:333|g\nzeta:2|c",
        );

        insta::assert_debug_snapshot!(format_snapshot(&snapshot), @r###"
        [
            "gorets => count=1.1",
            "zeta => count=0.2",
            "gaugor => value=333",
            "glork => lower=100, mean=210, upper=320, 90pct=100, count=2",
        ]
        "###);
    }

    #[test]
    fn test_format_empty() {
        assert!(format_snapshot(&Snapshot::default()).is_empty());
    }
}
