use std::fmt::Write as _;

use async_trait::async_trait;
use tally_common::UnixTimestamp;
use tally_config::GraphiteConfig;
use tally_metrics::Snapshot;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::sinks::{Sink, SinkContext, SinkError};

/// Renders a snapshot in the graphite plaintext protocol.
///
/// Counters and gauges are written below `counters_prefix`, timers produce five paths below
/// `timers_prefix`. The payload ends with a `statsd.numStats` line carrying the number of reported
/// metrics. With a `global_prefix`, it is prepended to every line.
pub fn format_lines(
    timestamp: UnixTimestamp,
    snapshot: &Snapshot,
    config: &GraphiteConfig,
) -> String {
    let ts = timestamp.as_secs();
    let counters_prefix = &config.counters_prefix;
    let timers_prefix = &config.timers_prefix;
    let global_prefix = match config.global_prefix {
        Some(ref prefix) => format!("{prefix}."),
        None => String::new(),
    };

    let mut out = String::new();
    let mut stats = 0;

    for (key, value) in snapshot.counters.iter().chain(&snapshot.gauges) {
        writeln!(out, "{global_prefix}{counters_prefix}.{key} {value} {ts}").ok();
        stats += 1;
    }

    for (key, summary) in &snapshot.timers {
        let path = format!("{global_prefix}{timers_prefix}.{key}");
        writeln!(out, "{path}.lower {} {ts}", summary.min).ok();
        writeln!(out, "{path}.count {} {ts}", summary.count).ok();
        writeln!(out, "{path}.mean {} {ts}", summary.mean).ok();
        writeln!(out, "{path}.upper {} {ts}", summary.max).ok();
        writeln!(
            out,
            "{path}.upper_{} {} {ts}",
            summary.pct_threshold, summary.percentile_value
        )
        .ok();
        stats += 1;
    }

    writeln!(out, "{global_prefix}statsd.numStats {stats} {ts}").ok();
    out
}

/// Sends every flush to graphite over a fresh TCP connection.
#[derive(Debug)]
pub struct GraphiteSink {
    config: GraphiteConfig,
    debug: bool,
}

impl GraphiteSink {
    /// Creates a graphite sink. No connection is made until the first delivery.
    pub fn new(config: GraphiteConfig) -> Self {
        Self {
            config,
            debug: false,
        }
    }

    async fn send(&self, payload: &[u8]) -> Result<(), SinkError> {
        let addr = (self.config.host.as_str(), self.config.port);
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(payload).await?;
        stream.shutdown().await?;
        Ok(())
    }
}

#[async_trait]
impl Sink for GraphiteSink {
    fn name(&self) -> &'static str {
        "graphite"
    }

    async fn init(&mut self, context: &SinkContext) -> Result<(), SinkError> {
        self.debug = context.debug;
        tally_log::info!(
            "sending metrics to graphite at {}:{}",
            self.config.host,
            self.config.port
        );
        Ok(())
    }

    async fn deliver(
        &mut self,
        timestamp: UnixTimestamp,
        snapshot: &Snapshot,
    ) -> Result<(), SinkError> {
        let payload = format_lines(timestamp, snapshot, &self.config);
        if self.debug {
            tally_log::debug!("graphite payload:\n{payload}");
        }

        let timeout = self.config.timeout();
        tokio::time::timeout(timeout, self.send(payload.as_bytes()))
            .await
            .map_err(|_| SinkError::Timeout(timeout))?
    }
}

#[cfg(test)]
mod tests {
    use tally_metrics::{AggregateStore, AggregatorConfig, Metric, reduce};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

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
    fn test_format_lines() {
        let snapshot = snapshot("gorets:1|c\ngorets:1|c|@0.1\nglork:320|ms\ngaugor:333|g");
        let timestamp = UnixTimestamp::from_secs(1_700_000_010);
        let lines = format_lines(timestamp, &snapshot, &GraphiteConfig::default());

        insta::assert_snapshot!(lines, @r###"
        stats.gorets 1.1 1700000010
        stats.gaugor 333 1700000010
        stats.timers.glork.lower 320 1700000010
        stats.timers.glork.count 1 1700000010
        stats.timers.glork.mean 320 1700000010
        stats.timers.glork.upper 320 1700000010
        stats.timers.glork.upper_90 320 1700000010
        statsd.numStats 3 1700000010
        "###);
    }

    #[test]
    fn test_format_global_prefix() {
        let config = GraphiteConfig {
            global_prefix: Some("api-key".to_owned()),
            ..Default::default()
        };
        let snapshot = snapshot("hits:10|c");
        let lines = format_lines(UnixTimestamp::from_secs(42), &snapshot, &config);

        similar_asserts::assert_eq!(
            lines,
            "api-key.stats.hits 1 42\napi-key.statsd.numStats 1 42\n"
        );
    }

    #[test]
    fn test_format_empty() {
        let lines = format_lines(
            UnixTimestamp::from_secs(42),
            &Snapshot::default(),
            &GraphiteConfig::default(),
        );
        assert_eq!(lines, "statsd.numStats 0 42\n");
    }

    #[tokio::test]
    async fn test_deliver() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = String::new();
            stream.read_to_string(&mut received).await.unwrap();
            received
        });

        let mut sink = GraphiteSink::new(GraphiteConfig {
            host: "127.0.0.1".to_owned(),
            port,
            ..Default::default()
        });

        let snapshot = snapshot("hits:10|c");
        sink.deliver(UnixTimestamp::from_secs(42), &snapshot)
            .await
            .unwrap();

        similar_asserts::assert_eq!(
            server.await.unwrap(),
            "stats.hits 1 42\nstatsd.numStats 1 42\n"
        );
    }

    #[tokio::test]
    async fn test_deliver_connection_refused() {
        // Bind and drop to obtain a port that is not listening.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut sink = GraphiteSink::new(GraphiteConfig {
            host: "127.0.0.1".to_owned(),
            port,
            ..Default::default()
        });

        let result = sink
            .deliver(UnixTimestamp::from_secs(42), &Snapshot::default())
            .await;
        assert!(matches!(result, Err(SinkError::Io(_))));
    }
}
