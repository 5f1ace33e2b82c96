//! Destinations for flushed metrics.
//!
//! Every flush produces one [`Snapshot`] which is handed to all configured sinks in order. Sinks
//! are selected through the `sinks` section of the configuration, see [`create_sinks`].

use std::time::Duration;

use async_trait::async_trait;
use tally_common::UnixTimestamp;
use tally_config::{Config, SinkConfig};
use tally_metrics::Snapshot;

mod console;
mod graphite;

pub use self::console::*;
pub use self::graphite::*;

/// Runtime information passed to [`Sink::init`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkContext {
    /// Verbose output requested by the operator.
    pub debug: bool,
    /// The interval between two flushes.
    pub flush_interval: Duration,
}

impl SinkContext {
    /// Creates the sink context from the server configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            debug: config.debug(),
            flush_interval: config.aggregator_config().flush_interval(),
        }
    }
}

/// An error returned by a [`Sink`].
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Writing to the destination failed.
    #[error("failed to write metrics")]
    Io(#[from] std::io::Error),

    /// The destination did not accept the metrics in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Any other failure reported by the sink.
    #[error("{0}")]
    Custom(String),
}

/// A destination for flushed metrics.
///
/// Sinks are owned by the dispatcher and called sequentially. A sink may block for as long as it
/// needs to; later snapshots queue up in the meanwhile.
#[async_trait]
pub trait Sink: Send {
    /// A short name used in logs and internal metrics.
    fn name(&self) -> &'static str;

    /// Called once before the first delivery.
    ///
    /// A sink that fails to initialize does not receive any snapshots.
    async fn init(&mut self, context: &SinkContext) -> Result<(), SinkError> {
        let _ = context;
        Ok(())
    }

    /// Delivers the result of one flush.
    async fn deliver(
        &mut self,
        timestamp: UnixTimestamp,
        snapshot: &Snapshot,
    ) -> Result<(), SinkError>;
}

/// Instantiates all sinks listed in the configuration.
pub fn create_sinks(config: &Config) -> Vec<Box<dyn Sink>> {
    config
        .sinks()
        .iter()
        .map(|sink| -> Box<dyn Sink> {
            match sink {
                SinkConfig::Console => Box::new(ConsoleSink::new()),
                SinkConfig::Graphite(graphite) => Box::new(GraphiteSink::new(graphite.clone())),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_default_sinks() {
        let config = Config::default();
        let sinks = create_sinks(&config);
        let names: Vec<_> = sinks.iter().map(|sink| sink.name()).collect();
        assert_eq!(names, ["console"]);
    }

    #[test]
    fn test_create_configured_sinks() {
        let config = Config::from_json_value(serde_json::json!({
            "sinks": [
                {"type": "graphite", "host": "graphite.local"},
                {"type": "console"},
            ]
        }))
        .unwrap();

        let sinks = create_sinks(&config);
        let names: Vec<_> = sinks.iter().map(|sink| sink.name()).collect();
        assert_eq!(names, ["graphite", "console"]);
    }

    #[test]
    fn test_context_from_config() {
        let config = Config::from_json_value(serde_json::json!({
            "tally": {"debug": true},
            "aggregator": {"flush_interval": 2500},
        }))
        .unwrap();

        assert_eq!(
            SinkContext::from_config(&config),
            SinkContext {
                debug: true,
                flush_interval: Duration::from_millis(2500),
            }
        );
    }
}
