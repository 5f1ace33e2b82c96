use std::net::SocketAddr;

use anyhow::Result;
use tally_config::{Config, SinkConfig};
use tally_statsd::MetricsClientConfig;

/// Rejects configurations that would start a server that cannot do anything useful.
pub fn check_config(config: &Config) -> Result<()> {
    if config.sinks().is_empty() {
        tally_log::warn!("no sinks configured, flushed metrics will be discarded");
    }

    if let Some(statsd) = config.statsd_addr()
        && statsd.parse::<SocketAddr>().ok() == Some(config.listen_addr())
    {
        anyhow::bail!(
            "internal metrics are sent to the server's own address {statsd}, \
             configure a different `metrics.statsd` host"
        );
    }

    Ok(())
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        tally_log::info!("launching tally without config folder");
    } else {
        tally_log::info!(
            "launching tally from config folder {}",
            config.path().display()
        );
    }

    let aggregator = config.aggregator_config();
    tally_log::info!("  listen address: {}", config.listen_addr());
    tally_log::info!("  flush interval: {}ms", aggregator.flush_interval);
    tally_log::info!("  pct threshold: {}", aggregator.pct_threshold);
    match aggregator.expire() {
        Some(expire) => tally_log::info!("  expire: {}s", expire.as_secs()),
        None => tally_log::info!("  expire: -"),
    }

    for sink in config.sinks() {
        match sink {
            SinkConfig::Console => tally_log::info!("  sink: console"),
            SinkConfig::Graphite(graphite) => {
                tally_log::info!("  sink: graphite {}:{}", graphite.host, graphite.port)
            }
        }
    }

    tally_log::info!("  log level: {}", config.logging().level);
}

/// Initialize the metric system.
pub fn init_metrics(config: &Config) -> Result<()> {
    let Some(host) = config.statsd_addr() else {
        return Ok(());
    };

    tally_statsd::init(MetricsClientConfig {
        prefix: config.metrics_prefix(),
        host,
        default_tags: config.metrics_default_tags().clone(),
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(value: serde_json::Value) -> Config {
        Config::from_json_value(value).unwrap()
    }

    #[test]
    fn test_check_default_config() {
        assert!(check_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_check_statsd_loop() {
        let config = config(serde_json::json!({
            "tally": {"host": "127.0.0.1", "port": 8125},
            "metrics": {"statsd": "127.0.0.1:8125"},
        }));

        assert!(check_config(&config).is_err());
    }

    #[test]
    fn test_check_statsd_other_instance() {
        let config = config(serde_json::json!({
            "tally": {"host": "127.0.0.1", "port": 8125},
            "metrics": {"statsd": "127.0.0.1:9125"},
        }));

        assert!(check_config(&config).is_ok());
    }
}
