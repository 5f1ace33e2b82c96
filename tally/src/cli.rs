use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::ArgMatches;
use tally_config::{Config, OverridableConfig};

use crate::cliapp::make_app;
use crate::setup;

/// The config folder used when `--config` is not passed.
const DEFAULT_CONFIG_PATH: &str = ".tally";

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let app = make_app();
    let matches = app.get_matches();

    let config_path = matches
        .get_one::<PathBuf>("config")
        .map_or(Path::new(DEFAULT_CONFIG_PATH), PathBuf::as_path);
    let mut config = Config::from_path(config_path)?;

    if let Some(("run", run_matches)) = matches.subcommand() {
        config.apply_override(extract_config_args(run_matches))?;
    }

    tally_log::init(config.logging());

    match matches.subcommand() {
        Some(("run", _)) => run(config),
        Some(("config", config_matches)) => manage_config(&config, config_matches),
        _ => unreachable!(),
    }
}

/// Extracts config overrides from the `run` command.
///
/// Flags only override the config when they are set, so that an absent flag does not reset a
/// value from the config file.
pub fn extract_config_args(matches: &ArgMatches) -> OverridableConfig {
    let flag = |name: &str| matches.get_flag(name).then(|| "true".to_owned());

    OverridableConfig {
        host: matches.get_one("host").cloned(),
        port: matches.get_one("port").cloned(),
        flush_interval: matches.get_one("flush_interval").cloned(),
        pct_threshold: matches.get_one("pct_threshold").cloned(),
        expire: matches.get_one("expire").cloned(),
        no_aggregate_counters: flag("no_aggregate_counters"),
        delete_gauges: flag("delete_gauges"),
        debug: flag("debug"),
    }
}

pub fn manage_config(config: &Config, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("show", show_matches)) => manage_config_show(config, show_matches),
        _ => unreachable!(),
    }
}

#[allow(clippy::print_stdout)]
pub fn manage_config_show(config: &Config, matches: &ArgMatches) -> Result<()> {
    match matches.get_one::<String>("format").map(String::as_str) {
        Some("debug") => println!("{config:#?}"),
        Some("yaml") | None => print!("{}", config.to_yaml_string()?),
        Some(format) => anyhow::bail!("unknown format '{format}'"),
    }

    Ok(())
}

pub fn run(config: Config) -> Result<()> {
    setup::dump_spawn_infos(&config);
    setup::check_config(&config)?;
    setup::init_metrics(&config)?;
    tally_server::run(config)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_matches(args: &[&str]) -> ArgMatches {
        let matches = make_app()
            .try_get_matches_from(std::iter::once("tally").chain(args.iter().copied()))
            .unwrap();

        match matches.subcommand() {
            Some(("run", run_matches)) => run_matches.clone(),
            other => panic!("unexpected subcommand {other:?}"),
        }
    }

    #[test]
    fn test_extract_config_args() {
        let matches = run_matches(&[
            "run",
            "--port",
            "9125",
            "--flush-interval",
            "5000",
            "--pct-threshold",
            "95",
            "--delete-gauges",
        ]);

        let overrides = extract_config_args(&matches);
        assert_eq!(overrides.port.as_deref(), Some("9125"));
        assert_eq!(overrides.flush_interval.as_deref(), Some("5000"));
        assert_eq!(overrides.pct_threshold.as_deref(), Some("95"));
        assert_eq!(overrides.delete_gauges.as_deref(), Some("true"));
        assert_eq!(overrides.host, None);
        assert_eq!(overrides.no_aggregate_counters, None);
    }

    #[test]
    fn test_apply_cli_overrides() {
        let matches = run_matches(&["run", "--expire", "60", "--no-aggregate-counters"]);

        let mut config = Config::default();
        config.apply_override(extract_config_args(&matches)).unwrap();

        let aggregator = config.aggregator_config();
        assert_eq!(aggregator.expire, 60);
        assert!(aggregator.no_aggregate_counters);
        assert!(!aggregator.delete_gauges);
    }

    #[test]
    fn test_invalid_override() {
        let matches = run_matches(&["run", "--pct-threshold", "0"]);

        let mut config = Config::default();
        let error = config
            .apply_override(extract_config_args(&matches))
            .unwrap_err();

        similar_asserts::assert_eq!(
            error.to_string(),
            "invalid config value (field pct_threshold)"
        );
    }
}
