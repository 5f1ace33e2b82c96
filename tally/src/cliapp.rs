//! This module implements the definition of the command line app.

use std::path::PathBuf;

use clap::{Arg, ArgAction, Command, value_parser};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ABOUT: &str = "Tally aggregates statsd metrics and flushes them to graphite.";

pub fn make_app() -> Command {
    Command::new("tally")
        .disable_help_subcommand(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .propagate_version(true)
        .max_term_width(79)
        .version(VERSION)
        .about(ABOUT)
        .arg(
            Arg::new("config")
                .value_name("CONFIG")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .env("TALLY_CONFIG_PATH")
                .help("The path to the config folder."),
        )
        .subcommand(
            Command::new("run")
                .about("Run the tally server")
                .after_help(
                    "This runs tally in the foreground until it's shut down.  It will bind \
                     to the port and network interface configured in the config file.  \
                     SIGTERM stops gracefully after delivering pending flushes, SIGINT \
                     stops immediately.",
                )
                .arg(
                    Arg::new("host")
                        .long("host")
                        .short('H')
                        .value_name("HOST")
                        .env("TALLY_HOST")
                        .help("The network interface to listen on for statsd datagrams."),
                )
                .arg(
                    Arg::new("port")
                        .long("port")
                        .short('P')
                        .value_name("PORT")
                        .env("TALLY_PORT")
                        .help("The UDP port to listen on."),
                )
                .arg(
                    Arg::new("flush_interval")
                        .long("flush-interval")
                        .value_name("MILLISECONDS")
                        .env("TALLY_FLUSH_INTERVAL")
                        .help("How often aggregated metrics are flushed to the sinks."),
                )
                .arg(
                    Arg::new("pct_threshold")
                        .long("pct-threshold")
                        .value_name("PERCENT")
                        .env("TALLY_PCT_THRESHOLD")
                        .help("The percentile reported for timers, between 1 and 100."),
                )
                .arg(
                    Arg::new("expire")
                        .long("expire")
                        .value_name("SECONDS")
                        .env("TALLY_EXPIRE")
                        .help("Delete keys that were not updated for this long. 0 disables expiry."),
                )
                .arg(
                    Arg::new("no_aggregate_counters")
                        .long("no-aggregate-counters")
                        .action(ArgAction::SetTrue)
                        .env("TALLY_NO_AGGREGATE_COUNTERS")
                        .help("Report counter sums instead of per-second rates."),
                )
                .arg(
                    Arg::new("delete_gauges")
                        .long("delete-gauges")
                        .action(ArgAction::SetTrue)
                        .env("TALLY_DELETE_GAUGES")
                        .help("Remove gauges after each flush instead of repeating them."),
                )
                .arg(
                    Arg::new("debug")
                        .long("debug")
                        .short('d')
                        .action(ArgAction::SetTrue)
                        .env("TALLY_DEBUG")
                        .help("Enable verbose output and debug logging."),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Manage the tally config")
                .after_help(
                    "This command provides basic config management.  It can be used to \
                     print out the effective config including all defaults.",
                )
                .subcommand_required(true)
                .arg_required_else_help(true)
                .subcommand(
                    Command::new("show")
                        .about("Show the entire config out for debugging purposes")
                        .after_help(
                            "This dumps out the entire config including the values \
                             which are not in the config file but filled in from \
                             defaults.",
                        )
                        .arg(
                            Arg::new("format")
                                .short('f')
                                .long("format")
                                .value_name("FORMAT")
                                .value_parser(["debug", "yaml"])
                                .default_value("yaml")
                                .help("The output format"),
                        ),
                ),
        )
}
