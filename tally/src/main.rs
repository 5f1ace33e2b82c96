//! The Tally daemon.
//!
//! Tally listens for metrics in the statsd line protocol on a UDP socket, aggregates counters,
//! gauges and timers in memory, and flushes the aggregates to configured sinks in a fixed
//! interval. See the `tally-server` crate for the architecture of the server.
//!
//! # Usage
//!
//! ```text
//! tally --config .tally run --flush-interval 5000 --debug
//! tally --config .tally config show
//! ```
//!
//! Every option of the `run` command can also be passed through a `TALLY_*` environment variable,
//! for example `TALLY_PORT=9125`. Command line options and environment variables take precedence
//! over the config file.

mod cli;
mod cliapp;
mod setup;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            tally_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
