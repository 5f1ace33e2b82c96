//! The Tally server.
//!
//! This crate runs the metrics daemon. It listens for statsd lines on a UDP socket, aggregates them
//! in memory, and flushes the result to all configured [sinks] in a fixed interval. The server is
//! made up of three services, which communicate exclusively through messages:
//!
//!  - The [`ListenerService`](services::ListenerService) owns the socket, decodes datagrams and
//!    forwards metrics.
//!  - The [`AggregatorService`](tally_metrics::AggregatorService) owns the aggregate store and the
//!    flush timer.
//!  - The [`SinkDispatcherService`](services::SinkDispatcherService) hands every flushed snapshot
//!    to the sinks, one flush at a time.
//!
//! The entry point for the binary is [`run`], which blocks until the process receives a
//! termination signal. Tests and embedders start a [`Server`] directly.

#![warn(missing_docs)]

mod server;
mod statsd;

pub mod services;
pub mod sinks;

use tally_config::Config;
use tally_system::Controller;
use tokio::runtime::Runtime;

pub use crate::server::*;

fn create_runtime(name: &str) -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .thread_name(name)
        .enable_all()
        .build()
}

/// Runs the Tally server and blocks until it has been shut down.
///
/// The server is started with the sinks listed in `config` and keeps running until `SIGTERM` or
/// `SIGINT` are received. `SIGTERM` stops gracefully within the configured shutdown timeout,
/// `SIGINT` stops immediately.
pub fn run(config: Config) -> Result<(), ServerError> {
    let runtime = create_runtime("tally-worker").map_err(ServerError::RuntimeFailed)?;

    runtime.block_on(async {
        let sinks = sinks::create_sinks(&config);
        let server = Server::start(&config, sinks).await?;

        let timeout = Controller::wait_for_signal(config.shutdown_timeout()).await;
        server.shutdown(timeout).await;

        Ok(())
    })
}
