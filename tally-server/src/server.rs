use std::net::SocketAddr;
use std::time::Duration;

use tally_config::Config;
use tally_metrics::AggregatorService;
use tally_system::{Controller, Service};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::services::{ListenerService, SinkDispatcherService};
use crate::sinks::{Sink, SinkContext};

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding failed.
    #[error("bind to interface failed")]
    BindFailed(#[from] std::io::Error),

    /// The async runtime could not be created.
    #[error("failed to start the runtime")]
    RuntimeFailed(#[source] std::io::Error),
}

/// A running server.
///
/// The server owns the listener, the aggregator and the sink dispatcher. All of them are stopped
/// through [`stop`](Self::stop) or [`shutdown`](Self::shutdown). Dropping the server signals an
/// immediate shutdown to all services without waiting for them.
#[derive(Debug)]
pub struct Server {
    controller: Controller,
    local_addr: SocketAddr,
    shutdown_timeout: Duration,
    handles: ServiceHandles,
}

#[derive(Debug)]
struct ServiceHandles {
    listener: JoinHandle<()>,
    aggregator: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl Server {
    /// Binds the listening socket and starts all services.
    ///
    /// Every start begins with an empty aggregate store. The first flush happens one flush
    /// interval after this function returns.
    pub async fn start(config: &Config, sinks: Vec<Box<dyn Sink>>) -> Result<Self, ServerError> {
        let socket = UdpSocket::bind(config.listen_addr()).await?;
        let local_addr = socket.local_addr()?;

        let controller = Controller::new();

        let context = SinkContext::from_config(config);
        let (dispatcher, dispatcher_handle) =
            SinkDispatcherService::new(sinks, context, controller.shutdown_handle())
                .start_joinable();

        let (aggregator, aggregator_handle) = AggregatorService::new(
            config.aggregator_config().clone(),
            controller.shutdown_handle(),
            Some(dispatcher.recipient()),
        )
        .start_joinable();

        let (_, listener_handle) = ListenerService::new(
            socket,
            config.buffer_size(),
            aggregator,
            controller.shutdown_handle(),
        )
        .start_joinable();

        tally_log::info!("listening on udp://{local_addr}/");

        Ok(Self {
            controller,
            local_addr,
            shutdown_timeout: config.shutdown_timeout(),
            handles: ServiceHandles {
                listener: listener_handle,
                aggregator: aggregator_handle,
                dispatcher: dispatcher_handle,
            },
        })
    }

    /// Returns the address of the bound socket.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Gracefully stops the server within the configured shutdown timeout.
    pub async fn stop(self) {
        let timeout = self.shutdown_timeout;
        self.shutdown(Some(timeout)).await
    }

    /// Stops the server and waits for all services to finish.
    ///
    /// The listener closes its socket immediately. With a `timeout`, snapshots already queued for
    /// the sinks are delivered until `timeout` elapses, after which pending deliveries are aborted.
    ///
    /// With `None`, the listener and the aggregator are aborted right away and queued snapshots
    /// are discarded. A delivery that is already running still completes, bounded by the
    /// configured shutdown timeout.
    pub async fn shutdown(self, timeout: Option<Duration>) {
        self.controller.shutdown(timeout);

        let ServiceHandles {
            listener,
            aggregator,
            dispatcher,
        } = self.handles;

        let results = match timeout {
            Some(timeout) => {
                let aborts = [
                    listener.abort_handle(),
                    aggregator.abort_handle(),
                    dispatcher.abort_handle(),
                ];
                let join = futures::future::join_all([listener, aggregator, dispatcher]);

                match tokio::time::timeout(timeout, join).await {
                    Ok(results) => results,
                    Err(_) => {
                        tally_log::warn!(
                            "shutdown timed out after {}s, aborting pending deliveries",
                            timeout.as_secs()
                        );
                        aborts.iter().for_each(|abort| abort.abort());
                        return;
                    }
                }
            }
            None => {
                listener.abort();
                aggregator.abort();
                let mut results = futures::future::join_all([listener, aggregator]).await;

                let abort = dispatcher.abort_handle();
                match tokio::time::timeout(self.shutdown_timeout, dispatcher).await {
                    Ok(result) => results.push(result),
                    Err(_) => {
                        tally_log::warn!(
                            "delivery did not complete within {}s, aborting",
                            self.shutdown_timeout.as_secs()
                        );
                        abort.abort();
                    }
                }

                results
            }
        };

        for error in results.into_iter().filter_map(Result::err) {
            if error.is_panic() {
                tally_log::error!(
                    error = &error as &dyn std::error::Error,
                    "service panicked"
                );
            }
        }

        tally_log::info!("server stopped");
    }
}
