use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use tally_metrics::FlushMetrics;
use tally_statsd::metric;
use tally_system::{FromMessage, Interface, NoResponse, Receiver, Service, ShutdownHandle};
use tokio::task::JoinHandle;

use crate::sinks::{Sink, SinkContext, SinkError};
use crate::statsd::{ServerCounters, ServerTimers};

/// Delivers flushed snapshots to all sinks.
#[derive(Debug)]
pub struct SinkDispatcher(pub FlushMetrics);

impl Interface for SinkDispatcher {}

impl FromMessage<FlushMetrics> for SinkDispatcher {
    type Response = NoResponse;

    fn from_message(message: FlushMetrics, _: ()) -> Self {
        Self(message)
    }
}

/// Service implementing the [`SinkDispatcher`] interface.
///
/// Sinks are initialized once when the service starts. Snapshots are delivered to every sink in
/// registration order, one flush at a time. A failing or panicking sink does not prevent the
/// remaining sinks from receiving the snapshot.
///
/// After a graceful shutdown, the service stops once all senders are gone and its queue has been
/// drained. A forced shutdown lets the delivery in flight complete and discards queued snapshots.
pub struct SinkDispatcherService {
    sinks: Vec<Box<dyn Sink>>,
    context: SinkContext,
    shutdown: ShutdownHandle,
}

impl SinkDispatcherService {
    /// Creates a dispatcher for the given sinks.
    pub fn new(sinks: Vec<Box<dyn Sink>>, context: SinkContext, shutdown: ShutdownHandle) -> Self {
        Self {
            sinks,
            context,
            shutdown,
        }
    }

    async fn init_sinks(&mut self) {
        let mut initialized = Vec::with_capacity(self.sinks.len());

        for mut sink in self.sinks.drain(..) {
            match sink.init(&self.context).await {
                Ok(()) => {
                    tally_log::debug!("initialized sink {}", sink.name());
                    initialized.push(sink);
                }
                Err(error) => {
                    tally_log::error!(
                        error = &error as &dyn std::error::Error,
                        sink = sink.name(),
                        "failed to initialize sink, it will not receive metrics",
                    );
                }
            }
        }

        self.sinks = initialized;
    }

    async fn handle_flush(&mut self, message: FlushMetrics) {
        let FlushMetrics {
            timestamp,
            snapshot,
        } = message;

        for sink in &mut self.sinks {
            let name = sink.name();
            let start = Instant::now();

            let result = AssertUnwindSafe(sink.deliver(timestamp, &snapshot))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(SinkError::Custom("sink panicked".to_owned())));

            metric!(
                timer(ServerTimers::SinkDeliveryDuration) = start.elapsed(),
                sink = name
            );

            if let Err(error) = result {
                metric!(counter(ServerCounters::SinkFailed) += 1, sink = name);
                tally_log::error!(
                    error = &error as &dyn std::error::Error,
                    sink = name,
                    "failed to deliver metrics",
                );
            }
        }
    }
}

impl Service for SinkDispatcherService {
    type Interface = SinkDispatcher;

    fn spawn_handler(mut self, mut rx: Receiver<Self::Interface>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.init_sinks().await;

            let mut shutdown = self.shutdown.clone();
            let mut draining = false;

            loop {
                tokio::select! {
                    biased;

                    shutdown = shutdown.notified(), if !draining => match shutdown.timeout {
                        Some(_) => draining = true,
                        None => {
                            if !rx.is_empty() {
                                tally_log::warn!("discarding {} queued flushes", rx.len());
                            }
                            break;
                        }
                    },
                    message = rx.recv() => match message {
                        Some(SinkDispatcher(message)) => self.handle_flush(message).await,
                        None => break,
                    },
                }
            }

            tally_log::info!("sink dispatcher stopped");
        })
    }
}
