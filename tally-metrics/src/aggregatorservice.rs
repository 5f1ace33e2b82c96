use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use tally_common::UnixTimestamp;
use tally_statsd::metric;
use tally_system::{
    AsyncResponse, FromMessage, Interface, NoResponse, Receiver, Recipient, Sender, Service,
    Shutdown, ShutdownHandle,
};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::AggregatorConfig;
use crate::flush::{Snapshot, reduce};
use crate::protocol::Metric;
use crate::statsd::{MetricCounters, MetricTimers};
use crate::store::{AggregateStore, StoreStats};

/// The smallest flush interval the ticker accepts.
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Aggregator for counters, gauges and timers.
///
/// Metrics are merged into an [`AggregateStore`] owned by the service. Once per
/// [`flush_interval`](AggregatorConfig::flush_interval), the store is reduced into a [`Snapshot`]
/// which is sent to the receiver as [`FlushMetrics`], even if the snapshot is empty.
///
/// Ingestion and flushes are handled on the same task, so every metric is reported in exactly one
/// flush.
#[derive(Debug)]
pub enum Aggregator {
    /// Merge decoded metrics into the store.
    MergeMetrics(MergeMetrics),
    /// Returns the number of keys held in the store.
    StatsInquiry(StatsInquiry, Sender<StoreStats>),
}

impl Aggregator {
    /// Returns the name of the message variant.
    fn variant(&self) -> &'static str {
        match self {
            Aggregator::MergeMetrics(_) => "MergeMetrics",
            Aggregator::StatsInquiry(_, _) => "StatsInquiry",
        }
    }
}

impl Interface for Aggregator {}

impl FromMessage<MergeMetrics> for Aggregator {
    type Response = NoResponse;

    fn from_message(message: MergeMetrics, _: ()) -> Self {
        Self::MergeMetrics(message)
    }
}

impl FromMessage<StatsInquiry> for Aggregator {
    type Response = AsyncResponse<StoreStats>;

    fn from_message(message: StatsInquiry, sender: Sender<StoreStats>) -> Self {
        Self::StatsInquiry(message, sender)
    }
}

/// A message containing decoded metrics to be merged into the aggregator.
#[derive(Debug)]
pub struct MergeMetrics {
    /// The metrics to merge.
    pub metrics: Vec<Metric>,
}

/// Requests the current [`StoreStats`] of the aggregator.
#[derive(Debug)]
pub struct StatsInquiry;

/// A message containing the result of one flush.
#[derive(Clone, Debug)]
pub struct FlushMetrics {
    /// The time of the flush.
    pub timestamp: UnixTimestamp,
    /// The reduced metrics.
    pub snapshot: Arc<Snapshot>,
}

/// Service implementing the [`Aggregator`] interface.
pub struct AggregatorService {
    config: AggregatorConfig,
    store: AggregateStore,
    shutdown: ShutdownHandle,
    receiver: Option<Recipient<FlushMetrics, NoResponse>>,
}

impl AggregatorService {
    /// Create a new aggregator service and connect it to `receiver`.
    ///
    /// The aggregator starts with an empty store and flushes to the receiver in regular intervals
    /// based on the given `config`. It stops once `shutdown` is notified.
    pub fn new(
        config: AggregatorConfig,
        shutdown: ShutdownHandle,
        receiver: Option<Recipient<FlushMetrics, NoResponse>>,
    ) -> Self {
        Self {
            config,
            store: AggregateStore::new(),
            shutdown,
            receiver,
        }
    }

    fn try_flush(&mut self) {
        let timestamp = UnixTimestamp::now();
        let snapshot = metric!(timer(MetricTimers::FlushDuration), {
            catch_reduce(|| reduce(&mut self.store, timestamp, &self.config))
        });

        let Some(snapshot) = snapshot else {
            return;
        };

        tally_log::trace!("flushing {} metrics to receiver", snapshot.len());

        if let Some(ref receiver) = self.receiver {
            receiver.send(FlushMetrics {
                timestamp,
                snapshot: Arc::new(snapshot),
            })
        }
    }

    fn handle_merge_metrics(&mut self, message: MergeMetrics) {
        let now = UnixTimestamp::now();
        for metric in &message.metrics {
            metric!(
                counter(MetricCounters::Received) += 1,
                ty = metric.value.ty().as_str()
            );
            self.store.insert(metric, now);
        }
    }

    fn handle_message(&mut self, message: Aggregator) {
        let ty = message.variant();
        tally_log::trace!("aggregator handling {ty}");

        match message {
            Aggregator::MergeMetrics(message) => self.handle_merge_metrics(message),
            Aggregator::StatsInquiry(_, sender) => sender.send(self.store.stats()),
        }
    }

    fn handle_shutdown(&mut self, message: Shutdown) {
        tally_log::debug!(timeout = ?message.timeout, "aggregator shutting down");
        if self.config.flush_on_shutdown {
            self.try_flush();
        }
    }
}

/// Runs a reduction, logging a panic instead of unwinding into the service loop.
fn catch_reduce(f: impl FnOnce() -> Snapshot) -> Option<Snapshot> {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(snapshot) => Some(snapshot),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("unknown panic");
            tally_log::error!(panic = message, "metrics reduction panicked, skipping flush");
            None
        }
    }
}

impl Service for AggregatorService {
    type Interface = Aggregator;

    fn spawn_handler(mut self, mut rx: Receiver<Self::Interface>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.flush_interval().max(MIN_FLUSH_INTERVAL);
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut shutdown = self.shutdown.clone();

            loop {
                tokio::select! {
                    biased;

                    _ = ticker.tick() => self.try_flush(),
                    Some(message) = rx.recv() => self.handle_message(message),
                    shutdown = shutdown.notified() => {
                        self.handle_shutdown(shutdown);
                        break;
                    }

                    else => break,
                }
            }

            tally_log::info!("aggregator stopped");
        })
    }
}

impl Drop for AggregatorService {
    fn drop(&mut self) {
        let stats = self.store.stats();
        if stats.total() > 0 {
            tally_log::debug!("metrics aggregator dropping {} keys", stats.total());
        }
    }
}

#[cfg(test)]
mod tests {
    use tally_system::Controller;

    use super::*;

    struct TestInterface(FlushMetrics);

    impl Interface for TestInterface {}

    impl FromMessage<FlushMetrics> for TestInterface {
        type Response = NoResponse;

        fn from_message(message: FlushMetrics, _: ()) -> Self {
            Self(message)
        }
    }

    fn test_receiver() -> (
        Recipient<FlushMetrics, NoResponse>,
        JoinHandle<Vec<Arc<Snapshot>>>,
    ) {
        let (addr, handle) = tally_test::mock_service(
            "flush_receiver",
            Vec::new(),
            |snapshots: &mut Vec<Arc<Snapshot>>, message: TestInterface| {
                snapshots.push(message.0.snapshot);
            },
        );

        (addr.recipient(), handle)
    }

    fn merge(data: &str) -> MergeMetrics {
        MergeMetrics {
            metrics: Metric::parse_all(data.as_bytes())
                .collect::<Result<_, _>>()
                .unwrap(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_after_interval() {
        tally_test::setup();

        let controller = Controller::new();
        let (recipient, receiver) = test_receiver();
        let config = AggregatorConfig::default();
        let (aggregator, handle) =
            AggregatorService::new(config, controller.shutdown_handle(), Some(recipient))
                .start_joinable();

        aggregator.send(merge("gorets:1|c\ngorets:1|c|@0.1\nglork:320|ms\ngaugor:333|g"));

        let stats = aggregator.send(StatsInquiry).await.unwrap();
        assert_eq!(
            stats,
            StoreStats {
                counters: 1,
                gauges: 1,
                timers: 1,
            }
        );

        // The first flush happens one interval after start.
        tokio::time::sleep(Duration::from_millis(9900)).await;
        assert_eq!(aggregator.send(StatsInquiry).await.unwrap().total(), 3);
        tokio::time::sleep(Duration::from_millis(200)).await;

        controller.shutdown(None);
        handle.await.unwrap();

        let snapshots = receiver.await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].counters.get("gorets"), Some(&1.1));
        assert_eq!(snapshots[0].gauges.get("gaugor"), Some(&333.0));
        assert_eq!(snapshots[0].timers["glork"].count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_flushes_delivered() {
        tally_test::setup();

        let controller = Controller::new();
        let (receiver, flushes) = tally_test::mock_recorder::<TestInterface>("flush_receiver");
        let config = AggregatorConfig {
            flush_interval: 1000,
            ..Default::default()
        };
        let (_aggregator, handle) = AggregatorService::new(
            config,
            controller.shutdown_handle(),
            Some(receiver.recipient()),
        )
        .start_joinable();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        controller.shutdown(None);
        handle.await.unwrap();

        let flushes = flushes.await.unwrap();
        assert_eq!(flushes.len(), 2);
        assert!(flushes.iter().all(|flush| flush.0.snapshot.is_empty()));
        assert!(flushes[0].0.timestamp <= flushes[1].0.timestamp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_on_shutdown() {
        tally_test::setup();

        let controller = Controller::new();
        let (recipient, receiver) = test_receiver();
        let config = AggregatorConfig {
            flush_on_shutdown: true,
            ..Default::default()
        };
        let (aggregator, handle) =
            AggregatorService::new(config, controller.shutdown_handle(), Some(recipient))
                .start_joinable();

        // Queued metrics are merged before the shutdown is handled.
        aggregator.send(merge("hits:3|c"));
        controller.shutdown(Some(Duration::from_secs(1)));
        handle.await.unwrap();

        let snapshots = receiver.await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].counters.get("hits"), Some(&0.3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_flush_on_shutdown() {
        tally_test::setup();

        let controller = Controller::new();
        let (recipient, receiver) = test_receiver();
        let (aggregator, handle) = AggregatorService::new(
            AggregatorConfig::default(),
            controller.shutdown_handle(),
            Some(recipient),
        )
        .start_joinable();

        aggregator.send(merge("hits:3|c"));
        controller.shutdown(None);
        handle.await.unwrap();

        assert!(receiver.await.unwrap().is_empty());
    }

    #[test]
    fn test_received_metric() {
        let controller = Controller::new();
        let mut service = AggregatorService::new(
            AggregatorConfig::default(),
            controller.shutdown_handle(),
            None,
        );

        let captures = tally_statsd::with_capturing_test_client(|| {
            service.handle_merge_metrics(merge("a:1|c\nb:2|ms"));
        });

        assert_eq!(
            captures,
            ["metrics.received:1|c|#ty:c", "metrics.received:1|c|#ty:ms"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_metric_flushed_once() {
        tally_test::setup();

        let controller = Controller::new();
        let (recipient, receiver) = test_receiver();
        let config = AggregatorConfig {
            flush_interval: 1000,
            no_aggregate_counters: true,
            flush_on_shutdown: true,
            ..Default::default()
        };
        let (aggregator, handle) =
            AggregatorService::new(config, controller.shutdown_handle(), Some(recipient))
                .start_joinable();

        // Ingestion interleaves with seven ticks.
        for _ in 0..100 {
            aggregator.send(merge("hits:1|c"));
            tokio::time::sleep(Duration::from_millis(70)).await;
        }

        controller.shutdown(Some(Duration::from_secs(1)));
        handle.await.unwrap();

        let snapshots = receiver.await.unwrap();
        assert!(snapshots.len() >= 7);

        let total: f64 = snapshots
            .iter()
            .filter_map(|snapshot| snapshot.counters.get("hits"))
            .sum();
        assert_eq!(total, 100.0);
    }

    #[test]
    fn test_catch_reduce() {
        let mut store = AggregateStore::new();
        store.record_gauge("gaugor", 333.0, UnixTimestamp::from_secs(42));

        let snapshot = catch_reduce(|| {
            reduce(
                &mut store,
                UnixTimestamp::from_secs(42),
                &AggregatorConfig::default(),
            )
        });
        assert_eq!(snapshot.unwrap().gauges.get("gaugor"), Some(&333.0));

        assert!(catch_reduce(|| panic!("corrupted store")).is_none());
    }
}
