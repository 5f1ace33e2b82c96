use std::cell::RefCell;
use std::collections::BTreeMap;
use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::Arc;

#[cfg(any(test, feature = "test"))]
use cadence::SpyMetricSink;
use cadence::{
    BufferedUdpMetricSink, ErrorKind, Metric, MetricBuilder, MetricError, QueuingMetricSink,
    StatsdClient,
};
use parking_lot::RwLock;

/// Number of metrics that can be queued for the background sender before new ones are dropped.
const MAX_QUEUED_METRICS: usize = 100_000;

/// A statsd client with tags that are attached to every metric.
#[derive(Debug)]
pub struct MetricsClient {
    /// The underlying cadence client.
    pub statsd_client: StatsdClient,
    /// Tags attached to every metric sent through this client.
    pub default_tags: BTreeMap<String, String>,
}

impl MetricsClient {
    /// Attaches the default tags and sends the metric.
    ///
    /// Errors are logged and otherwise ignored.
    #[inline]
    pub fn send_metric<'a, T>(&'a self, mut metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        for (key, value) in &self.default_tags {
            metric = metric.with_tag(key, value);
        }

        if let Err(error) = metric.try_send() {
            tally_log::error!(
                error = &error as &dyn std::error::Error,
                queue_capacity = MAX_QUEUED_METRICS,
                "failed to send internal metric",
            );
        }
    }
}

impl std::ops::Deref for MetricsClient {
    type Target = StatsdClient;

    fn deref(&self) -> &StatsdClient {
        &self.statsd_client
    }
}

/// Configuration for [`init`].
#[derive(Debug)]
pub struct MetricsClientConfig<'a, A> {
    /// Prepended to every metric name, separated by a dot.
    pub prefix: &'a str,
    /// Address of the statsd server.
    pub host: A,
    /// Tags attached to every metric.
    pub default_tags: BTreeMap<String, String>,
}

static GLOBAL_CLIENT: RwLock<Option<Arc<MetricsClient>>> = RwLock::new(None);

thread_local! {
    static THREAD_CLIENT: RefCell<Option<Arc<MetricsClient>>> =
        RefCell::new(GLOBAL_CLIENT.read().clone());
}

/// Installs `client` as the process wide metrics client.
///
/// Threads pick up the client the first time they record a metric. Threads that already recorded
/// metrics before keep their previous client, with the exception of the calling thread.
pub fn set_client(client: MetricsClient) {
    let client = Arc::new(client);
    *GLOBAL_CLIENT.write() = Some(client.clone());
    THREAD_CLIENT.with(|cell| cell.replace(Some(client)));
}

/// Reports internal metrics to the statsd server at `config.host`.
///
/// Metrics are queued and sent from a background thread, so recording a metric never blocks.
pub fn init<A: ToSocketAddrs>(config: MetricsClientConfig<A>) -> Result<(), MetricError> {
    let Some(addr) = config.host.to_socket_addrs()?.next() else {
        return Err(MetricError::from((
            ErrorKind::InvalidInput,
            "statsd host did not resolve to any address",
        )));
    };

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_nonblocking(true)?;

    let sink = BufferedUdpMetricSink::from(addr, socket)?;
    let sink = QueuingMetricSink::with_capacity(sink, MAX_QUEUED_METRICS);

    set_client(MetricsClient {
        statsd_client: StatsdClient::from_sink(config.prefix, sink),
        default_tags: config.default_tags,
    });

    tally_log::info!("reporting internal metrics to statsd at {addr}");
    Ok(())
}

/// Calls `f` with the metrics client of the current thread.
///
/// Returns the default value of `R` without calling `f` if no client is configured. Prefer the
/// [`metric!`](crate::metric) macro over calling this directly.
#[inline]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    THREAD_CLIENT.with(|cell| match cell.borrow().as_deref() {
        Some(client) => f(client),
        None => R::default(),
    })
}

/// Runs `f` with a client that records all metrics emitted on the current thread.
///
/// Returns the captured metrics in statsd line format, without a prefix. The previous client of
/// the thread is restored afterwards.
#[cfg(any(test, feature = "test"))]
pub fn with_capturing_test_client(f: impl FnOnce()) -> Vec<String> {
    let (rx, sink) = SpyMetricSink::new();
    let client = MetricsClient {
        statsd_client: StatsdClient::from_sink("", sink),
        default_tags: BTreeMap::new(),
    };

    let previous = THREAD_CLIENT.with(|cell| cell.replace(Some(Arc::new(client))));
    f();
    THREAD_CLIENT.with(|cell| cell.replace(previous));

    rx.try_iter()
        .map(|line| String::from_utf8_lossy(&line).into_owned())
        .collect()
}
