//! Internal telemetry for Tally.
//!
//! Tally measures itself, for instance the number of received metrics or the time it takes to
//! deliver a flush to a sink, and reports these measurements to a statsd server. This is
//! independent of the metrics Tally aggregates for its clients. Since timers are sent as `|ms`, one
//! Tally instance can aggregate the telemetry of another.
//!
//! ## Defining Metrics
//!
//! Metric names are declared by implementing one of [`CounterMetric`], [`GaugeMetric`] or
//! [`TimerMetric`] on an enum. The traits only provide the name, but they ensure that a metric is
//! always recorded with the type it was declared for.
//!
//! ## Recording Metrics
//!
//! Metrics are recorded with the [`metric!`] macro. Until [`init`] has been called, recording is a
//! no-op:
//!
//! ```
//! use tally_statsd::{CounterMetric, metric};
//!
//! enum ListenerCounters {
//!     Datagrams,
//! }
//!
//! impl CounterMetric for ListenerCounters {
//!     fn name(&self) -> &'static str {
//!         match self {
//!             Self::Datagrams => "server.datagrams",
//!         }
//!     }
//! }
//!
//! metric!(counter(ListenerCounters::Datagrams) += 1);
//! ```
//!
//! ## Initializing the Client
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use tally_statsd::MetricsClientConfig;
//!
//! tally_statsd::init(MetricsClientConfig {
//!     prefix: "tally",
//!     host: "127.0.0.1:8125",
//!     default_tags: BTreeMap::new(),
//! })
//! .ok();
//! ```

#![warn(missing_docs)]

mod client;

pub use self::client::*;

/// Re-exports for the [`metric!`] macro.
#[doc(hidden)]
pub mod _pred {
    pub use cadence::prelude::*;
}

/// A metric that counts events.
///
/// Counters are sent as deltas and summed up by the statsd server.
///
/// ```
/// use tally_statsd::{CounterMetric, metric};
///
/// struct Rejected;
///
/// impl CounterMetric for Rejected {
///     fn name(&self) -> &'static str {
///         "rejected"
///     }
/// }
///
/// let rejected_lines = 3;
/// metric!(counter(Rejected) += rejected_lines);
/// metric!(counter(Rejected) += 1, reason = "utf8");
/// metric!(counter(Rejected) -= 1);
/// ```
pub trait CounterMetric {
    /// Returns the name of the counter.
    fn name(&self) -> &'static str;
}

/// A metric that reports the current value of something, such as the size of a queue.
///
/// ```
/// use tally_statsd::{GaugeMetric, metric};
///
/// struct StoreKeys;
///
/// impl GaugeMetric for StoreKeys {
///     fn name(&self) -> &'static str {
///         "store.keys"
///     }
/// }
///
/// metric!(gauge(StoreKeys) = 42u64, namespace = "counters");
/// ```
pub trait GaugeMetric {
    /// Returns the name of the gauge.
    fn name(&self) -> &'static str;
}

/// A metric that measures durations in milliseconds.
///
/// ```
/// use std::time::Instant;
/// use tally_statsd::{TimerMetric, metric};
///
/// struct Delivery;
///
/// impl TimerMetric for Delivery {
///     fn name(&self) -> &'static str {
///         "delivery"
///     }
/// }
///
/// # fn deliver() -> usize { 0 }
/// let start = Instant::now();
/// deliver();
/// metric!(timer(Delivery) = start.elapsed(), sink = "console");
///
/// // Time a block and keep its result.
/// let delivered = metric!(timer(Delivery), sink = "graphite", { deliver() });
/// # let _ = delivered;
/// ```
pub trait TimerMetric {
    /// Returns the name of the timer.
    fn name(&self) -> &'static str;
}

/// Records a metric with the current client.
///
/// Tags are given as `key = value` pairs after the metric. Keys may contain dots. Counter deltas
/// of zero are not sent.
#[macro_export]
macro_rules! metric {
    (counter($id:expr) += $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {{
        let value: i64 = $value;
        if value != 0 {
            $crate::metric!(@send count_with_tags, $crate::CounterMetric::name(&$id), value $(, $($k).* = $v)*);
        }
    }};

    (counter($id:expr) -= $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {{
        let value: i64 = $value;
        if value != 0 {
            $crate::metric!(@send count_with_tags, $crate::CounterMetric::name(&$id), -value $(, $($k).* = $v)*);
        }
    }};

    (gauge($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::metric!(@send gauge_with_tags, $crate::GaugeMetric::name(&$id), $value $(, $($k).* = $v)*)
    };

    (timer($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::metric!(@send time_with_tags, $crate::TimerMetric::name(&$id), $value $(, $($k).* = $v)*)
    };

    (timer($id:expr), $($($k:ident).* = $v:expr,)* $block:block) => {{
        let start = ::std::time::Instant::now();
        let result = $block;
        $crate::metric!(timer($id) = start.elapsed() $(, $($k).* = $v)*);
        result
    }};

    (@send $method:ident, $name:expr, $value:expr $(, $($k:ident).* = $v:expr)*) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.$method($name, $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };
}
