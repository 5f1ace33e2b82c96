//! Metrics protocol, aggregation and flushing.
//!
//! Tally accepts metrics in the statsd line protocol. Each line submits one value:
//!
//! ```text
//! endpoint.hits:1|c|@0.1
//! endpoint.response_time:57|ms
//! queue.depth:12|g
//! ```
//!
//! # Metric Types
//!
//! - **Counters** (`c`) are summed up. A delta with sample rate `@r` counts `1 / r` times.
//! - **Gauges** (`g`) keep the last reported value.
//! - **Timers** (`ms`) collect duration samples that are summarized on flush.
//!
//! Names are sanitized with [`normalize_key`]. Lines that cannot be decoded are rejected
//! individually, see [`Metric::parse_all`].
//!
//! # Aggregation
//!
//! The [`AggregatorService`] owns an [`AggregateStore`] and merges all incoming metrics into it.
//! Once per flush interval, it calls [`reduce`] to produce a [`Snapshot`] and sends it to its
//! receiver as [`FlushMetrics`]:
//!
//! ```
//! use tally_common::UnixTimestamp;
//! use tally_metrics::{AggregateStore, AggregatorConfig, Metric, reduce};
//!
//! let now = UnixTimestamp::now();
//! let mut store = AggregateStore::new();
//! for metric in Metric::parse_all(b"hits:5|c\nhits:5|c") {
//!     store.insert(&metric.unwrap(), now);
//! }
//!
//! let config = AggregatorConfig::default();
//! let snapshot = reduce(&mut store, now, &config);
//! assert_eq!(snapshot.counters["hits"], 1.0); // per second over 10s
//! ```

#![warn(missing_docs)]

mod aggregatorservice;
mod config;
mod flush;
mod protocol;
mod statsd;
mod store;

pub use aggregatorservice::*;
pub use config::*;
pub use flush::*;
pub use protocol::*;
pub use store::*;
