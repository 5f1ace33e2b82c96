//! Configuration for the Tally CLI and server.
//!
//! The configuration is read from `config.yml` in a config folder, see [`Config::from_path`].
//! All sections are optional and fall back to defaults:
//!
//! ```yaml
//! tally:
//!   host: 0.0.0.0
//!   port: 8125
//! aggregator:
//!   flush_interval: 10000
//!   pct_threshold: 90
//! sinks:
//!   - type: console
//!   - type: graphite
//!     host: graphite.internal
//! logging:
//!   level: info
//! ```
//!
//! Individual values can be overridden from the command line or environment through
//! [`OverridableConfig`].

#![warn(missing_docs)]

mod config;

pub use crate::config::*;
