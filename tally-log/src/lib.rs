//! Logging for Tally.
//!
//! All crates log through the macros re-exported here: [`error!`], [`warn!`], [`info!`],
//! [`debug!`] and [`trace!`]. They accept format strings like [`println!`] and structured fields
//! like `tracing` does.
//!
//! # Conventions
//!
//! Messages start lowercase and have no trailing punctuation. The level is chosen as follows:
//!
//! - [`error!`]: something failed and needs attention, for instance a sink that rejected a flush.
//! - [`warn!`]: degraded but working, for instance a shutdown that timed out.
//! - [`info!`]: lifecycle events such as binding the socket or stopping a service.
//! - [`debug!`]: per-flush and per-datagram details, such as rejected lines.
//! - [`trace!`]: everything else.
//!
//! Errors are attached as a field so that subscribers can render their source chain:
//!
//! ```
//! let error = std::io::Error::other("connection refused");
//! tally_log::error!(
//!     error = &error as &dyn std::error::Error,
//!     sink = "graphite",
//!     "failed to deliver metrics",
//! );
//! ```
//!
//! Where a string is needed instead, [`LogError`] formats an error along with its causes.
//!
//! # Setup
//!
//! The binary calls `init` with the `logging` section of its configuration, available with the
//! `init` feature. Tests call [`init_test!`] with the `test` feature instead, which captures the
//! logs of the calling crate in the test output.

#![warn(missing_docs)]

#[cfg(feature = "init")]
mod setup;
#[cfg(feature = "init")]
pub use setup::*;

#[cfg(feature = "test")]
pub use test::*;

mod utils;
pub use utils::*;

// Expose the minimal log facade.
#[doc(inline)]
pub use tracing::{debug, error, info, trace, warn};
