//! Foundational system components for Tally's services.
//!
//! Every long running component of Tally is a [`Service`]: a task that owns its state and
//! receives messages through an [`Addr`]. Services are stopped through a [`Controller`] that is
//! owned by whoever started them.

#![warn(missing_docs)]

mod controller;
mod service;

pub use self::controller::*;
pub use self::service::*;
