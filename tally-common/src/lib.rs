//! Common utilities shared by the Tally crates.

#![warn(missing_docs)]

mod time;

pub use time::*;
