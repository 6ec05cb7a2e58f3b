//! Test support for the courier workspace.
//!
//! Holds the deterministic clock and fixture builders shared by the
//! per-crate suites. Everything here is hermetic; nothing reaches the
//! network or a database.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod time;

pub use fixtures::{claim_envelope, pending_record};
pub use time::TestClock;
