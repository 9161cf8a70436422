//! Foundational low-level utilities shared across agbridge crates.
//!
//! Provides owner-only atomic file writes and time helpers used by the
//! credential store, session discovery, and token expiry checks.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::{ensure_private_dir, write_private_atomic};
pub use time_utils::{
    current_unix_timestamp, current_unix_timestamp_ms, expires_within_unix, humanize_age,
};
