//! Utility functions for timestamp handling.

pub mod timestamps;

pub use timestamps::{add_duration, iso_timestamp, now, Timestamp};
