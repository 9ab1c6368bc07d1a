//! Shared utilities.
//!
//! File timestamps for staleness checks, hashing for download verification and test helpers.

pub mod hash;
pub mod timestamp;

#[cfg(test)]
pub mod testutil;
