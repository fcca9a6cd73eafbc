//! Test support for the tempdb crates
//!
//! Unified logging initialization, env-gated server urls for integration
//! tests, and unique-name helpers.

pub mod logging;
pub mod servers;
pub mod unique_helpers;
