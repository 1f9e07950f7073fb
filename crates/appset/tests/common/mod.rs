//! Shared test utilities for appset integration tests.
//!
//! - `TestHarness`: repository, configuration and output directories for a
//!   platform with three clusters, two locations and per-cluster addons

pub mod harness;

pub use harness::*;
