//! Operational concerns: per-session metric counters.

pub mod metrics;

pub use metrics::*;
