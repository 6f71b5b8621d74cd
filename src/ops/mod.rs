//! Operations and observability.
//!
//! - [`metrics`] - Index counters, gauges and Prometheus export

pub mod metrics;
