//! Prometheus metrics for the PVC Snapshot Operator

pub mod prometheus;

pub use prometheus::*;
