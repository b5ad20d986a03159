//! PVC Snapshot Operator
//!
//! Watches SnapshotRequest custom resources and creates a CSI VolumeSnapshot
//! for every PersistentVolumeClaim matched by the request's selector label.

pub mod adapters;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod reconcilers;

pub use error::{Error, Result};
