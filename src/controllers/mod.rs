//! Controller wiring: watch stream, work queue, and worker pool

pub mod snapshot_controller;

use kube::Client;
use std::sync::Arc;

use crate::adapters::snapshot_builder::SnapshotNamer;

/// Shared context handed to every component; the only place client handles
/// live (no process-wide singletons).
pub struct Context {
    /// Kubernetes client backing all typed Api handles
    pub client: Client,
    /// Shared snapshot namer, keeping collision suffixes deterministic
    pub namer: SnapshotNamer,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client) -> Arc<Self> {
        Arc::new(Self {
            client,
            namer: SnapshotNamer::new(),
        })
    }
}
