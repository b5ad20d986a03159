//! Custom Resource Definitions for the PVC Snapshot Operator

mod snapshot_request;
mod volume_snapshot;

pub use snapshot_request::*;
pub use volume_snapshot::*;

use kube::CustomResourceExt;

/// Generate CRD YAML manifests for the resources this operator owns.
///
/// VolumeSnapshot is installed by the external CSI snapshotter and is
/// deliberately not emitted here.
pub fn generate_crds() -> Vec<String> {
    vec![serde_yaml::to_string(&SnapshotRequest::crd()).unwrap()]
}
