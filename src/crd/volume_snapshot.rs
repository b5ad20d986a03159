//! VolumeSnapshot type from the external CSI snapshotter
//!
//! The CRD itself (`snapshot.storage.k8s.io/v1`) is owned and installed by the
//! external-snapshotter; only the fields this operator writes are modeled.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// VolumeSnapshot resource specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "snapshot.storage.k8s.io",
    version = "v1",
    kind = "VolumeSnapshot",
    plural = "volumesnapshots",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSpec {
    /// VolumeSnapshotClass used to provision the snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,

    /// Data source of the snapshot
    pub source: VolumeSnapshotSource,
}

/// Source a VolumeSnapshot is taken from
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSource {
    /// Name of the PersistentVolumeClaim to snapshot, in the same namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim_name: Option<String>,
}
