//! VolumeSnapshot construction and collision-free snapshot naming

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{SnapshotRequest, VolumeSnapshot, VolumeSnapshotSource, VolumeSnapshotSpec};

/// VolumeSnapshotClass used when a request does not name one
pub const DEFAULT_SNAPSHOT_CLASS: &str = "csi-hostpath-snapclass";

/// Second-granularity timestamp embedded in snapshot names
const NAME_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Derives `{claim}-{timestamp}` snapshot names and disambiguates repeats
/// within the same second with an ordinal suffix (`-2`, `-3`, ...).
///
/// Shared by all workers so the suffix sequence is deterministic per claim.
#[derive(Default)]
pub struct SnapshotNamer {
    last: Mutex<HashMap<String, (String, u32)>>,
}

impl SnapshotNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name for a snapshot of `claim` taken at `at`. The first name in a
    /// given second is `{claim}-{YYYYMMDDHHMMSS}`; subsequent names in the
    /// same second append `-2`, `-3`, and so on.
    pub fn name_for(&self, claim: &str, at: DateTime<Utc>) -> String {
        let base = format!("{}-{}", claim, at.format(NAME_TIMESTAMP_FORMAT));
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match last.get_mut(claim) {
            Some((prev, ordinal)) if *prev == base => {
                *ordinal += 1;
                format!("{}-{}", base, ordinal)
            }
            _ => {
                last.insert(claim.to_string(), (base.clone(), 1));
                base
            }
        }
    }
}

/// Build the VolumeSnapshot for one matched claim.
///
/// The snapshot lives in the claim's namespace and carries no owner reference:
/// snapshots are point-in-time records expected to outlive the request.
pub fn build_volume_snapshot(
    request: &SnapshotRequest,
    claim: &PersistentVolumeClaim,
    name: &str,
) -> VolumeSnapshot {
    let class = request
        .spec
        .snapshot_class
        .clone()
        .unwrap_or_else(|| DEFAULT_SNAPSHOT_CLASS.to_string());

    VolumeSnapshot {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: claim.namespace(),
            ..Default::default()
        },
        spec: VolumeSnapshotSpec {
            volume_snapshot_class_name: Some(class),
            source: VolumeSnapshotSource {
                persistent_volume_claim_name: Some(claim.name_any()),
            },
        },
    }
}
