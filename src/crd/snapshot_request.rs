//! SnapshotRequest Custom Resource Definition

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label key on PersistentVolumeClaims that a request's selector is matched
/// against (single equality match).
pub const SELECTOR_LABEL: &str = "snapshotpvcselector";

/// SnapshotRequest resource specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "snapshot.db.dev",
    version = "v1alpha1",
    kind = "SnapshotRequest",
    plural = "snapshotrequests",
    singular = "snapshotrequest",
    shortname = "snapreq",
    namespaced,
    status = "SnapshotRequestStatus",
    printcolumn = r#"{"name": "Selector", "type": "string", "jsonPath": ".spec.pvcSelector"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Snapshots", "type": "integer", "jsonPath": ".status.snapshotsCreated"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRequestSpec {
    /// Selector value matched against the `snapshotpvcselector` label of
    /// PersistentVolumeClaims in the request's namespace
    pub pvc_selector: String,

    /// VolumeSnapshotClass for the created snapshots.
    /// Defaults to the operator's built-in class when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_class: Option<String>,
}

/// Processing phase of a SnapshotRequest
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum SnapshotPhase {
    /// Observed but not yet picked up by a worker
    #[default]
    Pending,
    /// A worker is creating snapshots for the matched claims
    InProgress,
    /// All matched claims were snapshotted (including the zero-match case)
    Completed,
    /// Terminally failed after exhausting retries, or spec validation failed
    Failed,
}

/// SnapshotRequest status, written back after each processing cycle
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRequestStatus {
    /// Current phase (Pending, InProgress, Completed, Failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<SnapshotPhase>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Claims matched by the selector in the last cycle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_claims: Option<i32>,

    /// Snapshots successfully created in the last cycle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshots_created: Option<i32>,

    /// Claims whose snapshot creation failed in the last cycle
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_claims: Vec<String>,

    /// Last status update time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

impl SnapshotRequest {
    /// Whether this request has already reached a terminal phase.
    /// Terminal requests are never re-enqueued (fire-once processing).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status.as_ref().and_then(|s| s.phase),
            Some(SnapshotPhase::Completed) | Some(SnapshotPhase::Failed)
        )
    }
}
