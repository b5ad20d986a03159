//! Per-request reconciliation: live fetch, claim matching, snapshot fan-out

use chrono::Utc;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, ResourceExt};
use tracing::{info, instrument, warn};

use crate::adapters::snapshot_builder;
use crate::controllers::Context;
use crate::crd::{
    SnapshotPhase, SnapshotRequest, SnapshotRequestStatus, VolumeSnapshot, SELECTOR_LABEL,
};
use crate::metrics::{SNAPSHOTS_CREATED, SNAPSHOT_CREATE_FAILURES};
use crate::{Error, Result};

/// Outcome of one successful processing cycle
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Claims matched by the selector
    pub matched: usize,
    /// Snapshots created
    pub created: usize,
}

/// Split a work item key into `(namespace, name)`.
pub fn split_key(key: &str) -> Result<(&str, &str)> {
    match key.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((ns, name))
        }
        _ => Err(Error::InvalidKey(key.to_string())),
    }
}

/// Validate a SnapshotRequest spec. Failures are terminal, never retried.
pub fn validate(request: &SnapshotRequest) -> Result<()> {
    let selector = &request.spec.pvc_selector;

    if selector.is_empty() {
        return Err(Error::ValidationError(
            "pvcSelector cannot be empty".to_string(),
        ));
    }

    // The selector is compared against a label value, so it must be one.
    if selector.len() > 63 {
        return Err(Error::ValidationError(
            "pvcSelector must be at most 63 characters".to_string(),
        ));
    }
    if !selector
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(Error::ValidationError(format!(
            "pvcSelector {:?} is not a valid label value",
            selector
        )));
    }

    Ok(())
}

/// Equality label filter selecting the claims a request targets.
pub fn selector_label(selector: &str) -> String {
    format!("{}={}", SELECTOR_LABEL, selector)
}

/// Whether a claim carries the designated selector label with this value.
pub fn claim_matches(claim: &PersistentVolumeClaim, selector: &str) -> bool {
    claim
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(SELECTOR_LABEL))
        .is_some_and(|value| value == selector)
}

/// List every claim in the namespace whose selector label equals `selector`.
/// Zero matches is an empty list, not an error.
pub async fn matching_claims(
    ctx: &Context,
    namespace: &str,
    selector: &str,
) -> Result<Vec<PersistentVolumeClaim>> {
    let claims: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), namespace);
    let params = ListParams::default().labels(&selector_label(selector));

    let list = claims
        .list(&params)
        .await
        .map_err(|e| Error::KubeError(format!("Failed to list PersistentVolumeClaims: {}", e)))?;

    Ok(list
        .items
        .into_iter()
        .filter(|claim| claim_matches(claim, selector))
        .collect())
}

/// Create one VolumeSnapshot for the claim. No internal retry.
pub async fn create_snapshot(
    ctx: &Context,
    request: &SnapshotRequest,
    claim: &PersistentVolumeClaim,
) -> Result<String> {
    let namespace = claim.namespace().unwrap_or_default();
    let claim_name = claim.name_any();

    let name = ctx.namer.name_for(&claim_name, Utc::now());
    let snapshot = snapshot_builder::build_volume_snapshot(request, claim, &name);

    let snapshots: Api<VolumeSnapshot> = Api::namespaced(ctx.client.clone(), &namespace);
    snapshots
        .create(&PostParams::default(), &snapshot)
        .await
        .map_err(|e| {
            Error::KubeError(format!(
                "Failed to create snapshot for claim {}: {}",
                claim_name, e
            ))
        })?;

    info!(claim = %claim_name, snapshot = %name, "Volume snapshot taken");
    Ok(name)
}

/// Process one queued key end to end.
///
/// The request is fetched live rather than read from any cache; a request
/// deleted between enqueue and processing yields `Ok(None)`. A failure
/// creating the snapshot for one claim does not stop the remaining claims.
#[instrument(skip(ctx), fields(key = %key))]
pub async fn process(ctx: &Context, key: &str) -> Result<Option<ProcessOutcome>> {
    let (namespace, name) = split_key(key)?;

    let requests: Api<SnapshotRequest> = Api::namespaced(ctx.client.clone(), namespace);
    let request = requests
        .get_opt(name)
        .await
        .map_err(|e| Error::KubeError(format!("Failed to fetch SnapshotRequest {}: {}", key, e)))?;

    let Some(request) = request else {
        info!("SnapshotRequest no longer exists, nothing to do");
        return Ok(None);
    };

    validate(&request)?;

    update_status(
        &requests,
        name,
        SnapshotRequestStatus {
            phase: Some(SnapshotPhase::InProgress),
            message: Some("Creating snapshots for matched claims".to_string()),
            last_update_time: Some(Utc::now()),
            ..Default::default()
        },
    )
    .await?;

    let claims = matching_claims(ctx, namespace, &request.spec.pvc_selector).await?;
    let matched = claims.len();
    info!(matched, selector = %request.spec.pvc_selector, "Matched claims");

    let mut failed_claims = Vec::new();
    let mut created = 0usize;
    for claim in &claims {
        match create_snapshot(ctx, &request, claim).await {
            Ok(_) => {
                created += 1;
                SNAPSHOTS_CREATED.with_label_values(&[namespace]).inc();
            }
            Err(e) => {
                // Continue with the remaining claims in the batch.
                warn!(claim = %claim.name_any(), "Snapshot creation failed: {}", e);
                SNAPSHOT_CREATE_FAILURES
                    .with_label_values(&[namespace])
                    .inc();
                failed_claims.push(claim.name_any());
            }
        }
    }

    if !failed_claims.is_empty() {
        let failed = failed_claims.len();
        update_status(
            &requests,
            name,
            SnapshotRequestStatus {
                phase: Some(SnapshotPhase::InProgress),
                message: Some(format!(
                    "Created {} of {} snapshots, will retry",
                    created, matched
                )),
                matched_claims: Some(matched as i32),
                snapshots_created: Some(created as i32),
                failed_claims,
                last_update_time: Some(Utc::now()),
            },
        )
        .await?;
        return Err(Error::PartialFailure { matched, failed });
    }

    let message = if matched == 0 {
        "No claims matched the selector".to_string()
    } else {
        format!("Created {} snapshots", created)
    };
    update_status(
        &requests,
        name,
        SnapshotRequestStatus {
            phase: Some(SnapshotPhase::Completed),
            message: Some(message),
            matched_claims: Some(matched as i32),
            snapshots_created: Some(created as i32),
            failed_claims: Vec::new(),
            last_update_time: Some(Utc::now()),
        },
    )
    .await?;

    Ok(Some(ProcessOutcome { matched, created }))
}

/// Mark a request terminally failed after retries are exhausted or its spec
/// failed validation. Best effort: the request may already be gone.
pub async fn mark_failed(ctx: &Context, key: &str, reason: &Error) {
    let Ok((namespace, name)) = split_key(key) else {
        return;
    };
    let requests: Api<SnapshotRequest> = Api::namespaced(ctx.client.clone(), namespace);
    let status = SnapshotRequestStatus {
        phase: Some(SnapshotPhase::Failed),
        message: Some(reason.to_string()),
        last_update_time: Some(Utc::now()),
        ..Default::default()
    };
    if let Err(e) = update_status(&requests, name, status).await {
        warn!(key = %key, "Failed to record terminal failure: {}", e);
    }
}

/// Merge-patch the request's status subresource.
async fn update_status(
    requests: &Api<SnapshotRequest>,
    name: &str,
    status: SnapshotRequestStatus,
) -> Result<()> {
    let patch = serde_json::json!({ "status": status });
    requests
        .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| Error::KubeError(format!("Failed to update status for {}: {}", name, e)))?;
    Ok(())
}
