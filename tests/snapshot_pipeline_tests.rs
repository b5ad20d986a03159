//! Tests for request validation, claim matching, and snapshot construction

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use pvc_snapshot_operator::adapters::snapshot_builder::{
    build_volume_snapshot, SnapshotNamer, DEFAULT_SNAPSHOT_CLASS,
};
use pvc_snapshot_operator::controllers::snapshot_controller::{SeenRequests, WatchNotification};
use pvc_snapshot_operator::crd::{
    SnapshotPhase, SnapshotRequest, SnapshotRequestSpec, SnapshotRequestStatus, SELECTOR_LABEL,
};
use pvc_snapshot_operator::reconcilers::snapshot;

// ============================================================================
// Test Helpers
// ============================================================================

fn claim(name: &str, namespace: &str, selector: Option<&str>) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: selector.map(|s| {
                BTreeMap::from([(SELECTOR_LABEL.to_string(), s.to_string())])
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn request(namespace: &str, selector: &str, class: Option<&str>) -> SnapshotRequest {
    let mut request = SnapshotRequest::new(
        "test-request",
        SnapshotRequestSpec {
            pvc_selector: selector.to_string(),
            snapshot_class: class.map(str::to_string),
        },
    );
    request.metadata.namespace = Some(namespace.to_string());
    request
}

// ============================================================================
// Work Item Keys
// ============================================================================

#[test]
fn split_key_accepts_namespace_slash_name() {
    assert_eq!(snapshot::split_key("ns1/req1").unwrap(), ("ns1", "req1"));
}

#[test]
fn split_key_rejects_malformed_keys() {
    assert!(snapshot::split_key("no-slash").is_err());
    assert!(snapshot::split_key("a/b/c").is_err());
    assert!(snapshot::split_key("/name-only").is_err());
    assert!(snapshot::split_key("ns-only/").is_err());
    assert!(snapshot::split_key("").is_err());
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn validate_accepts_label_value_selectors() {
    assert!(snapshot::validate(&request("ns1", "db", None)).is_ok());
    assert!(snapshot::validate(&request("ns1", "app-db_1.x", None)).is_ok());
}

#[test]
fn validate_rejects_empty_selector() {
    let result = snapshot::validate(&request("ns1", "", None));
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("empty"));
}

#[test]
fn validate_rejects_overlong_selector() {
    let selector = "x".repeat(64);
    assert!(snapshot::validate(&request("ns1", &selector, None)).is_err());
}

#[test]
fn validate_rejects_non_label_characters() {
    assert!(snapshot::validate(&request("ns1", "app=db", None)).is_err());
    assert!(snapshot::validate(&request("ns1", "a b", None)).is_err());
}

#[test]
fn validation_errors_are_not_retryable() {
    let err = snapshot::validate(&request("ns1", "", None)).unwrap_err();
    assert!(!err.is_retryable());
}

// ============================================================================
// Selector Matching
// ============================================================================

#[test]
fn selector_label_builds_an_equality_filter() {
    assert_eq!(snapshot::selector_label("db"), "snapshotpvcselector=db");
}

#[test]
fn claim_matches_requires_exact_label_equality() {
    assert!(snapshot::claim_matches(&claim("pvc-a", "ns1", Some("db")), "db"));
    assert!(!snapshot::claim_matches(&claim("pvc-b", "ns1", Some("web")), "db"));
    assert!(!snapshot::claim_matches(&claim("pvc-c", "ns1", None), "db"));
}

#[test]
fn only_claims_with_the_matching_label_are_selected() {
    let claims = vec![
        claim("pvc-a", "ns1", Some("db")),
        claim("pvc-b", "ns1", Some("web")),
        claim("pvc-c", "ns1", None),
    ];

    let matched: Vec<&PersistentVolumeClaim> = claims
        .iter()
        .filter(|c| snapshot::claim_matches(c, "db"))
        .collect();

    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].metadata.name.as_deref(), Some("pvc-a"));
}

#[test]
fn zero_matching_claims_is_an_empty_result() {
    let claims = vec![claim("pvc-b", "ns1", Some("web"))];
    let matched: Vec<&PersistentVolumeClaim> = claims
        .iter()
        .filter(|c| snapshot::claim_matches(c, "db"))
        .collect();
    assert!(matched.is_empty());
}

// ============================================================================
// Snapshot Naming
// ============================================================================

#[test]
fn snapshot_name_is_claim_plus_second_timestamp() {
    let namer = SnapshotNamer::new();
    let at = Utc.with_ymd_and_hms(2026, 8, 26, 12, 0, 0).unwrap();
    assert_eq!(namer.name_for("pvc-a", at), "pvc-a-20260826120000");
}

#[test]
fn same_second_collision_gets_a_deterministic_ordinal_suffix() {
    let namer = SnapshotNamer::new();
    let at = Utc.with_ymd_and_hms(2026, 8, 26, 12, 0, 0).unwrap();

    assert_eq!(namer.name_for("pvc-a", at), "pvc-a-20260826120000");
    assert_eq!(namer.name_for("pvc-a", at), "pvc-a-20260826120000-2");
    assert_eq!(namer.name_for("pvc-a", at), "pvc-a-20260826120000-3");
}

#[test]
fn a_new_second_resets_the_collision_suffix() {
    let namer = SnapshotNamer::new();
    let first = Utc.with_ymd_and_hms(2026, 8, 26, 12, 0, 0).unwrap();
    let second = Utc.with_ymd_and_hms(2026, 8, 26, 12, 0, 1).unwrap();

    assert_eq!(namer.name_for("pvc-a", first), "pvc-a-20260826120000");
    assert_eq!(namer.name_for("pvc-a", first), "pvc-a-20260826120000-2");
    assert_eq!(namer.name_for("pvc-a", second), "pvc-a-20260826120001");
}

#[test]
fn collision_tracking_is_independent_per_claim() {
    let namer = SnapshotNamer::new();
    let at = Utc.with_ymd_and_hms(2026, 8, 26, 12, 0, 0).unwrap();

    assert_eq!(namer.name_for("pvc-a", at), "pvc-a-20260826120000");
    assert_eq!(namer.name_for("pvc-b", at), "pvc-b-20260826120000");
    assert_eq!(namer.name_for("pvc-a", at), "pvc-a-20260826120000-2");
}

// ============================================================================
// Snapshot Construction
// ============================================================================

#[test]
fn built_snapshot_references_the_source_claim() {
    let request = request("ns1", "db", None);
    let claim = claim("pvc-a", "ns1", Some("db"));

    let snap = build_volume_snapshot(&request, &claim, "pvc-a-20260826120000");

    assert_eq!(snap.metadata.name.as_deref(), Some("pvc-a-20260826120000"));
    assert_eq!(snap.metadata.namespace.as_deref(), Some("ns1"));
    assert_eq!(
        snap.spec.source.persistent_volume_claim_name.as_deref(),
        Some("pvc-a")
    );
}

#[test]
fn built_snapshot_uses_the_default_class_when_unset() {
    let request = request("ns1", "db", None);
    let claim = claim("pvc-a", "ns1", Some("db"));

    let snap = build_volume_snapshot(&request, &claim, "pvc-a-20260826120000");
    assert_eq!(
        snap.spec.volume_snapshot_class_name.as_deref(),
        Some(DEFAULT_SNAPSHOT_CLASS)
    );
}

#[test]
fn built_snapshot_honors_the_request_class() {
    let request = request("ns1", "db", Some("fast-snapclass"));
    let claim = claim("pvc-a", "ns1", Some("db"));

    let snap = build_volume_snapshot(&request, &claim, "pvc-a-20260826120000");
    assert_eq!(
        snap.spec.volume_snapshot_class_name.as_deref(),
        Some("fast-snapclass")
    );
}

// ============================================================================
// Watch Observation
// ============================================================================

#[test]
fn a_request_is_observed_once_per_key() {
    let mut seen = SeenRequests::new();
    let request = request("ns1", "db", None);

    assert_eq!(
        seen.observe(&request),
        Some(WatchNotification::RequestAdded("ns1/test-request".to_string()))
    );
    // Re-list replays of the same live object are not new requests.
    assert_eq!(seen.observe(&request), None);
}

#[test]
fn deleted_then_recreated_request_is_observed_again() {
    let mut seen = SeenRequests::new();
    let request = request("ns1", "db", None);

    assert!(seen.observe(&request).is_some());
    seen.forget(&request);

    let recreated = request.clone();
    assert_eq!(
        seen.observe(&recreated),
        Some(WatchNotification::RequestAdded("ns1/test-request".to_string()))
    );
}

#[test]
fn terminal_requests_are_not_observed() {
    let mut seen = SeenRequests::new();
    let mut request = request("ns1", "db", None);
    request.status = Some(SnapshotRequestStatus {
        phase: Some(SnapshotPhase::Completed),
        ..Default::default()
    });

    assert_eq!(seen.observe(&request), None);
}

// ============================================================================
// Request Status
// ============================================================================

#[test]
fn phases_serialize_to_their_wire_names() {
    assert_eq!(
        serde_json::to_string(&SnapshotPhase::InProgress).unwrap(),
        "\"InProgress\""
    );
    assert_eq!(
        serde_json::to_string(&SnapshotPhase::Completed).unwrap(),
        "\"Completed\""
    );
}

#[test]
fn requests_without_status_are_not_terminal() {
    let request = request("ns1", "db", None);
    assert!(!request.is_terminal());
}

#[test]
fn completed_and_failed_requests_are_terminal() {
    for phase in [SnapshotPhase::Completed, SnapshotPhase::Failed] {
        let mut req = request("ns1", "db", None);
        req.status = Some(SnapshotRequestStatus {
            phase: Some(phase),
            ..Default::default()
        });
        assert!(req.is_terminal());
    }

    let mut req = request("ns1", "db", None);
    req.status = Some(SnapshotRequestStatus {
        phase: Some(SnapshotPhase::InProgress),
        ..Default::default()
    });
    assert!(!req.is_terminal());
}

#[test]
fn spec_deserializes_with_optional_snapshot_class() {
    let spec: SnapshotRequestSpec =
        serde_json::from_value(serde_json::json!({ "pvcSelector": "db" })).unwrap();
    assert_eq!(spec.pvc_selector, "db");
    assert!(spec.snapshot_class.is_none());

    let spec: SnapshotRequestSpec = serde_json::from_value(serde_json::json!({
        "pvcSelector": "db",
        "snapshotClass": "fast-snapclass",
    }))
    .unwrap();
    assert_eq!(spec.snapshot_class.as_deref(), Some("fast-snapclass"));
}
