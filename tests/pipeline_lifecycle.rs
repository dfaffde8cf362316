//! End-to-end pipeline lifecycle tests against fake tools.

mod fixtures;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use apk_forge::service::{ForgeService, Retrieval};
use apkforge_protocol::ErrorKind;

use fixtures::{
    wait_for_empty_dir, LaneFixture, FAILING_TOOLS, LAZY_SIGNER_TOOLS, NOISY_TOOLS,
    NO_CONFIG_TOOLS, SLEEPY_TOOLS, STANDARD_TOOLS,
};

#[test]
fn round_trip_replaces_embedded_config() {
    let fixture = LaneFixture::new(STANDARD_TOOLS);
    let service = ForgeService::new(fixture.config.clone()).unwrap();

    let payload = json!({"apiUrl": "https://example.com"});
    let record = service
        .submit(Some("alice"), payload.clone(), None)
        .unwrap();

    assert_eq!(record.owner_id, "alice");
    // TTL is exactly creation + 1 hour (the default).
    assert_eq!(
        record.expires_at - record.created_at,
        chrono::Duration::seconds(3600)
    );

    let retrieval = service.retrieve(&record.artifact_id).unwrap();
    let path = match retrieval {
        Retrieval::LocalFile { path, .. } => path,
        Retrieval::Redirect { .. } => panic!("mirror is disabled; expected local file"),
    };

    let embedded: Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(embedded, payload, "full-replacement round trip");
}

#[test]
fn listing_shows_only_the_owner() {
    let fixture = LaneFixture::new(STANDARD_TOOLS);
    let service = ForgeService::new(fixture.config.clone()).unwrap();

    service
        .submit(Some("alice"), json!({"a": 1}), None)
        .unwrap();
    service.submit(Some("bob"), json!({"b": 2}), None).unwrap();

    let alice = service.list(Some("alice")).unwrap();
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].owner_id, "alice");

    assert!(service.list(Some("carol")).unwrap().is_empty());
}

#[test]
fn concurrent_submissions_produce_distinct_artifacts() {
    let fixture = LaneFixture::new(STANDARD_TOOLS);
    let service = Arc::new(ForgeService::new(fixture.config.clone()).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let service = Arc::clone(&service);
            std::thread::spawn(move || {
                service
                    .submit(Some("burst"), json!({"n": i}), None)
                    .unwrap()
            })
        })
        .collect();

    let mut ids = std::collections::HashSet::new();
    let mut files = std::collections::HashSet::new();
    for handle in handles {
        let record = handle.join().unwrap();
        assert!(ids.insert(record.artifact_id.clone()), "duplicate artifact id");
        assert!(files.insert(record.file_name.clone()), "duplicate file name");
    }

    assert_eq!(service.list(Some("burst")).unwrap().len(), 4);
}

#[test]
fn workspace_reclaimed_after_success() {
    let fixture = LaneFixture::new(STANDARD_TOOLS);
    let workspace_root = fixture.workspace_root();
    let service = ForgeService::new(fixture.config.clone()).unwrap();

    service.submit(None, json!({"k": "v"}), None).unwrap();

    assert!(
        wait_for_empty_dir(&workspace_root, Duration::from_secs(5)),
        "workspace should be removed within the cleanup window"
    );
}

#[test]
fn missing_config_path_is_config_not_found() {
    let fixture = LaneFixture::new(NO_CONFIG_TOOLS);
    let workspace_root = fixture.workspace_root();
    let service = ForgeService::new(fixture.config.clone()).unwrap();

    let err = service.submit(Some("alice"), json!({"k": "v"}), None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConfigNotFound);
    assert!(err.detail.contains("assets/flutter_assets/assets/config.json"));

    // Nothing registered for the failed submission.
    assert!(service.list(Some("alice")).unwrap().is_empty());
    assert!(wait_for_empty_dir(&workspace_root, Duration::from_secs(5)));
}

#[test]
fn stage_timeout_is_tool_timeout_and_workspace_still_reclaimed() {
    let mut fixture = LaneFixture::new(SLEEPY_TOOLS);
    fixture.config.limits.stage_timeout_seconds = 1;
    let workspace_root = fixture.workspace_root();
    let service = ForgeService::new(fixture.config.clone()).unwrap();

    let start = std::time::Instant::now();
    let err = service.submit(None, json!({"k": "v"}), None).unwrap_err();

    assert_eq!(err.kind, ErrorKind::ToolTimeout);
    // The hung tool was killed, not waited out.
    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(wait_for_empty_dir(&workspace_root, Duration::from_secs(5)));
}

#[test]
fn tool_failure_is_classified_with_detail() {
    let fixture = LaneFixture::new(FAILING_TOOLS);
    let service = ForgeService::new(fixture.config.clone()).unwrap();

    let err = service.submit(None, json!({"k": "v"}), None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ToolExecutionFailure);
    assert!(err.detail.contains("AndrolibException"));
}

#[test]
fn output_overflow_fails_the_stage() {
    let mut fixture = LaneFixture::new(NOISY_TOOLS);
    fixture.config.limits.max_output_bytes = 64 * 1024;
    let service = ForgeService::new(fixture.config.clone()).unwrap();

    let err = service.submit(None, json!({"k": "v"}), None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ToolExecutionFailure);
    assert!(err.detail.contains("cap"));
}

#[test]
fn absent_signer_output_is_contract_mismatch() {
    let fixture = LaneFixture::new(LAZY_SIGNER_TOOLS);
    let service = ForgeService::new(fixture.config.clone()).unwrap();

    let err = service.submit(None, json!({"k": "v"}), None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::SigningArtifactMissing);
    assert!(err.detail.contains("aligned-debugSigned"));
}

#[test]
fn missing_source_apk_fails_before_any_tool_runs() {
    let mut fixture = LaneFixture::new(STANDARD_TOOLS);
    fixture.config.paths.source_apk = fixture.root.path().join("uploads/nowhere.apk");
    let service = ForgeService::new(fixture.config.clone()).unwrap();

    let err = service.submit(None, json!({"k": "v"}), None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::SourceArtifactMissing);
}

#[test]
fn missing_tool_jar_is_tool_unavailable() {
    let fixture = LaneFixture::new(STANDARD_TOOLS);
    fixture.drop_apktool();
    let service = ForgeService::new(fixture.config.clone()).unwrap();

    let err = service.submit(None, json!({"k": "v"}), None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ToolUnavailable);
}

#[test]
fn empty_payload_is_rejected_before_the_pipeline() {
    let fixture = LaneFixture::new(STANDARD_TOOLS);
    let workspace_root = fixture.workspace_root();
    let service = ForgeService::new(fixture.config.clone()).unwrap();

    for payload in [json!({}), json!(null), json!([1, 2]), json!("text")] {
        let err = service.submit(None, payload, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    // Rejected before a workspace was ever allocated.
    assert!(
        !workspace_root.exists()
            || fs::read_dir(&workspace_root).map(|e| e.count()).unwrap_or(0) == 0
    );
}

#[test]
fn resubmission_after_failure_is_a_fresh_job() {
    let fixture = LaneFixture::new(STANDARD_TOOLS);
    let service = ForgeService::new(fixture.config.clone()).unwrap();

    // First attempt fails on a bad source; no retry happens inside the lane.
    let err = service
        .submit(
            Some("alice"),
            json!({"k": "v"}),
            Some(fixture.root.path().join("missing.apk")),
        )
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::SourceArtifactMissing);

    // The caller resubmits and gets a brand-new job that succeeds.
    let record = service.submit(Some("alice"), json!({"k": "v"}), None).unwrap();
    assert_eq!(service.list(Some("alice")).unwrap().len(), 1);
    assert_eq!(record.owner_id, "alice");
}
