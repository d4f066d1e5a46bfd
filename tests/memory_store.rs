//! Memory store properties: rehydrate tolerance, append idempotence,
//! atomic writes, fail-closed schema enforcement, cross-process locking.

use forgeplane::memory::schema::{ComponentStatus, MadeBy, Phase, TelemetryKind};
use forgeplane::memory::store::{
    self, ARCHITECTURE_MAP_FILE, DECISION_LOG_FILE, NewDecision, NewTelemetry, StatePatch,
    SYSTEM_STATE_FILE, TELEMETRY_FILE, append_decision, append_telemetry, write_state,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::tempdir;
use uuid::Uuid;

fn decision(description: &str) -> NewDecision {
    NewDecision {
        decision_type: "architecture".to_string(),
        description: description.to_string(),
        rationale: "test rationale".to_string(),
        made_by: MadeBy::Agent,
        outcome: None,
        related_components: vec!["backend".to_string()],
    }
}

#[test]
fn fresh_state_dir_rehydrates_with_four_warnings() {
    let tmp = tempdir().unwrap();
    let context = store::rehydrate(tmp.path());
    assert!(context.system_state.is_none());
    assert!(context.decision_log.is_empty());
    assert!(context.telemetry.is_empty());
    assert!(context.architecture_map.is_none());
    assert_eq!(context.warnings.len(), 4);
    for file in [
        SYSTEM_STATE_FILE,
        DECISION_LOG_FILE,
        TELEMETRY_FILE,
        ARCHITECTURE_MAP_FILE,
    ] {
        assert!(
            context.warnings.iter().any(|w| w.contains(file)),
            "warning names {}",
            file
        );
    }
}

#[test]
fn any_subset_of_missing_files_is_tolerated() {
    let tmp = tempdir().unwrap();
    append_decision(tmp.path(), decision("only decisions exist")).unwrap();
    let context = store::rehydrate(tmp.path());
    assert_eq!(context.decision_log.len(), 1);
    assert_eq!(context.warnings.len(), 3);
    assert!(!context.warnings.iter().any(|w| w.contains(DECISION_LOG_FILE)));
}

#[test]
fn append_n_decisions_rehydrates_n_in_order() {
    let tmp = tempdir().unwrap();
    let n = 12;
    let mut appended_ids = Vec::new();
    for i in 0..n {
        let entry = append_decision(tmp.path(), decision(&format!("decision {}", i))).unwrap();
        appended_ids.push(entry.id);
    }

    let context = store::rehydrate(tmp.path());
    assert_eq!(context.decision_log.len(), n);
    for (i, entry) in context.decision_log.iter().enumerate() {
        assert_eq!(entry.description, format!("decision {}", i));
        assert_eq!(entry.id, appended_ids[i]);
        // Valid v4 UUIDs, unique across the log.
        assert_eq!(entry.id.get_version_num(), 4);
        assert_ne!(entry.id, Uuid::nil());
    }
    let unique: std::collections::HashSet<_> =
        context.decision_log.iter().map(|e| e.id).collect();
    assert_eq!(unique.len(), n);

    // Monotonic (non-decreasing) timestamps in append order.
    for window in context.decision_log.windows(2) {
        assert!(window[0].timestamp <= window[1].timestamp);
    }
}

#[test]
fn telemetry_appends_validate_enum_and_unit_rules() {
    let tmp = tempdir().unwrap();
    append_telemetry(
        tmp.path(),
        NewTelemetry {
            event_type: TelemetryKind::TestPass,
            component: "backend".to_string(),
            value: Some(42.0),
            unit: Some("cases".to_string()),
            metadata: Some(serde_json::json!({"suite": "unit"})),
        },
    )
    .unwrap();

    let err = append_telemetry(
        tmp.path(),
        NewTelemetry {
            event_type: TelemetryKind::TestFail,
            component: "backend".to_string(),
            value: None,
            unit: Some("cases".to_string()),
            metadata: None,
        },
    )
    .unwrap_err();
    assert_eq!(err.kind(), "MemoryFileInvalid");

    // The failed append left the log untouched.
    let context = store::rehydrate(tmp.path());
    assert_eq!(context.telemetry.len(), 1);
}

#[test]
fn write_state_patches_accumulate() {
    let tmp = tempdir().unwrap();
    write_state(
        tmp.path(),
        "demo-x",
        StatePatch {
            phase: Some(Phase::Building),
            last_action: Some("composed".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    write_state(
        tmp.path(),
        "demo-x",
        StatePatch {
            health_score: Some(72),
            component: Some(("frontend".to_string(), ComponentStatus::Building)),
            error: Some("frontend build flaked".to_string()),
            warning: Some("retrying".to_string()),
            ..Default::default()
        },
    )
    .unwrap();

    let state = store::rehydrate(tmp.path()).system_state.unwrap();
    assert_eq!(state.phase, Phase::Building);
    assert_eq!(state.health_score, 72);
    assert_eq!(state.last_action.as_deref(), Some("composed"));
    assert_eq!(
        state.components_status.get("frontend"),
        Some(&ComponentStatus::Building)
    );
    assert_eq!(state.errors, vec!["frontend build flaked".to_string()]);
    assert_eq!(state.warnings, vec!["retrying".to_string()]);
}

#[test]
fn invalid_file_is_surfaced_but_never_overwritten_on_read() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join(TELEMETRY_FILE);
    std::fs::write(&path, "[1, 2, 3]").unwrap();

    let context = store::rehydrate(tmp.path());
    assert!(context.telemetry.is_empty());
    assert!(context.warnings.iter().any(|w| w.contains(TELEMETRY_FILE)));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "[1, 2, 3]");
}

#[test]
fn unknown_fields_survive_read_and_are_dropped_on_write() {
    let tmp = tempdir().unwrap();
    std::fs::write(
        tmp.path().join(SYSTEM_STATE_FILE),
        serde_json::json!({
            "system_name": "demo-x",
            "phase": "testing",
            "health_score": 95,
            "experimental_field": [1, 2, 3]
        })
        .to_string(),
    )
    .unwrap();

    // Read tolerates the unknown field.
    let context = store::rehydrate(tmp.path());
    assert_eq!(context.system_state.as_ref().unwrap().health_score, 95);

    // A write rewrites the file without it.
    write_state(
        tmp.path(),
        "demo-x",
        StatePatch {
            health_score: Some(90),
            ..Default::default()
        },
    )
    .unwrap();
    let raw = std::fs::read_to_string(tmp.path().join(SYSTEM_STATE_FILE)).unwrap();
    assert!(!raw.contains("experimental_field"));
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["health_score"], 90);
    assert_eq!(value["phase"], "testing");
}

#[test]
fn concurrent_appenders_serialize_without_loss() {
    let tmp = tempdir().unwrap();
    let dir = Arc::new(tmp.path().to_path_buf());
    let counter = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let dir = Arc::clone(&dir);
            let counter = Arc::clone(&counter);
            std::thread::spawn(move || {
                for _ in 0..5 {
                    let i = counter.fetch_add(1, Ordering::SeqCst);
                    append_decision(&dir, decision(&format!("w{} d{}", worker, i))).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let context = store::rehydrate(&dir);
    assert_eq!(context.decision_log.len(), 20);
    let unique: std::collections::HashSet<_> =
        context.decision_log.iter().map(|e| e.id).collect();
    assert_eq!(unique.len(), 20);
}
