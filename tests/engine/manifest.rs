//! Validation completeness: every omitted required field and every
//! constraint violation yields an error naming the field path.

use forgeplane::core::error::ComposeError;
use forgeplane::core::manifest::{
    AGENT_SLUGS, BACKEND_SLUGS, BUSINESS_SLUGS, FRONTEND_SLUGS, MEMORY_BACKENDS, Manifest,
};
use serde_json::json;

/// Deserialize-then-validate, mirroring the API's two-step acceptance.
fn accept(value: serde_json::Value) -> Result<Manifest, String> {
    let manifest: Manifest =
        serde_json::from_value(value).map_err(|e| format!("deserialize: {}", e))?;
    manifest
        .validate()
        .map_err(|e| format!("validate: {}", e))?;
    Ok(manifest)
}

fn base() -> serde_json::Value {
    json!({
        "manifest_version": "1.0",
        "system_name": "demo-x",
        "org": "acme"
    })
}

#[test]
fn minimal_manifest_accepted() {
    accept(base()).unwrap();
}

#[test]
fn each_required_field_omission_is_reported_by_name() {
    for field in ["manifest_version", "system_name", "org"] {
        let mut value = base();
        value.as_object_mut().unwrap().remove(field);
        let err = accept(value).unwrap_err();
        assert!(
            err.contains(field),
            "omitting {} should name it, got: {}",
            field,
            err
        );
    }
}

#[test]
fn system_name_constraints() {
    for bad in ["Bad_Name", "UPPER", "x", "ab", "9starts-with-digit", "has space"] {
        let mut value = base();
        value["system_name"] = json!(bad);
        let err = accept(value).unwrap_err();
        assert!(
            err.contains("system_name"),
            "{:?} should fail on system_name, got: {}",
            bad,
            err
        );
    }
    let mut value = base();
    value["system_name"] = json!("a".repeat(64));
    assert!(accept(value).unwrap_err().contains("system_name"));

    // 63 chars is the inclusive upper bound.
    let mut value = base();
    value["system_name"] = json!(format!("a{}", "b".repeat(62)));
    accept(value).unwrap();
}

#[test]
fn enumerated_slugs_are_closed_sets() {
    let cases = [
        ("backend", json!({"backend": {"template": "nodejs"}})),
        ("frontend", json!({"frontend": {"template": "angular"}})),
        ("business", json!({"business": {"template": "erp"}})),
        (
            "ai_agents",
            json!({"ai_agents": [{"template": "janitor"}]}),
        ),
    ];
    for (name, components) in cases {
        let mut value = base();
        value["components"] = components;
        let err = accept(value).unwrap_err();
        assert!(
            err.contains(name),
            "unknown {} slug should name the field, got: {}",
            name,
            err
        );
    }

    // Every enumerated slug is accepted.
    for slug in BACKEND_SLUGS {
        let mut value = base();
        value["components"] = json!({"backend": {"template": slug}});
        accept(value).unwrap();
    }
    for slug in FRONTEND_SLUGS {
        let mut value = base();
        value["components"] = json!({"frontend": {"template": slug}});
        accept(value).unwrap();
    }
    for slug in AGENT_SLUGS {
        let mut value = base();
        value["components"] = json!({"ai_agents": [{"template": slug}]});
        accept(value).unwrap();
    }
    for slug in BUSINESS_SLUGS {
        let mut value = base();
        value["components"] = json!({"business": {"template": slug}});
        accept(value).unwrap();
    }
}

#[test]
fn memory_backend_and_ttl_constraints() {
    for backend in MEMORY_BACKENDS {
        let mut value = base();
        value["memory"] = json!({"backend": backend, "ttl_seconds": 60});
        accept(value).unwrap();
    }
    let mut value = base();
    value["memory"] = json!({"backend": "dynamo", "ttl_seconds": 60});
    assert!(accept(value).unwrap_err().contains("memory.backend"));

    let mut value = base();
    value["memory"] = json!({"backend": "redis", "ttl_seconds": -5});
    assert!(accept(value).unwrap_err().contains("ttl_seconds"));
}

#[test]
fn description_bounds() {
    let mut value = base();
    value["description"] = json!("d".repeat(500));
    accept(value).unwrap();

    let mut value = base();
    value["description"] = json!("d".repeat(501));
    assert!(accept(value).unwrap_err().contains("description"));
}

#[test]
fn instance_name_rules_and_collisions() {
    let mut value = base();
    value["components"] = json!({"ai_agents": [
        {"template": "research", "instance_name": "Bad Name"}
    ]});
    assert!(accept(value).unwrap_err().contains("instance_name"));

    // Explicit name colliding with a defaulted one.
    let mut value = base();
    value["components"] = json!({"ai_agents": [
        {"template": "research"},
        {"template": "builder", "instance_name": "research"}
    ]});
    let manifest: Manifest = serde_json::from_value(value).unwrap();
    match manifest.validate().unwrap_err() {
        ComposeError::NameCollision(targets) => {
            assert_eq!(targets, vec!["agents/research".to_string()]);
        }
        other => panic!("expected NameCollision, got {other:?}"),
    }
}

#[test]
fn validation_reports_all_failures_at_once() {
    let value = json!({
        "manifest_version": "0.1",
        "system_name": "Bad_Name",
        "org": "",
        "components": {"backend": {"template": "nodejs"}}
    });
    let manifest: Manifest = serde_json::from_value(value).unwrap();
    match manifest.validate().unwrap_err() {
        ComposeError::ManifestInvalid(fields) => {
            let paths: Vec<&str> = fields.iter().map(|f| f.field.as_str()).collect();
            assert!(paths.contains(&"manifest_version"));
            assert!(paths.contains(&"system_name"));
            assert!(paths.contains(&"org"));
            assert!(paths.contains(&"components.backend.template"));
        }
        other => panic!("expected ManifestInvalid, got {other:?}"),
    }
}

#[test]
fn manifest_is_immutable_through_round_trip() {
    let value = json!({
        "manifest_version": "1.0",
        "system_name": "demo-x",
        "org": "acme",
        "description": "a system",
        "components": {
            "backend": {"template": "fastapi"},
            "frontend": {"template": "chat-ui", "pwa": true},
            "ai_agents": [{"template": "research", "instance_name": "probe"}],
            "infrastructure": {"docker": true},
            "governance": {"policy": false}
        },
        "memory": {"backend": "redis", "ttl_seconds": 900},
        "integrations": {"webhook_dispatch": true, "cors_origins": ["https://a.example"]},
        "metadata": {"created_by": "tester", "tags": ["one", "two"]}
    });
    let manifest = accept(value.clone()).unwrap();
    let round_tripped = serde_json::to_value(&manifest).unwrap();
    assert_eq!(round_tripped, value);
}
