//! End-to-end composition properties: happy path, determinism, atomicity,
//! dependency ordering, collisions, dry-run and overwrite semantics.

use forgeplane::core::catalog::{Catalog, seed_library};
use forgeplane::core::engine::{CancelFlag, ComposeOptions, compose};
use forgeplane::core::error::ComposeError;
use forgeplane::core::manifest::Manifest;
use std::path::Path;
use tempfile::tempdir;
use walkdir::WalkDir;

fn manifest(value: serde_json::Value) -> Manifest {
    serde_json::from_value(value).expect("test manifest deserializes")
}

fn happy_manifest() -> Manifest {
    manifest(serde_json::json!({
        "manifest_version": "1.0",
        "system_name": "demo-x",
        "org": "acme",
        "components": {
            "backend": {"template": "fastapi"},
            "ai_agents": [
                {"template": "research"},
                {"template": "orchestrator", "instance_name": "wf"}
            ]
        }
    }))
}

fn seeded_catalog(root: &Path) -> Catalog {
    seed_library(root).expect("seed library");
    Catalog::scan(root).expect("scan library")
}

/// All regular files under `root`, as sorted relative path strings.
fn file_listing(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .to_string()
        })
        .collect();
    files.sort();
    files
}

#[test]
fn happy_path_materializes_expected_tree() {
    let library = tempdir().unwrap();
    let out = tempdir().unwrap();
    let catalog = seeded_catalog(library.path());

    let report = compose(
        &happy_manifest(),
        &catalog,
        &ComposeOptions::new(out.path()),
        &CancelFlag::new(),
    )
    .unwrap();

    let tree = out.path().join("demo-x");
    assert!(tree.join("backend").is_dir());
    assert!(tree.join("agents/research").is_dir());
    assert!(tree.join("agents/wf").is_dir());
    assert!(tree.join("infrastructure/agent-base").is_dir());
    assert!(tree.join("manifest.json").is_file());
    assert!(tree.join("system-metadata.json").is_file());
    assert!(report.files_written > 0);
    assert!(report.bytes_written > 0);
    assert_eq!(report.by_category.get("ai_agent"), Some(&2));

    // Interpolation reached the templated files.
    let readme = std::fs::read_to_string(tree.join("agents/wf/README.md")).unwrap();
    assert!(readme.contains("demo-x"));
    assert!(readme.contains("acme"));
    assert!(!readme.contains("{{system_name}}"));

    // The stored manifest is the accepted manifest, verbatim.
    let stored: Manifest =
        serde_json::from_str(&std::fs::read_to_string(tree.join("manifest.json")).unwrap())
            .unwrap();
    assert_eq!(stored.system_name, "demo-x");

    // No staging residue.
    let residue: Vec<_> = std::fs::read_dir(out.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.starts_with(".staging-"))
        .collect();
    assert!(residue.is_empty(), "staging left behind: {:?}", residue);
}

#[test]
fn composition_is_deterministic_across_runs() {
    let library = tempdir().unwrap();
    let catalog = seeded_catalog(library.path());
    let out1 = tempdir().unwrap();
    let out2 = tempdir().unwrap();

    compose(
        &happy_manifest(),
        &catalog,
        &ComposeOptions::new(out1.path()),
        &CancelFlag::new(),
    )
    .unwrap();
    compose(
        &happy_manifest(),
        &catalog,
        &ComposeOptions::new(out2.path()),
        &CancelFlag::new(),
    )
    .unwrap();

    let tree1 = out1.path().join("demo-x");
    let tree2 = out2.path().join("demo-x");
    let listing1 = file_listing(&tree1);
    let listing2 = file_listing(&tree2);
    assert_eq!(listing1, listing2);

    for rel in &listing1 {
        // Timestamps are confined to system-metadata.json.
        if rel == "system-metadata.json" {
            continue;
        }
        let a = std::fs::read(tree1.join(rel)).unwrap();
        let b = std::fs::read(tree2.join(rel)).unwrap();
        assert_eq!(a, b, "file {} differs between runs", rel);
    }
}

#[test]
fn post_verify_failure_leaves_no_output() {
    let library = tempdir().unwrap();
    let out = tempdir().unwrap();
    // Descriptor declares an output sentinel the template never provides.
    let dir = library.path().join("backend/fastapi");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("template.toml"),
        "slug = \"fastapi\"\ncategory = \"backend\"\noutputs = [\"app/main.py\"]\n",
    )
    .unwrap();
    std::fs::write(dir.join("README.md"), "# backend\n").unwrap();
    let catalog = Catalog::scan(library.path()).unwrap();

    let manifest = manifest(serde_json::json!({
        "manifest_version": "1.0",
        "system_name": "demo-x",
        "org": "acme",
        "components": {"backend": {"template": "fastapi"}}
    }));

    let err = compose(
        &manifest,
        &catalog,
        &ComposeOptions::new(out.path()),
        &CancelFlag::new(),
    )
    .unwrap_err();
    match &err {
        ComposeError::PostVerifyFault(message) => {
            assert!(message.contains("app/main.py"), "message: {}", message);
        }
        other => panic!("expected PostVerifyFault, got {other:?}"),
    }
    assert_eq!(err.exit_code(), 5);

    // Atomicity: no output tree and no staging directory.
    assert!(!out.path().join("demo-x").exists());
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn unknown_template_names_the_missing_ref_and_leaves_nothing() {
    let library = tempdir().unwrap();
    let out = tempdir().unwrap();
    let catalog = seeded_catalog(library.path());

    // "nodejs" is outside the backend enumeration, so the schema rejects
    // it before resolution.
    let manifest_nodejs = manifest(serde_json::json!({
        "manifest_version": "1.0",
        "system_name": "demo-x",
        "org": "acme",
        "components": {"backend": {"template": "nodejs"}}
    }));
    let err = compose(
        &manifest_nodejs,
        &catalog,
        &ComposeOptions::new(out.path()),
        &CancelFlag::new(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), "ManifestInvalid");

    // An enumerated slug missing from this library is the catalog-level
    // miss, reported with its full ref.
    let empty_library = tempdir().unwrap();
    std::fs::create_dir_all(empty_library.path().join("backend")).unwrap();
    let sparse = Catalog::scan(empty_library.path()).unwrap();
    let manifest_fastapi = manifest(serde_json::json!({
        "manifest_version": "1.0",
        "system_name": "demo-x",
        "org": "acme",
        "components": {"backend": {"template": "fastapi"}}
    }));
    let err = compose(
        &manifest_fastapi,
        &sparse,
        &ComposeOptions::new(out.path()),
        &CancelFlag::new(),
    )
    .unwrap_err();
    match &err {
        ComposeError::UnknownTemplate(refs) => {
            assert_eq!(refs, &vec!["backend:fastapi".to_string()]);
        }
        other => panic!("expected UnknownTemplate, got {other:?}"),
    }
    assert_eq!(err.exit_code(), 2);
    assert!(!out.path().join("demo-x").exists());
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn duplicate_agent_instances_rejected_before_any_write() {
    let library = tempdir().unwrap();
    let out = tempdir().unwrap();
    let catalog = seeded_catalog(library.path());

    let manifest = manifest(serde_json::json!({
        "manifest_version": "1.0",
        "system_name": "demo-x",
        "org": "acme",
        "components": {"ai_agents": [
            {"template": "research"},
            {"template": "research"}
        ]}
    }));
    let err = compose(
        &manifest,
        &catalog,
        &ComposeOptions::new(out.path()),
        &CancelFlag::new(),
    )
    .unwrap_err();
    match &err {
        ComposeError::NameCollision(targets) => {
            assert_eq!(targets, &vec!["agents/research".to_string()]);
        }
        other => panic!("expected NameCollision, got {other:?}"),
    }
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn dependencies_materialize_before_dependents() {
    let library = tempdir().unwrap();
    let out = tempdir().unwrap();
    let catalog = seeded_catalog(library.path());

    let report = compose(
        &happy_manifest(),
        &catalog,
        &ComposeOptions::new(out.path()),
        &CancelFlag::new(),
    )
    .unwrap();
    let base = report
        .plan_order
        .iter()
        .position(|t| t == "infrastructure/agent-base")
        .expect("agent-base in plan");
    for agent in ["agents/research", "agents/wf"] {
        let pos = report.plan_order.iter().position(|t| t == agent).unwrap();
        assert!(base < pos, "agent-base precedes {}: {:?}", agent, report.plan_order);
    }
}

#[test]
fn dry_run_writes_nothing_but_reports_plan() {
    let library = tempdir().unwrap();
    let out = tempdir().unwrap();
    let catalog = seeded_catalog(library.path());

    let mut options = ComposeOptions::new(out.path());
    options.dry_run = true;
    let report = compose(&happy_manifest(), &catalog, &options, &CancelFlag::new()).unwrap();

    assert!(report.dry_run);
    assert_eq!(report.files_written, 0);
    assert!(report.plan_order.contains(&"agents/wf".to_string()));
    assert!(
        report
            .resolved_templates
            .contains(&"ai_agent:orchestrator".to_string())
    );
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn existing_destination_requires_overwrite_flag() {
    let library = tempdir().unwrap();
    let out = tempdir().unwrap();
    let catalog = seeded_catalog(library.path());

    compose(
        &happy_manifest(),
        &catalog,
        &ComposeOptions::new(out.path()),
        &CancelFlag::new(),
    )
    .unwrap();

    // Second run without --overwrite fails and preserves the old tree.
    let marker = out.path().join("demo-x/marker.txt");
    std::fs::write(&marker, "old tree").unwrap();
    let err = compose(
        &happy_manifest(),
        &catalog,
        &ComposeOptions::new(out.path()),
        &CancelFlag::new(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), "FilesystemFault");
    assert!(marker.exists());

    // With --overwrite the tree is replaced and the backup removed.
    let mut options = ComposeOptions::new(out.path());
    options.overwrite = true;
    compose(&happy_manifest(), &catalog, &options, &CancelFlag::new()).unwrap();
    assert!(!marker.exists());
    let leftovers: Vec<_> = std::fs::read_dir(out.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.starts_with(".backup-") || n.starts_with(".staging-"))
        .collect();
    assert!(leftovers.is_empty(), "leftovers: {:?}", leftovers);
}

#[test]
fn cancelled_job_removes_staging_and_reports_cancelled() {
    let library = tempdir().unwrap();
    let out = tempdir().unwrap();
    let catalog = seeded_catalog(library.path());

    let cancel = CancelFlag::new();
    cancel.cancel();
    let err = compose(
        &happy_manifest(),
        &catalog,
        &ComposeOptions::new(out.path()),
        &cancel,
    )
    .unwrap_err();
    assert_eq!(err.kind(), "Cancelled");
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn unknown_toggle_keys_surface_as_report_warnings() {
    let library = tempdir().unwrap();
    let out = tempdir().unwrap();
    let catalog = seeded_catalog(library.path());

    let manifest = manifest(serde_json::json!({
        "manifest_version": "1.0",
        "system_name": "demo-x",
        "org": "acme",
        "components": {
            "governance": {"policy": true, "quantum": true}
        }
    }));
    let report = compose(
        &manifest,
        &catalog,
        &ComposeOptions::new(out.path()),
        &CancelFlag::new(),
    )
    .unwrap();
    assert!(
        report
            .warnings
            .iter()
            .any(|w| w.contains("components.governance.quantum")),
        "warnings: {:?}",
        report.warnings
    );
    assert!(out.path().join("demo-x/governance/policy").is_dir());
    assert!(!out.path().join("demo-x/governance/quantum").exists());
}
