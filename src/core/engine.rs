//! Composition engine: translate a validated manifest into a materialized
//! output tree.
//!
//! Composition is all-or-nothing. Every file is written into a fresh
//! staging directory next to the final output root; only after
//! post-verification does a single atomic rename promote the tree to
//! `<output>/<system_name>/`. Any fault before the promote removes staging
//! and leaves no partial output behind.
//!
//! Determinism: given the same manifest and catalog snapshot, two runs
//! produce byte-identical trees aside from the timestamp confined to
//! `system-metadata.json`. Downstream consumers compare hashes.

use crate::core::catalog::{Catalog, DESCRIPTOR_FILE};
use crate::core::error::ComposeError;
use crate::core::manifest::Manifest;
use crate::core::plan::{CompositionPlan, PlanNode, build_plan};
use crate::core::time;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

/// Default composition ceiling in seconds (`MAX_COMPOSE_SECONDS`).
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Cooperative cancellation signal owned by the job's initiator. Checked at
/// every file boundary; on cancel the staging directory is removed.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-job options supplied by the caller.
#[derive(Debug, Clone)]
pub struct ComposeOptions {
    pub output_root: PathBuf,
    pub dry_run: bool,
    /// Replace an existing `<output>/<system_name>/` tree. Without this
    /// flag an existing destination is a `FilesystemFault`.
    pub overwrite: bool,
    pub timeout: Duration,
}

impl ComposeOptions {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            dry_run: false,
            overwrite: false,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Lifecycle status of a composition job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// Bookkeeping record for one composition job.
///
/// Jobs are terminal on success or failure. The control plane retains
/// recent jobs in a bounded in-memory window; the CLI reports its single
/// job inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeJob {
    pub id: uuid::Uuid,
    pub manifest: Manifest,
    pub dry_run: bool,
    /// Local output root for CLI jobs. Dispatched jobs leave this unset:
    /// the downstream worker owns the output location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_root: Option<PathBuf>,
    pub initiated_at: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComposeJob {
    /// Job composed locally against `options`.
    pub fn new(manifest: Manifest, options: &ComposeOptions) -> Self {
        Self {
            id: time::new_entity_id(),
            dry_run: options.dry_run,
            output_root: Some(options.output_root.clone()),
            initiated_at: time::now_rfc3339(),
            status: JobStatus::Queued,
            error: None,
            manifest,
        }
    }

    /// Job handed to the external worker via the control plane.
    pub fn dispatched(manifest: Manifest) -> Self {
        Self {
            id: time::new_entity_id(),
            dry_run: false,
            output_root: None,
            initiated_at: time::now_rfc3339(),
            status: JobStatus::Queued,
            error: None,
            manifest,
        }
    }

    pub fn system_name(&self) -> &str {
        &self.manifest.system_name
    }
}

/// Summary of what a composition wrote (or, on dry-run, would write).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositionReport {
    pub system_name: String,
    pub dry_run: bool,
    pub files_written: usize,
    pub bytes_written: u64,
    pub by_category: BTreeMap<String, usize>,
    pub resolved_templates: Vec<String>,
    pub plan_order: Vec<String>,
    pub catalog_snapshot: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Run a full composition for `manifest` against `catalog`.
///
/// Dry-run executes validation, resolution, ordering and planning, then
/// returns the report without touching the filesystem.
pub fn compose(
    manifest: &Manifest,
    catalog: &Catalog,
    options: &ComposeOptions,
    cancel: &CancelFlag,
) -> Result<CompositionReport, ComposeError> {
    let started = Instant::now();
    manifest.validate()?;
    let plan = build_plan(manifest, catalog)?;

    let mut warnings = manifest.unknown_toggle_keys();
    for w in &mut warnings {
        *w = format!("unknown toggle key ignored: {}", w);
    }

    if options.dry_run {
        return Ok(report_for(
            manifest, catalog, &plan, 0, 0, warnings, true, started,
        ));
    }

    let job_id = time::new_event_id();
    let staging = options.output_root.join(format!(".staging-{}", job_id));
    let deadline = started + options.timeout;

    let result = materialize(
        manifest,
        catalog,
        &plan,
        &staging,
        deadline,
        options.timeout,
        cancel,
    );
    match result {
        Ok((files, bytes)) => {
            if let Err(err) = post_verify(&plan, &staging) {
                remove_staging(&staging);
                return Err(err);
            }
            if let Err(err) = promote(&staging, options, &manifest.system_name, &job_id) {
                remove_staging(&staging);
                return Err(err);
            }
            Ok(report_for(
                manifest, catalog, &plan, files, bytes, warnings, false, started,
            ))
        }
        Err(err) => {
            remove_staging(&staging);
            Err(err)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn report_for(
    manifest: &Manifest,
    catalog: &Catalog,
    plan: &CompositionPlan,
    files_written: usize,
    bytes_written: u64,
    warnings: Vec<String>,
    dry_run: bool,
    started: Instant,
) -> CompositionReport {
    let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
    for node in &plan.nodes {
        *by_category.entry(node.category.to_string()).or_insert(0) += 1;
    }
    CompositionReport {
        system_name: manifest.system_name.clone(),
        dry_run,
        files_written,
        bytes_written,
        by_category,
        resolved_templates: plan.resolved_templates(),
        plan_order: plan.order(),
        catalog_snapshot: catalog.snapshot_hash().to_string(),
        duration_ms: started.elapsed().as_millis() as u64,
        warnings,
    }
}

/// Check the cancellation flag and the deadline. Returns the error to
/// surface; the caller removes staging.
fn checkpoint(deadline: Instant, timeout: Duration, cancel: &CancelFlag) -> Result<(), ComposeError> {
    if cancel.is_cancelled() {
        return Err(ComposeError::Cancelled);
    }
    if Instant::now() > deadline {
        return Err(ComposeError::Timeout(timeout.as_secs()));
    }
    Ok(())
}

fn materialize(
    manifest: &Manifest,
    catalog: &Catalog,
    plan: &CompositionPlan,
    staging: &Path,
    deadline: Instant,
    timeout: Duration,
    cancel: &CancelFlag,
) -> Result<(usize, u64), ComposeError> {
    std::fs::create_dir_all(staging)
        .map_err(|e| ComposeError::fs(format!("creating staging {}", staging.display()), e))?;

    let mut files = 0usize;
    let mut bytes = 0u64;
    for node in &plan.nodes {
        checkpoint(deadline, timeout, cancel)?;
        let (node_files, node_bytes) = materialize_node(node, staging, deadline, timeout, cancel)?;
        files += node_files;
        bytes += node_bytes;
    }

    // Provenance copies at the tree root: the accepted manifest verbatim
    // plus derived metadata (the only timestamp-bearing file).
    let manifest_json = serde_json::to_string_pretty(manifest)
        .map_err(|e| ComposeError::FilesystemFault(format!("serializing manifest: {}", e)))?;
    write_file(&staging.join("manifest.json"), manifest_json.as_bytes())?;
    files += 1;
    bytes += manifest_json.len() as u64;

    let metadata = serde_json::json!({
        "system_name": manifest.system_name,
        "org": manifest.org,
        "resolved_templates": plan.resolved_templates(),
        "plan_order": plan.order(),
        "catalog_snapshot": catalog.snapshot_hash(),
        "tool_version": env!("CARGO_PKG_VERSION"),
        "composed_at": time::now_rfc3339(),
    });
    let metadata_json = serde_json::to_string_pretty(&metadata)
        .map_err(|e| ComposeError::FilesystemFault(format!("serializing metadata: {}", e)))?;
    write_file(&staging.join("system-metadata.json"), metadata_json.as_bytes())?;
    files += 1;
    bytes += metadata_json.len() as u64;

    Ok((files, bytes))
}

/// Copy one planned node's template tree into its target subpath, applying
/// interpolation to files matched by the descriptor's templated globs.
/// Files are visited in sorted order so output bytes never depend on
/// directory iteration order.
fn materialize_node(
    node: &PlanNode,
    staging: &Path,
    deadline: Instant,
    timeout: Duration,
    cancel: &CancelFlag,
) -> Result<(usize, u64), ComposeError> {
    let patterns: Vec<Pattern> = node
        .templated
        .iter()
        .filter_map(|g| Pattern::new(g).ok())
        .collect();
    let target_root = staging.join(&node.target);
    let mut files = 0usize;
    let mut bytes = 0u64;

    for entry in WalkDir::new(&node.source_dir)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            ComposeError::FilesystemFault(format!(
                "walking template {}: {}",
                node.source_dir.display(),
                e
            ))
        })?;
        let rel = entry
            .path()
            .strip_prefix(&node.source_dir)
            .expect("walkdir yields children of the template dir");
        if rel.as_os_str().is_empty() {
            continue;
        }
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(target_root.join(rel)).map_err(|e| {
                ComposeError::fs(format!("creating {}", target_root.join(rel).display()), e)
            })?;
            continue;
        }
        if rel.as_os_str() == DESCRIPTOR_FILE {
            continue;
        }
        checkpoint(deadline, timeout, cancel)?;

        let dest = target_root.join(rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ComposeError::fs(format!("creating {}", parent.display()), e))?;
        }
        let raw = std::fs::read(entry.path())
            .map_err(|e| ComposeError::fs(format!("reading {}", entry.path().display()), e))?;

        let rel_str = rel.to_string_lossy();
        let is_templated = patterns.iter().any(|p| p.matches(&rel_str));
        let rendered: Vec<u8> = if is_templated {
            match std::str::from_utf8(&raw) {
                Ok(text) => interpolate(text, &node.bindings).into_bytes(),
                // Binary files are copied verbatim even when a glob
                // matches them.
                Err(_) => raw,
            }
        } else {
            raw
        };

        bytes += rendered.len() as u64;
        write_file(&dest, &rendered)?;
        files += 1;
    }

    Ok((files, bytes))
}

/// Substitute `{{name}}` placeholders for every binding. Placeholders
/// without a binding pass through verbatim; declared-but-unbindable
/// variables were already rejected at plan time.
pub fn interpolate(text: &str, bindings: &[(String, String)]) -> String {
    let mut rendered = text.to_string();
    for (name, value) in bindings {
        let placeholder = format!("{{{{{}}}}}", name);
        rendered = rendered.replace(&placeholder, value);
    }
    rendered
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), ComposeError> {
    std::fs::write(path, contents)
        .map_err(|e| ComposeError::fs(format!("writing {}", path.display()), e))
}

/// Confirm every descriptor-declared output path exists in staging.
fn post_verify(plan: &CompositionPlan, staging: &Path) -> Result<(), ComposeError> {
    for node in &plan.nodes {
        for output in &node.outputs {
            let expected = staging.join(&node.target).join(output);
            if !expected.exists() {
                return Err(ComposeError::PostVerifyFault(format!(
                    "{} missing declared output {}",
                    node.template_ref(),
                    Path::new(&node.target).join(output).display()
                )));
            }
        }
    }
    Ok(())
}

/// Atomically rename staging into place. Cross-device renames are rejected
/// with a clear fault: staging must live on the same filesystem as the
/// output root.
fn promote(
    staging: &Path,
    options: &ComposeOptions,
    system_name: &str,
    job_id: &str,
) -> Result<(), ComposeError> {
    let destination = options.output_root.join(system_name);
    let mut backup: Option<PathBuf> = None;

    if destination.exists() {
        if !options.overwrite {
            return Err(ComposeError::FilesystemFault(format!(
                "destination {} already exists (pass --overwrite to replace it)",
                destination.display()
            )));
        }
        let backup_path = options.output_root.join(format!(".backup-{}", job_id));
        std::fs::rename(&destination, &backup_path).map_err(|e| {
            ComposeError::fs(
                format!("moving existing {} aside", destination.display()),
                e,
            )
        })?;
        backup = Some(backup_path);
    }

    if let Err(err) = std::fs::rename(staging, &destination) {
        // Roll the old tree back before reporting.
        if let Some(backup_path) = &backup {
            let _ = std::fs::rename(backup_path, &destination);
        }
        // EXDEV: staging and output are on different filesystems.
        if err.raw_os_error() == Some(libc_exdev()) {
            return Err(ComposeError::FilesystemFault(format!(
                "cannot promote across filesystems: {} -> {} (staging must share a filesystem with the output root)",
                staging.display(),
                destination.display()
            )));
        }
        return Err(ComposeError::fs(
            format!("promoting {} -> {}", staging.display(), destination.display()),
            err,
        ));
    }

    if let Some(backup_path) = backup {
        let _ = std::fs::remove_dir_all(backup_path);
    }
    Ok(())
}

#[cfg(unix)]
fn libc_exdev() -> i32 {
    18
}

#[cfg(not(unix))]
fn libc_exdev() -> i32 {
    17
}

fn remove_staging(staging: &Path) {
    let _ = std::fs::remove_dir_all(staging);
}
