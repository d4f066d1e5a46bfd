//! Disk-backed memory store with atomic writes and schema-validated
//! rehydration.
//!
//! Four files live under a caller-supplied state directory:
//! `system_state.json`, `decision_log.json`, `telemetry.json` and
//! `architecture_map.json`. Reads are best-effort: missing or invalid
//! files become warnings, never errors, so first-run workflows succeed.
//! Writes fail closed on schema violations.
//!
//! Every durable write serializes into a sibling temp file, fsyncs, then
//! atomically renames over the target. Concurrent appenders (API process
//! plus CLI invocations) serialize on an advisory file lock next to the
//! target; contention blocks rather than failing.

use crate::core::error::{ComposeError, FieldError};
use crate::core::time;
use crate::memory::schema::{
    ArchitectureMap, ComponentStatus, DecisionEntry, MadeBy, Phase, SystemState, TelemetryEvent,
    TelemetryKind,
};
use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

pub const SYSTEM_STATE_FILE: &str = "system_state.json";
pub const DECISION_LOG_FILE: &str = "decision_log.json";
pub const TELEMETRY_FILE: &str = "telemetry.json";
pub const ARCHITECTURE_MAP_FILE: &str = "architecture_map.json";

/// Consolidated context returned by `rehydrate`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryContext {
    pub system_state: Option<SystemState>,
    pub decision_log: Vec<DecisionEntry>,
    pub telemetry: Vec<TelemetryEvent>,
    pub architecture_map: Option<ArchitectureMap>,
    pub warnings: Vec<String>,
}

/// Load all four memory files, validating each against its schema.
///
/// Always succeeds: missing files and invalid files are reported through
/// `warnings`, and invalid files are never overwritten or repaired here.
pub fn rehydrate(state_dir: &Path) -> MemoryContext {
    let mut context = MemoryContext::default();

    match read_optional::<SystemState>(&state_dir.join(SYSTEM_STATE_FILE)) {
        ReadOutcome::Missing => context
            .warnings
            .push(format!("{} missing (fresh state)", SYSTEM_STATE_FILE)),
        ReadOutcome::Invalid(reason) => context
            .warnings
            .push(format!("{} invalid: {}", SYSTEM_STATE_FILE, reason)),
        ReadOutcome::Ok(state) => match state.validate() {
            Ok(()) => context.system_state = Some(state),
            Err(err) => context
                .warnings
                .push(format!("{} invalid: {}", SYSTEM_STATE_FILE, err)),
        },
    }

    match read_optional::<Vec<DecisionEntry>>(&state_dir.join(DECISION_LOG_FILE)) {
        ReadOutcome::Missing => context
            .warnings
            .push(format!("{} missing (no decisions yet)", DECISION_LOG_FILE)),
        ReadOutcome::Invalid(reason) => context
            .warnings
            .push(format!("{} invalid: {}", DECISION_LOG_FILE, reason)),
        ReadOutcome::Ok(entries) => {
            match entries
                .iter()
                .enumerate()
                .try_for_each(|(i, e)| e.validate(i))
            {
                Ok(()) => context.decision_log = entries,
                Err(err) => context
                    .warnings
                    .push(format!("{} invalid: {}", DECISION_LOG_FILE, err)),
            }
        }
    }

    match read_optional::<Vec<TelemetryEvent>>(&state_dir.join(TELEMETRY_FILE)) {
        ReadOutcome::Missing => context
            .warnings
            .push(format!("{} missing (no telemetry yet)", TELEMETRY_FILE)),
        ReadOutcome::Invalid(reason) => context
            .warnings
            .push(format!("{} invalid: {}", TELEMETRY_FILE, reason)),
        ReadOutcome::Ok(events) => {
            match events
                .iter()
                .enumerate()
                .try_for_each(|(i, e)| e.validate(i))
            {
                Ok(()) => context.telemetry = events,
                Err(err) => context
                    .warnings
                    .push(format!("{} invalid: {}", TELEMETRY_FILE, err)),
            }
        }
    }

    match read_optional::<ArchitectureMap>(&state_dir.join(ARCHITECTURE_MAP_FILE)) {
        ReadOutcome::Missing => context
            .warnings
            .push(format!("{} missing (no map yet)", ARCHITECTURE_MAP_FILE)),
        ReadOutcome::Invalid(reason) => context
            .warnings
            .push(format!("{} invalid: {}", ARCHITECTURE_MAP_FILE, reason)),
        ReadOutcome::Ok(map) => match map.validate() {
            Ok(()) => context.architecture_map = Some(map),
            Err(err) => context
                .warnings
                .push(format!("{} invalid: {}", ARCHITECTURE_MAP_FILE, err)),
        },
    }

    context
}

/// Patch applied by `write_state`: set phase, record an action, set the
/// health score, set one component's status.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub phase: Option<Phase>,
    pub last_action: Option<String>,
    pub health_score: Option<u8>,
    pub component: Option<(String, ComponentStatus)>,
    pub error: Option<String>,
    pub warning: Option<String>,
}

/// Read (or construct) the system state, apply the patch, validate, write.
pub fn write_state(
    state_dir: &Path,
    system_name: &str,
    patch: StatePatch,
) -> Result<SystemState, ComposeError> {
    ensure_dir(state_dir)?;
    let path = state_dir.join(SYSTEM_STATE_FILE);
    let _lock = FileLock::acquire(&path)?;

    let mut state = match read_optional::<SystemState>(&path) {
        ReadOutcome::Missing => SystemState::fresh(system_name),
        ReadOutcome::Invalid(reason) => {
            return Err(ComposeError::MemoryFileInvalid(FieldError::new(
                SYSTEM_STATE_FILE,
                reason,
            )));
        }
        ReadOutcome::Ok(state) => state,
    };

    if let Some(phase) = patch.phase {
        state.phase = phase;
    }
    if let Some(action) = patch.last_action {
        state.last_action = Some(action);
        state.last_action_at = Some(time::now_rfc3339());
    }
    if let Some(score) = patch.health_score {
        state.health_score = score;
    }
    if let Some((component, status)) = patch.component {
        state.components_status.insert(component, status);
    }
    if let Some(error) = patch.error {
        state.errors.push(error);
    }
    if let Some(warning) = patch.warning {
        state.warnings.push(warning);
    }

    state.validate()?;
    atomic_write_json(&path, &state)?;
    Ok(state)
}

/// Fields supplied by the caller for a new decision; id and timestamp are
/// generated here.
#[derive(Debug, Clone)]
pub struct NewDecision {
    pub decision_type: String,
    pub description: String,
    pub rationale: String,
    pub made_by: MadeBy,
    pub outcome: Option<String>,
    pub related_components: Vec<String>,
}

/// Append a decision with generated UUID and current UTC timestamp.
pub fn append_decision(state_dir: &Path, new: NewDecision) -> Result<DecisionEntry, ComposeError> {
    ensure_dir(state_dir)?;
    let path = state_dir.join(DECISION_LOG_FILE);
    let _lock = FileLock::acquire(&path)?;

    let mut entries = match read_optional::<Vec<DecisionEntry>>(&path) {
        ReadOutcome::Missing => Vec::new(),
        ReadOutcome::Invalid(reason) => {
            return Err(ComposeError::MemoryFileInvalid(FieldError::new(
                DECISION_LOG_FILE,
                reason,
            )));
        }
        ReadOutcome::Ok(entries) => entries,
    };

    let entry = DecisionEntry {
        id: time::new_entity_id(),
        timestamp: time::now_rfc3339(),
        decision_type: new.decision_type,
        description: new.description,
        rationale: new.rationale,
        made_by: new.made_by,
        outcome: new.outcome,
        related_components: new.related_components,
    };
    entry.validate(entries.len())?;
    entries.push(entry.clone());
    atomic_write_json(&path, &entries)?;
    Ok(entry)
}

/// Fields supplied by the caller for a new telemetry event.
#[derive(Debug, Clone)]
pub struct NewTelemetry {
    pub event_type: TelemetryKind,
    pub component: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Append a telemetry event with generated UUID and current UTC timestamp.
pub fn append_telemetry(
    state_dir: &Path,
    new: NewTelemetry,
) -> Result<TelemetryEvent, ComposeError> {
    ensure_dir(state_dir)?;
    let path = state_dir.join(TELEMETRY_FILE);
    let _lock = FileLock::acquire(&path)?;

    let mut events = match read_optional::<Vec<TelemetryEvent>>(&path) {
        ReadOutcome::Missing => Vec::new(),
        ReadOutcome::Invalid(reason) => {
            return Err(ComposeError::MemoryFileInvalid(FieldError::new(
                TELEMETRY_FILE,
                reason,
            )));
        }
        ReadOutcome::Ok(events) => events,
    };

    let event = TelemetryEvent {
        id: time::new_entity_id(),
        timestamp: time::now_rfc3339(),
        event_type: new.event_type,
        component: new.component,
        value: new.value,
        unit: new.unit,
        metadata: new.metadata,
    };
    event.validate(events.len())?;
    events.push(event.clone());
    atomic_write_json(&path, &events)?;
    Ok(event)
}

enum ReadOutcome<T> {
    Missing,
    Invalid(String),
    Ok(T),
}

fn read_optional<T: DeserializeOwned>(path: &Path) -> ReadOutcome<T> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return ReadOutcome::Missing,
        Err(err) => return ReadOutcome::Invalid(format!("read failed: {}", err)),
    };
    match serde_json::from_str(&raw) {
        Ok(value) => ReadOutcome::Ok(value),
        Err(err) => ReadOutcome::Invalid(format!("parse failed: {}", err)),
    }
}

fn ensure_dir(state_dir: &Path) -> Result<(), ComposeError> {
    std::fs::create_dir_all(state_dir)
        .map_err(|e| ComposeError::fs(format!("creating {}", state_dir.display()), e))
}

/// Serialize into a sibling temp file in the same directory, fsync, then
/// atomically rename over the target.
fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ComposeError> {
    let parent = path
        .parent()
        .ok_or_else(|| ComposeError::FilesystemFault(format!("{} has no parent", path.display())))?;
    let tmp = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "memory".to_string()),
        time::new_event_id()
    ));

    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| ComposeError::FilesystemFault(format!("serializing {}: {}", path.display(), e)))?;

    let mut file = File::create(&tmp)
        .map_err(|e| ComposeError::fs(format!("creating {}", tmp.display()), e))?;
    file.write_all(rendered.as_bytes())
        .map_err(|e| ComposeError::fs(format!("writing {}", tmp.display()), e))?;
    file.sync_all()
        .map_err(|e| ComposeError::fs(format!("syncing {}", tmp.display()), e))?;
    drop(file);

    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        ComposeError::fs(format!("renaming {} -> {}", tmp.display(), path.display()), e)
    })?;
    Ok(())
}

/// Advisory exclusive lock on `<target>.lock`, released on drop. Advisory
/// locks are host-local; multi-host writers need a compare-and-swap store.
struct FileLock {
    file: File,
}

impl FileLock {
    fn acquire(target: &Path) -> Result<FileLock, ComposeError> {
        let lock_path = target.with_extension("json.lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| ComposeError::fs(format!("opening {}", lock_path.display()), e))?;
        file.lock_exclusive()
            .map_err(|e| ComposeError::fs(format!("locking {}", lock_path.display()), e))?;
        Ok(FileLock { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
