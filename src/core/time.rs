//! Shared timestamp/id helpers for deterministic envelopes.

use chrono::{SecondsFormat, Utc};
use ulid::Ulid;
use uuid::Uuid;

/// Returns the current UTC time as RFC 3339 with second precision
/// (e.g. `2026-08-01T12:00:00Z`).
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Returns unix-epoch seconds.
pub fn now_epoch_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Correlation id for events and staging directories. Lexicographically
/// sortable, unlike entity UUIDs.
pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Entity identity for jobs, decisions and telemetry events.
pub fn new_entity_id() -> Uuid {
    Uuid::new_v4()
}
