//! Schemas for the four memory files.
//!
//! Unknown fields are permitted on read (forward compatibility) and dropped
//! on write: serde ignores extra keys on deserialize and only the declared
//! fields are serialized back. Validation beyond shape (score bounds,
//! timestamp parseability, non-empty identifiers) lives in the `validate`
//! methods so both readers and writers enforce it.

use crate::core::error::{ComposeError, FieldError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Pipeline phase recorded in `system_state.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Building,
    Testing,
    Deployed,
}

/// Per-component status inside the system state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Pending,
    Building,
    Ready,
    Failed,
}

impl ComponentStatus {
    pub fn parse(raw: &str) -> Option<ComponentStatus> {
        match raw {
            "pending" => Some(ComponentStatus::Pending),
            "building" => Some(ComponentStatus::Building),
            "ready" => Some(ComponentStatus::Ready),
            "failed" => Some(ComponentStatus::Failed),
            _ => None,
        }
    }
}

impl Phase {
    pub fn parse(raw: &str) -> Option<Phase> {
        match raw {
            "planning" => Some(Phase::Planning),
            "building" => Some(Phase::Building),
            "testing" => Some(Phase::Testing),
            "deployed" => Some(Phase::Deployed),
            _ => None,
        }
    }
}

/// Singleton object stored in `system_state.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemState {
    pub system_name: String,
    pub phase: Phase,
    #[serde(default)]
    pub components_status: BTreeMap<String, ComponentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action_at: Option<String>,
    pub health_score: u8,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl SystemState {
    pub fn fresh(system_name: impl Into<String>) -> Self {
        Self {
            system_name: system_name.into(),
            phase: Phase::Planning,
            components_status: BTreeMap::new(),
            last_action: None,
            last_action_at: None,
            health_score: 100,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ComposeError> {
        if self.system_name.trim().is_empty() {
            return Err(ComposeError::MemoryFileInvalid(FieldError::new(
                "system_state.system_name",
                "must be non-empty",
            )));
        }
        if self.health_score > 100 {
            return Err(ComposeError::MemoryFileInvalid(FieldError::new(
                "system_state.health_score",
                format!("must be within 0..=100 (got {})", self.health_score),
            )));
        }
        if let Some(ts) = &self.last_action_at {
            if chrono::DateTime::parse_from_rfc3339(ts).is_err() {
                return Err(ComposeError::MemoryFileInvalid(FieldError::new(
                    "system_state.last_action_at",
                    "must be an RFC 3339 timestamp",
                )));
            }
        }
        Ok(())
    }
}

/// Who recorded a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MadeBy {
    Human,
    Agent,
}

impl MadeBy {
    pub fn parse(raw: &str) -> Option<MadeBy> {
        match raw {
            "human" => Some(MadeBy::Human),
            "agent" => Some(MadeBy::Agent),
            _ => None,
        }
    }
}

/// One append-only entry in `decision_log.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionEntry {
    pub id: Uuid,
    pub timestamp: String,
    pub decision_type: String,
    pub description: String,
    pub rationale: String,
    pub made_by: MadeBy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_components: Vec<String>,
}

impl DecisionEntry {
    pub fn validate(&self, index: usize) -> Result<(), ComposeError> {
        if self.decision_type.trim().is_empty() {
            return Err(ComposeError::MemoryFileInvalid(FieldError::new(
                format!("decision_log.{}.decision_type", index),
                "must be non-empty",
            )));
        }
        if self.description.trim().is_empty() {
            return Err(ComposeError::MemoryFileInvalid(FieldError::new(
                format!("decision_log.{}.description", index),
                "must be non-empty",
            )));
        }
        if chrono::DateTime::parse_from_rfc3339(&self.timestamp).is_err() {
            return Err(ComposeError::MemoryFileInvalid(FieldError::new(
                format!("decision_log.{}.timestamp", index),
                "must be an RFC 3339 timestamp",
            )));
        }
        Ok(())
    }
}

/// Event kinds recorded in `telemetry.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    WorkflowRun,
    TestPass,
    TestFail,
    Deploy,
    Error,
    HealthCheck,
}

impl TelemetryKind {
    pub fn parse(raw: &str) -> Option<TelemetryKind> {
        match raw {
            "workflow_run" => Some(TelemetryKind::WorkflowRun),
            "test_pass" => Some(TelemetryKind::TestPass),
            "test_fail" => Some(TelemetryKind::TestFail),
            "deploy" => Some(TelemetryKind::Deploy),
            "error" => Some(TelemetryKind::Error),
            "health_check" => Some(TelemetryKind::HealthCheck),
            _ => None,
        }
    }
}

/// One append-only entry in `telemetry.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryEvent {
    pub id: Uuid,
    pub timestamp: String,
    pub event_type: TelemetryKind,
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl TelemetryEvent {
    pub fn validate(&self, index: usize) -> Result<(), ComposeError> {
        if self.component.trim().is_empty() {
            return Err(ComposeError::MemoryFileInvalid(FieldError::new(
                format!("telemetry.{}.component", index),
                "must be non-empty",
            )));
        }
        if chrono::DateTime::parse_from_rfc3339(&self.timestamp).is_err() {
            return Err(ComposeError::MemoryFileInvalid(FieldError::new(
                format!("telemetry.{}.timestamp", index),
                "must be an RFC 3339 timestamp",
            )));
        }
        if self.unit.is_some() && self.value.is_none() {
            return Err(ComposeError::MemoryFileInvalid(FieldError::new(
                format!("telemetry.{}.unit", index),
                "unit requires a numeric value",
            )));
        }
        Ok(())
    }
}

/// Snapshot object stored in `architecture_map.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ArchitectureMap {
    #[serde(default)]
    pub components: Vec<ArchComponent>,
    #[serde(default)]
    pub dependency_graph: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchComponent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl ArchitectureMap {
    pub fn validate(&self) -> Result<(), ComposeError> {
        for (idx, component) in self.components.iter().enumerate() {
            if component.name.trim().is_empty() {
                return Err(ComposeError::MemoryFileInvalid(FieldError::new(
                    format!("architecture_map.components.{}.name", idx),
                    "must be non-empty",
                )));
            }
        }
        Ok(())
    }
}
