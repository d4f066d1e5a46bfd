//! Error types for Forgeplane operations.
//!
//! This module defines the canonical error type used throughout Forgeplane.
//! All subsystems return `Result<T, ComposeError>` for error handling. Each
//! variant corresponds to one machine-readable failure kind; the API layer
//! and the CLI map kinds to status codes and exit codes respectively.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// A single field-level validation failure.
///
/// `field` is a dotted path into the manifest or memory document
/// (e.g. `components.ai_agents.1.instance_name`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(FieldError::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Canonical error type for all Forgeplane operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait
/// implementations. Engine faults abort the job with no partial output; the
/// variant carries the structured cause (field path, template ref, or path).
#[derive(Error, Debug)]
pub enum ComposeError {
    /// Manifest failed schema or rule validation. Carries every failing
    /// field, not just the first.
    #[error("manifest invalid: {}", join_field_errors(.0))]
    ManifestInvalid(Vec<FieldError>),

    /// Manifest references template slugs the catalog does not expose.
    /// Carries every missing `category:slug` ref (no short-circuit).
    #[error("unknown template(s): {}", .0.join(", "))]
    UnknownTemplate(Vec<String>),

    /// Template descriptors form a dependency cycle.
    #[error("dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    /// Two planned nodes request the same target subpath.
    #[error("name collision: {}", .0.join(", "))]
    NameCollision(Vec<String>),

    /// Write, rename, or permission failure during staging or promote.
    #[error("filesystem fault: {0}")]
    FilesystemFault(String),

    /// A declared output path was missing after materialization.
    #[error("post-verify fault: {0}")]
    PostVerifyFault(String),

    /// Composition exceeded its configured ceiling.
    #[error("composition timed out after {0}s")]
    Timeout(u64),

    /// Composition was cancelled by its owner; staging has been removed.
    #[error("composition cancelled")]
    Cancelled,

    /// Downstream worker rejected the dispatch credentials. Terminal, never
    /// retried.
    #[error("dispatcher unauthorized: {0}")]
    DispatcherUnauthorized(String),

    /// Downstream worker could not be reached (transport or timeout).
    #[error("dispatcher unreachable: {0}")]
    DispatcherUnreachable(String),

    /// Downstream worker answered with a payload we could not interpret.
    #[error("malformed downstream response: {0}")]
    MalformedDownstreamResponse(String),

    /// A memory file failed schema validation. Carries the failing field.
    #[error("memory file invalid: {0}")]
    MemoryFileInvalid(FieldError),

    /// Bearer token missing or wrong.
    #[error("authentication failed: {0}")]
    Authentication(String),
}

impl ComposeError {
    /// Machine-readable kind string, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            ComposeError::ManifestInvalid(_) => "ManifestInvalid",
            ComposeError::UnknownTemplate(_) => "UnknownTemplate",
            ComposeError::DependencyCycle(_) => "DependencyCycle",
            ComposeError::NameCollision(_) => "NameCollision",
            ComposeError::FilesystemFault(_) => "FilesystemFault",
            ComposeError::PostVerifyFault(_) => "PostVerifyFault",
            ComposeError::Timeout(_) => "Timeout",
            ComposeError::Cancelled => "Cancelled",
            ComposeError::DispatcherUnauthorized(_) => "DispatcherUnauthorized",
            ComposeError::DispatcherUnreachable(_) => "DispatcherUnreachable",
            ComposeError::MalformedDownstreamResponse(_) => "MalformedDownstreamResponse",
            ComposeError::MemoryFileInvalid(_) => "MemoryFileInvalid",
            ComposeError::Authentication(_) => "Authentication",
        }
    }

    /// Suggested next action for the operator, included in every
    /// user-visible failure.
    pub fn next_action(&self) -> &'static str {
        match self {
            ComposeError::ManifestInvalid(_) | ComposeError::NameCollision(_) => {
                "fix the listed fields and revalidate the manifest"
            }
            ComposeError::UnknownTemplate(_) | ComposeError::DependencyCycle(_) => {
                "check the template library catalog (forgeplane catalog list)"
            }
            ComposeError::FilesystemFault(_) | ComposeError::PostVerifyFault(_) => {
                "inspect the output directory permissions and retry"
            }
            ComposeError::Timeout(_) | ComposeError::Cancelled => "retry the composition",
            ComposeError::DispatcherUnauthorized(_) => "check DISPATCH_TOKEN and retry",
            ComposeError::DispatcherUnreachable(_)
            | ComposeError::MalformedDownstreamResponse(_) => {
                "retry the dispatch from the stored manifest"
            }
            ComposeError::MemoryFileInvalid(_) => "repair or remove the named memory file",
            ComposeError::Authentication(_) => "supply a valid bearer token",
        }
    }

    /// CLI exit code mapping for `forgeplane compose`.
    pub fn exit_code(&self) -> u8 {
        match self {
            ComposeError::ManifestInvalid(_) | ComposeError::NameCollision(_) => 1,
            ComposeError::UnknownTemplate(_) | ComposeError::DependencyCycle(_) => 2,
            ComposeError::FilesystemFault(_) => 3,
            ComposeError::Timeout(_) | ComposeError::Cancelled => 4,
            ComposeError::PostVerifyFault(_) => 5,
            _ => 3,
        }
    }

    /// Convenience constructor for filesystem faults with path context.
    pub fn fs(context: impl fmt::Display, err: io::Error) -> Self {
        ComposeError::FilesystemFault(format!("{}: {}", context, err))
    }
}

impl From<io::Error> for ComposeError {
    fn from(err: io::Error) -> Self {
        ComposeError::FilesystemFault(err.to_string())
    }
}

impl From<serde_json::Error> for ComposeError {
    fn from(err: serde_json::Error) -> Self {
        ComposeError::ManifestInvalid(vec![FieldError::new("body", err.to_string())])
    }
}
