//! Error type for the control plane API.
//!
//! Engine faults are mapped to status codes here; responses carry the
//! machine kind, a human message, offending field paths where applicable,
//! and a suggested next action. Stack traces never cross the API boundary.

use crate::core::error::{ComposeError, FieldError};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Error type for API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Body was not parseable JSON, or a discovery operation was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Manifest schema failure with field-level detail.
    #[error("validation failed ({} fields)", .0.len())]
    Validation(Vec<FieldError>),

    /// Bearer token missing or wrong.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A job already targets this system name.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Dispatcher work queue is full.
    #[error("dispatch queue is full")]
    QueueFull,

    /// Any other engine fault; only the kind and a short message leak out.
    #[error("{}", .0)]
    Engine(ComposeError),
}

/// JSON error body shared by every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<serde_json::Value>,
    pub next_action: String,
}

impl From<ComposeError> for ApiError {
    fn from(err: ComposeError) -> Self {
        match err {
            ComposeError::ManifestInvalid(fields) => ApiError::Validation(fields),
            ComposeError::Authentication(msg) => ApiError::Unauthorized(msg),
            other => ApiError::Engine(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    kind: "BadRequest".to_string(),
                    error: message,
                    fields: None,
                    next_action: "fix the request payload and retry".to_string(),
                },
            ),
            ApiError::Validation(fields) => {
                let map: serde_json::Map<String, serde_json::Value> = fields
                    .iter()
                    .map(|f| (f.field.clone(), json!(f.message)))
                    .collect();
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorBody {
                        kind: "ManifestInvalid".to_string(),
                        error: format!("manifest failed validation on {} field(s)", map.len()),
                        fields: Some(serde_json::Value::Object(map)),
                        next_action: "fix the listed fields and revalidate the manifest"
                            .to_string(),
                    },
                )
            }
            ApiError::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    kind: "Authentication".to_string(),
                    error: message,
                    fields: None,
                    next_action: "supply a valid bearer token".to_string(),
                },
            ),
            ApiError::Conflict(message) => (
                StatusCode::CONFLICT,
                ErrorBody {
                    kind: "Conflict".to_string(),
                    error: message,
                    fields: None,
                    next_action: "wait for the in-flight job and retry".to_string(),
                },
            ),
            ApiError::QueueFull => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody {
                    kind: "QueueFull".to_string(),
                    error: "dispatch queue is full".to_string(),
                    fields: None,
                    next_action: "retry after a short backoff".to_string(),
                },
            ),
            ApiError::Engine(err) => {
                let status = match &err {
                    ComposeError::NameCollision(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    ComposeError::UnknownTemplate(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (
                    status,
                    ErrorBody {
                        kind: err.kind().to_string(),
                        error: err.to_string(),
                        fields: None,
                        next_action: err.next_action().to_string(),
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
