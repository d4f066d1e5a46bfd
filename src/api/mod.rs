//! Control plane API: a stateless HTTP surface speaking JSON.
//!
//! The API accepts manifests, validates them with the same model as the
//! engine, dispatches asynchronous composition to the external worker, and
//! exposes discovery and chat endpoints. Handlers share only read-only
//! snapshots loaded at startup; the one piece of mutable state is the
//! per-key advisory lock preventing concurrent jobs on one system name.
//!
//! Authentication is a bearer-token header compared to `API_KEY`; when the
//! key is unset, authentication is skipped (development mode).

pub mod chat;
pub mod config;
pub mod discover;
pub mod dispatch;
pub mod error;

use crate::api::chat::ChatRequest;
use crate::api::config::ApiConfig;
use crate::api::discover::DiscoverRequest;
use crate::api::dispatch::{DispatchRecord, DispatchStatus, Dispatcher};
use crate::api::error::{ApiError, Result};
use crate::core::catalog::Catalog;
use crate::core::engine::{ComposeJob, JobStatus};
use crate::core::error::FieldError;
use crate::core::manifest::Manifest;
use crate::core::time;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use rustc_hash::FxHashSet;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub const SERVICE_NAME: &str = "forgeplane";

/// Most recent jobs retained in memory; older entries are evicted.
const JOB_WINDOW: usize = 256;

/// Shared state: read-only catalog snapshot, configuration, dispatcher,
/// the per-system-name advisory lock set, and the bounded job window.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    catalog: Catalog,
    config: ApiConfig,
    dispatcher: Dispatcher,
    active_systems: Mutex<FxHashSet<String>>,
    jobs: Mutex<VecDeque<ComposeJob>>,
}

impl AppState {
    pub fn new(catalog: Catalog, config: ApiConfig, dispatcher: Dispatcher) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                catalog,
                config,
                dispatcher,
                active_systems: Mutex::new(FxHashSet::default()),
                jobs: Mutex::new(VecDeque::new()),
            }),
        }
    }

    fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    fn config(&self) -> &ApiConfig {
        &self.inner.config
    }

    /// Append a job to the window, evicting the oldest past `JOB_WINDOW`.
    fn record_job(&self, job: ComposeJob) {
        let mut jobs = self
            .inner
            .jobs
            .lock()
            .expect("job window lock is never poisoned");
        jobs.push_back(job);
        while jobs.len() > JOB_WINDOW {
            jobs.pop_front();
        }
    }

    /// Transition a recorded job. Jobs evicted from the window are
    /// silently gone; the dispatch log keeps the durable trail.
    fn update_job(&self, id: Uuid, status: JobStatus, error: Option<String>) {
        if let Ok(mut jobs) = self.inner.jobs.lock() {
            if let Some(job) = jobs.iter_mut().rev().find(|j| j.id == id) {
                job.status = status;
                job.error = error;
            }
        }
    }

    /// Snapshot of the retained jobs, oldest first.
    pub fn jobs(&self) -> Vec<ComposeJob> {
        self.inner
            .jobs
            .lock()
            .map(|jobs| jobs.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Guard holding one system name in the active set; released on drop so a
/// failed dispatch never wedges the key.
struct ActiveSystemGuard {
    state: AppState,
    system_name: String,
}

impl ActiveSystemGuard {
    fn acquire(state: &AppState, system_name: &str) -> Result<ActiveSystemGuard> {
        let mut active = state
            .inner
            .active_systems
            .lock()
            .expect("active set lock is never poisoned");
        if !active.insert(system_name.to_string()) {
            return Err(ApiError::Conflict(format!(
                "a job already targets system \"{}\"",
                system_name
            )));
        }
        Ok(ActiveSystemGuard {
            state: state.clone(),
            system_name: system_name.to_string(),
        })
    }
}

impl Drop for ActiveSystemGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.state.inner.active_systems.lock() {
            active.remove(&self.system_name);
        }
    }
}

/// Build the router with CORS and request tracing applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    Router::new()
        .route("/health", get(health_handler))
        .route("/discover", get(discover_get_handler).post(discover_post_handler))
        .route("/compose", post(compose_handler))
        .route("/chat", post(chat_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the control plane until the process is stopped.
pub async fn serve(addr: std::net::SocketAddr, state: AppState) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "control plane listening");
    axum::serve(listener, app).await
}

fn check_auth(config: &ApiConfig, headers: &HeaderMap) -> Result<()> {
    let Some(expected) = &config.api_key else {
        return Ok(());
    };
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;
    if presented != expected {
        return Err(ApiError::Unauthorized("invalid bearer token".to_string()));
    }
    Ok(())
}

fn parse_json(body: &Bytes) -> Result<Value> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("malformed JSON: {}", e)))
}

/// Map a serde deserialize failure to the closest field path. serde_json
/// reports missing/unknown fields by name in its message; everything else
/// lands on `body`.
fn field_error_from_serde(err: &serde_json::Error) -> FieldError {
    let message = err.to_string();
    let field = message
        .split('`')
        .nth(1)
        .map(|name| name.to_string())
        .unwrap_or_else(|| "body".to_string());
    FieldError::new(field, message)
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": time::now_rfc3339(),
    }))
}

async fn discover_get_handler(State(state): State<AppState>) -> Json<Value> {
    Json(discover::operations_listing(state.catalog()))
}

async fn discover_post_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    check_auth(state.config(), &headers)?;
    let value = parse_json(&body)?;
    let request: DiscoverRequest = serde_json::from_value(value)
        .map_err(|e| ApiError::BadRequest(format!("malformed discover request: {}", e)))?;
    let payload = discover::execute(&request, state.catalog())?;
    Ok(Json(payload))
}

async fn compose_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    check_auth(state.config(), &headers)?;
    let value = parse_json(&body)?;
    let manifest: Manifest = serde_json::from_value(value)
        .map_err(|e| ApiError::Validation(vec![field_error_from_serde(&e)]))?;
    manifest.validate()?;

    // Rigorous option for degraded catalogs: a manifest referencing a
    // template the catalog does not expose is rejected here, not deferred
    // to the worker.
    crate::core::plan::build_plan(&manifest, state.catalog())?;

    let _guard = ActiveSystemGuard::acquire(&state, &manifest.system_name)?;
    let system_name = manifest.system_name.clone();

    let job = ComposeJob::dispatched(manifest.clone());
    let job_id = job.id;
    state.record_job(job);
    state.update_job(job_id, JobStatus::Running, None);

    let record = DispatchRecord::scaffold(manifest);
    let initiated_at = record.payload.initiated_at.clone();
    let manifest_path = record.payload.manifest_path.clone();
    let dispatch_status = match state.inner.dispatcher.dispatch(record).await {
        Ok(status) => {
            // Skipped counts as success: the manifest was accepted and
            // there was nothing to deliver. A failed first attempt is the
            // job's terminal state here; background retries report to the
            // dispatch log only.
            match status {
                DispatchStatus::Failed => state.update_job(
                    job_id,
                    JobStatus::Failed,
                    Some("first dispatch attempt failed".to_string()),
                ),
                _ => state.update_job(job_id, JobStatus::Succeeded, None),
            }
            status
        }
        Err(err) => {
            state.update_job(job_id, JobStatus::Failed, Some(err.to_string()));
            return Err(err);
        }
    };

    // A failed or skipped dispatch is still a 200: the manifest was
    // accepted and the caller may retry the dispatch later from
    // `manifest_path`.
    Ok(Json(json!({
        "status": "dispatched",
        "system_name": system_name,
        "job_id": job_id,
        "dispatch_event": dispatch::SCAFFOLD_EVENT,
        "dispatch_status": dispatch_status.as_str(),
        "initiated_at": initiated_at,
        "manifest_path": manifest_path,
        "dispatch_note": "dispatch_status reflects the first delivery attempt only; \
            skipped means no worker credentials are configured, failed means the manifest \
            was accepted and can be re-dispatched later",
    })))
}

async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    check_auth(state.config(), &headers)?;
    let value = parse_json(&body)?;
    let request: ChatRequest = serde_json::from_value(value)
        .map_err(|e| ApiError::Validation(vec![field_error_from_serde(&e)]))?;

    let prompt = chat::latest_user_message(&request.messages).unwrap_or("");
    let intent = chat::classify(prompt);
    let catalog_summary = state
        .catalog()
        .categories()
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(category, count)| format!("{} ({})", category.as_str(), count))
        .collect::<Vec<_>>()
        .join(", ");
    let content = chat::respond(intent, &catalog_summary, env!("CARGO_PKG_VERSION"));
    Ok(Json(chat::completion_body(&request.model, prompt, content)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::dispatch::RetryPolicy;
    use tempfile::tempdir;

    fn test_state() -> AppState {
        let tmp = tempdir().unwrap();
        let catalog = Catalog::scan(tmp.path()).unwrap();
        let dispatcher = Dispatcher::new(None, RetryPolicy::default(), 4, 4, None);
        AppState::new(catalog, ApiConfig::default(), dispatcher)
    }

    fn queued_job(name: &str) -> ComposeJob {
        let manifest: Manifest = serde_json::from_value(serde_json::json!({
            "manifest_version": "1.0",
            "system_name": name,
            "org": "acme"
        }))
        .unwrap();
        ComposeJob::dispatched(manifest)
    }

    #[test]
    fn test_job_window_evicts_oldest() {
        let state = test_state();
        for i in 0..(JOB_WINDOW + 10) {
            state.record_job(queued_job(&format!("sys-{:04}", i)));
        }
        let jobs = state.jobs();
        assert_eq!(jobs.len(), JOB_WINDOW);
        assert_eq!(jobs.first().unwrap().system_name(), "sys-0010");
        assert_eq!(
            jobs.last().unwrap().system_name(),
            format!("sys-{:04}", JOB_WINDOW + 9)
        );
    }

    #[test]
    fn test_update_job_transitions_recorded_job() {
        let state = test_state();
        let job = queued_job("demo-x");
        let id = job.id;
        state.record_job(job);
        assert_eq!(state.jobs()[0].status, JobStatus::Queued);

        state.update_job(id, JobStatus::Running, None);
        assert_eq!(state.jobs()[0].status, JobStatus::Running);

        state.update_job(id, JobStatus::Failed, Some("worker unreachable".to_string()));
        let jobs = state.jobs();
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert_eq!(jobs[0].error.as_deref(), Some("worker unreachable"));
    }

    #[test]
    fn test_update_job_ignores_evicted_ids() {
        let state = test_state();
        let evicted = queued_job("evicted-one");
        let evicted_id = evicted.id;
        state.record_job(evicted);
        for i in 0..JOB_WINDOW {
            state.record_job(queued_job(&format!("sys-{:04}", i)));
        }
        state.update_job(evicted_id, JobStatus::Failed, None);
        assert!(state.jobs().iter().all(|j| j.system_name() != "evicted-one"));
    }
}
