//! Dispatcher: forwards validated manifests to the external job system.
//!
//! A `DispatchRecord` is forwarded to the configured target: a repository
//! webhook or a filesystem queue directory. The HTTP handler observes only
//! the first attempt; bounded exponential retries continue in a detached
//! task and append their outcomes to the dispatch log. `unauthorized` is
//! terminal and never retried.

use crate::api::config::ApiConfig;
use crate::api::error::ApiError;
use crate::core::error::ComposeError;
use crate::core::manifest::Manifest;
use crate::core::time;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Event type for composition dispatches.
pub const SCAFFOLD_EVENT: &str = "scaffold-system";

/// Dispatch log file name, under the state directory.
pub const DISPATCH_LOG_FILE: &str = "dispatch_log.jsonl";

/// Record handed to the downstream worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub event_type: String,
    pub payload: DispatchPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchPayload {
    pub manifest: Manifest,
    pub manifest_path: String,
    pub initiated_at: String,
}

impl DispatchRecord {
    pub fn scaffold(manifest: Manifest) -> Self {
        let manifest_path = format!("manifests/{}.json", manifest.system_name);
        Self {
            event_type: SCAFFOLD_EVENT.to_string(),
            payload: DispatchPayload {
                manifest,
                manifest_path,
                initiated_at: time::now_rfc3339(),
            },
        }
    }
}

/// Outcome reported to the API caller for the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Dispatched,
    Skipped,
    Failed,
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::Dispatched => "dispatched",
            DispatchStatus::Skipped => "skipped",
            DispatchStatus::Failed => "failed",
        }
    }
}

/// Bounded exponential backoff policy: `attempts` tries, sleeping
/// `min(base * 2^(n-1), cap)` after failed attempt `n`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base: Duration,
    pub cap: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base: Duration::from_millis(500),
            cap: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Transport that delivers one record downstream.
#[async_trait]
pub trait DispatchTransport: Send + Sync {
    async fn send(&self, record: &DispatchRecord) -> Result<(), ComposeError>;

    /// Short target description for the dispatch log.
    fn describe(&self) -> String;
}

/// Repository-webhook transport (`repository_dispatch` shape).
pub struct WebhookTransport {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl WebhookTransport {
    pub fn new(repo: &str, token: &str, attempt_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(attempt_timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: format!("https://api.github.com/repos/{}/dispatches", repo),
            token: token.to_string(),
        }
    }
}

#[async_trait]
impl DispatchTransport for WebhookTransport {
    async fn send(&self, record: &DispatchRecord) -> Result<(), ComposeError> {
        let body = json!({
            "event_type": record.event_type,
            "client_payload": record.payload,
        });
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", concat!("forgeplane/", env!("CARGO_PKG_VERSION")))
            .json(&body)
            .send()
            .await
            .map_err(|e| ComposeError::DispatcherUnreachable(e.to_string()))?;

        match response.status().as_u16() {
            200..=299 => Ok(()),
            401 | 403 => Err(ComposeError::DispatcherUnauthorized(format!(
                "worker rejected credentials ({})",
                response.status()
            ))),
            status => Err(ComposeError::MalformedDownstreamResponse(format!(
                "unexpected status {} from {}",
                status, self.url
            ))),
        }
    }

    fn describe(&self) -> String {
        format!("webhook {}", self.url)
    }
}

/// Filesystem-queue transport: one JSON file per record.
pub struct QueueTransport {
    dir: PathBuf,
}

impl QueueTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DispatchTransport for QueueTransport {
    async fn send(&self, record: &DispatchRecord) -> Result<(), ComposeError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| ComposeError::DispatcherUnreachable(e.to_string()))?;
        let path = self.dir.join(format!("{}.json", time::new_event_id()));
        let rendered = serde_json::to_string_pretty(record)
            .map_err(|e| ComposeError::MalformedDownstreamResponse(e.to_string()))?;
        std::fs::write(&path, rendered)
            .map_err(|e| ComposeError::DispatcherUnreachable(e.to_string()))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("queue {}", self.dir.display())
    }
}

/// Dispatcher with a bounded work queue and a bounded detached-retry pool.
pub struct Dispatcher {
    transport: Option<Arc<dyn DispatchTransport>>,
    policy: RetryPolicy,
    work_permits: Arc<Semaphore>,
    retry_permits: Arc<Semaphore>,
    log_path: Option<PathBuf>,
}

impl Dispatcher {
    pub fn new(
        transport: Option<Arc<dyn DispatchTransport>>,
        policy: RetryPolicy,
        queue_depth: usize,
        retry_depth: usize,
        log_path: Option<PathBuf>,
    ) -> Self {
        Self {
            transport,
            policy,
            work_permits: Arc::new(Semaphore::new(queue_depth)),
            retry_permits: Arc::new(Semaphore::new(retry_depth)),
            log_path,
        }
    }

    /// Build from configuration: filesystem queue when `DISPATCH_QUEUE_DIR`
    /// is set, webhook when both credentials are present, otherwise
    /// disabled (dispatch is skipped, never an error).
    pub fn from_config(config: &ApiConfig) -> Self {
        let policy = RetryPolicy::default();
        let transport: Option<Arc<dyn DispatchTransport>> = match (
            &config.dispatch_queue_dir,
            &config.template_repo,
            &config.dispatch_token,
        ) {
            (Some(dir), _, _) => Some(Arc::new(QueueTransport::new(dir.clone()))),
            (None, Some(repo), Some(token)) => Some(Arc::new(WebhookTransport::new(
                repo,
                token,
                policy.attempt_timeout,
            ))),
            _ => None,
        };
        Self::new(
            transport,
            policy,
            config.dispatch_queue_depth,
            config.retry_queue_depth,
            Some(config.state_dir.join(DISPATCH_LOG_FILE)),
        )
    }

    /// Forward a record downstream.
    ///
    /// Returns after at most one attempt timeout. A retryable first-attempt
    /// failure reports `failed` and continues retrying in a detached task;
    /// the caller may still retry later from the stored manifest. Queue
    /// overflow is the only error path (503).
    pub async fn dispatch(&self, record: DispatchRecord) -> Result<DispatchStatus, ApiError> {
        let transport = match &self.transport {
            Some(transport) => Arc::clone(transport),
            None => {
                self.log(&record, 0, "skipped", Some("dispatch not configured"));
                return Ok(DispatchStatus::Skipped);
            }
        };

        let _permit = self
            .work_permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| ApiError::QueueFull)?;

        match attempt_once(&*transport, &record, self.policy.attempt_timeout).await {
            Ok(()) => {
                self.log(&record, 1, "dispatched", None);
                Ok(DispatchStatus::Dispatched)
            }
            Err(err @ ComposeError::DispatcherUnauthorized(_)) => {
                // Terminal: retrying with the same credentials cannot help.
                self.log(&record, 1, "failed", Some(&err.to_string()));
                Ok(DispatchStatus::Failed)
            }
            Err(err) => {
                self.log(&record, 1, "failed", Some(&err.to_string()));
                self.spawn_retries(transport, record);
                Ok(DispatchStatus::Failed)
            }
        }
    }

    /// Continue attempts 2..=N in a detached task. The retry pool is
    /// bounded; overflow logs the drop and gives up.
    fn spawn_retries(&self, transport: Arc<dyn DispatchTransport>, record: DispatchRecord) {
        let permit = match self.retry_permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(
                    event_type = %record.event_type,
                    "retry queue full, dropping dispatch retries"
                );
                self.log(&record, 1, "retry_dropped", Some("retry queue full"));
                return;
            }
        };
        let policy = self.policy;
        let log_path = self.log_path.clone();
        tokio::spawn(async move {
            let _permit = permit;
            for attempt in 2..=policy.attempts {
                tokio::time::sleep(policy.backoff_after(attempt - 1)).await;
                match attempt_once(&*transport, &record, policy.attempt_timeout).await {
                    Ok(()) => {
                        log_line(log_path.as_deref(), &record, attempt, "dispatched", None);
                        return;
                    }
                    Err(err @ ComposeError::DispatcherUnauthorized(_)) => {
                        log_line(
                            log_path.as_deref(),
                            &record,
                            attempt,
                            "failed",
                            Some(&err.to_string()),
                        );
                        return;
                    }
                    Err(err) => {
                        log_line(
                            log_path.as_deref(),
                            &record,
                            attempt,
                            "failed",
                            Some(&err.to_string()),
                        );
                    }
                }
            }
        });
    }

    fn log(&self, record: &DispatchRecord, attempt: u32, status: &str, error: Option<&str>) {
        log_line(self.log_path.as_deref(), record, attempt, status, error);
    }
}

/// One complete retry cycle, run inline: first attempt plus bounded
/// backoff retries. Used by the CLI path and exercised directly by tests;
/// the HTTP path splits the same loop across `dispatch` and
/// `spawn_retries`.
pub async fn run_with_retries(
    transport: &dyn DispatchTransport,
    record: &DispatchRecord,
    policy: RetryPolicy,
) -> (DispatchStatus, u32) {
    for attempt in 1..=policy.attempts {
        match attempt_once(transport, record, policy.attempt_timeout).await {
            Ok(()) => return (DispatchStatus::Dispatched, attempt),
            Err(ComposeError::DispatcherUnauthorized(_)) => {
                return (DispatchStatus::Failed, attempt);
            }
            Err(_) if attempt < policy.attempts => {
                tokio::time::sleep(policy.backoff_after(attempt)).await;
            }
            Err(_) => {}
        }
    }
    (DispatchStatus::Failed, policy.attempts)
}

async fn attempt_once(
    transport: &dyn DispatchTransport,
    record: &DispatchRecord,
    attempt_timeout: Duration,
) -> Result<(), ComposeError> {
    match tokio::time::timeout(attempt_timeout, transport.send(record)).await {
        Ok(result) => result,
        Err(_) => Err(ComposeError::DispatcherUnreachable(format!(
            "attempt timed out after {:?} ({})",
            attempt_timeout,
            transport.describe()
        ))),
    }
}

fn log_line(
    log_path: Option<&std::path::Path>,
    record: &DispatchRecord,
    attempt: u32,
    status: &str,
    error: Option<&str>,
) {
    let Some(path) = log_path else { return };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let line = json!({
        "ts": time::now_rfc3339(),
        "event_id": time::new_event_id(),
        "event_type": record.event_type,
        "system_name": record.payload.manifest.system_name,
        "manifest_path": record.payload.manifest_path,
        "attempt": attempt,
        "status": status,
        "error": error,
    });
    let result = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| writeln!(file, "{}", line));
    if let Err(err) = result {
        tracing::warn!(error = %err, "failed to append dispatch log");
    }
}
