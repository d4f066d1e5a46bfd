//! Control plane configuration, read once at startup.

use std::path::PathBuf;
use std::time::Duration;

/// Default state directory (`STATE_DIR`).
pub const DEFAULT_STATE_DIR: &str = ".memory";

/// Typed view of the control plane environment.
///
/// Authentication is enabled only when `API_KEY` is set; dispatch is
/// enabled only when both `TEMPLATE_REPO` and `DISPATCH_TOKEN` are set.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bearer token for request authentication. `None` disables auth
    /// (development mode).
    pub api_key: Option<String>,
    /// Downstream repository receiving dispatch events
    /// (`owner/repo` form).
    pub template_repo: Option<String>,
    /// Token for the downstream worker.
    pub dispatch_token: Option<String>,
    /// Filesystem queue directory; takes precedence over the webhook
    /// target when set (`DISPATCH_QUEUE_DIR`).
    pub dispatch_queue_dir: Option<PathBuf>,
    /// State directory for the memory store and dispatch log.
    pub state_dir: PathBuf,
    /// Composition ceiling (`MAX_COMPOSE_SECONDS`).
    pub max_compose: Duration,
    /// Bounded work queue depth for dispatcher calls; overflow is 503.
    pub dispatch_queue_depth: usize,
    /// Bounded retry queue depth; overflow logs and drops.
    pub retry_queue_depth: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            template_repo: None,
            dispatch_token: None,
            dispatch_queue_dir: None,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            max_compose: Duration::from_secs(crate::core::engine::DEFAULT_TIMEOUT_SECS),
            dispatch_queue_depth: 64,
            retry_queue_depth: 256,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let mut config = ApiConfig::default();
        config.api_key = non_empty_env("API_KEY");
        config.template_repo = non_empty_env("TEMPLATE_REPO");
        config.dispatch_token = non_empty_env("DISPATCH_TOKEN");
        config.dispatch_queue_dir = non_empty_env("DISPATCH_QUEUE_DIR").map(PathBuf::from);
        if let Some(dir) = non_empty_env("STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }
        if let Some(secs) = non_empty_env("MAX_COMPOSE_SECONDS")
            .and_then(|raw| raw.parse::<u64>().ok())
        {
            config.max_compose = Duration::from_secs(secs);
        }
        config
    }

    /// Dispatch is configured when a queue directory is set, or when both
    /// webhook credentials are present.
    pub fn dispatch_configured(&self) -> bool {
        self.dispatch_queue_dir.is_some()
            || (self.template_repo.is_some() && self.dispatch_token.is_some())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ApiConfig::default();
        assert!(config.api_key.is_none());
        assert!(!config.dispatch_configured());
        assert_eq!(config.state_dir, PathBuf::from(".memory"));
        assert_eq!(config.max_compose, Duration::from_secs(120));
        assert_eq!(config.dispatch_queue_depth, 64);
    }

    #[test]
    fn test_dispatch_requires_both_credentials() {
        let mut config = ApiConfig::default();
        config.template_repo = Some("acme/worker".to_string());
        assert!(!config.dispatch_configured());
        config.dispatch_token = Some("token".to_string());
        assert!(config.dispatch_configured());
    }
}
