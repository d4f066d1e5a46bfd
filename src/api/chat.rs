//! Deterministic intent-routed chat endpoint.
//!
//! Not an LLM. The most recent user message runs through an ordered
//! keyword classifier; the response is OpenAI-shaped so existing clients
//! can point at it unchanged. Token usage counts are word-count
//! approximations of input and response; the field shape is preserved but
//! the numbers are advisory.

use crate::core::registry;
use crate::core::time;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Classified intent, first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Compose,
    ListTemplates,
    Health,
    General,
}

/// Ordered keyword rules over the most recent user message,
/// case-insensitive substring match.
pub fn classify(text: &str) -> Intent {
    let lowered = text.to_lowercase();
    const COMPOSE: &[&str] = &["compose", "scaffold", "create system"];
    const LIST: &[&str] = &["list templates", "show templates"];
    const HEALTH: &[&str] = &["status", "health"];

    if COMPOSE.iter().any(|kw| lowered.contains(kw)) {
        Intent::Compose
    } else if LIST.iter().any(|kw| lowered.contains(kw)) {
        Intent::ListTemplates
    } else if HEALTH.iter().any(|kw| lowered.contains(kw)) {
        Intent::Health
    } else {
        Intent::General
    }
}

/// Most recent message with role `user`, if any.
pub fn latest_user_message(messages: &[ChatMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.as_str())
}

/// Synthetic response content for one intent.
pub fn respond(intent: Intent, catalog_summary: &str, service_version: &str) -> String {
    match intent {
        Intent::Compose => format!(
            "POST a manifest to /compose to dispatch a composition. Sample manifest:\n{}",
            serde_json::to_string_pretty(&registry::sample_manifest())
                .unwrap_or_else(|_| "{}".to_string())
        ),
        Intent::ListTemplates => format!(
            "The template library currently exposes: {}. Use POST /discover with operation \
             \"list_templates\" and a category for descriptors.",
            catalog_summary
        ),
        Intent::Health => format!(
            "{{\"status\":\"ok\",\"service\":\"forgeplane\",\"version\":\"{}\",\"timestamp\":\"{}\"}}",
            service_version,
            time::now_rfc3339()
        ),
        Intent::General => format!(
            "Forgeplane composes repositories from declarative manifests. Capabilities: \
             {}. Ask about composing a system, listing templates, or service status.",
            registry::capabilities()["capabilities"]
                .as_array()
                .map(|caps| {
                    caps.iter()
                        .filter_map(|c| c["name"].as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default()
        ),
    }
}

/// Advisory token estimate: whitespace word count.
pub fn approximate_tokens(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

/// Assemble the OpenAI-shaped completion body.
pub fn completion_body(model: &str, prompt: &str, content: String) -> serde_json::Value {
    let prompt_tokens = approximate_tokens(prompt);
    let completion_tokens = approximate_tokens(&content);
    json!({
        "id": format!("chatcmpl-{}", time::new_event_id()),
        "object": "chat.completion",
        "created": time::now_epoch_secs(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": prompt_tokens + completion_tokens
        }
    })
}
