//! Embedded discovery registry.
//!
//! The capability catalog, pipeline stage registry, blueprint documents and
//! the sample manifest are versioned JSON shipped inside the binary. They
//! are consumed by the discovery API and the chat endpoint; the composer
//! treats their contents as opaque.

// NOTE: All include_str! paths are relative to this source file.

pub const CAPABILITIES_JSON: &str = include_str!("../../registry/capabilities.json");
pub const PIPELINE_STAGES_JSON: &str = include_str!("../../registry/pipeline_stages.json");
pub const SAMPLE_MANIFEST_JSON: &str = include_str!("../../registry/sample_manifest.json");

pub const BLUEPRINT_SAAS_STARTER: &str = include_str!("../../registry/blueprints/saas-starter.json");
pub const BLUEPRINT_AGENT_SWARM: &str = include_str!("../../registry/blueprints/agent-swarm.json");
pub const BLUEPRINT_LEAD_ENGINE: &str = include_str!("../../registry/blueprints/lead-engine.json");

/// Capability catalog as parsed JSON.
pub fn capabilities() -> serde_json::Value {
    serde_json::from_str(CAPABILITIES_JSON).expect("embedded capabilities.json is valid")
}

/// Names of the pipeline stages, in pipeline order.
pub fn list_pipeline_stages() -> Vec<String> {
    let stages: serde_json::Value =
        serde_json::from_str(PIPELINE_STAGES_JSON).expect("embedded pipeline_stages.json is valid");
    stages["stages"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|s| s["name"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// One pipeline stage by name, or `None` for unknown stages.
pub fn pipeline_stage(name: &str) -> Option<serde_json::Value> {
    let stages: serde_json::Value = serde_json::from_str(PIPELINE_STAGES_JSON).ok()?;
    stages["stages"]
        .as_array()?
        .iter()
        .find(|s| s["name"].as_str() == Some(name))
        .cloned()
}

pub fn list_blueprints() -> Vec<&'static str> {
    vec!["saas-starter", "agent-swarm", "lead-engine"]
}

pub fn blueprint(name: &str) -> Option<serde_json::Value> {
    let raw = match name {
        "saas-starter" => BLUEPRINT_SAAS_STARTER,
        "agent-swarm" => BLUEPRINT_AGENT_SWARM,
        "lead-engine" => BLUEPRINT_LEAD_ENGINE,
        _ => return None,
    };
    serde_json::from_str(raw).ok()
}

/// Sample manifest shown by the chat endpoint and the discovery docs.
pub fn sample_manifest() -> serde_json::Value {
    serde_json::from_str(SAMPLE_MANIFEST_JSON).expect("embedded sample_manifest.json is valid")
}
