//! Manifest data model and validation.
//!
//! A manifest is the declarative JSON description of a desired composed
//! system. It is immutable once accepted and is stored verbatim in the
//! output tree for provenance. Validation collects every failing field into
//! one `ManifestInvalid` error so clients can fix a manifest in a single
//! round trip.

use crate::core::error::{ComposeError, FieldError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// The only accepted manifest version literal.
pub const MANIFEST_VERSION: &str = "1.0";

/// Enumerated backend template slugs.
pub const BACKEND_SLUGS: &[&str] = &[
    "fastapi",
    "express",
    "graphql",
    "websocket",
    "ai-inference",
    "event-worker",
];

/// Enumerated frontend template slugs.
pub const FRONTEND_SLUGS: &[&str] = &[
    "nextjs-pwa",
    "vite-react",
    "dashboard",
    "admin-panel",
    "saas-landing",
    "ai-console",
    "chat-ui",
];

/// Enumerated agent template slugs.
pub const AGENT_SLUGS: &[&str] = &[
    "research",
    "builder",
    "validator",
    "financial",
    "real-estate",
    "orchestrator",
    "content-gen",
    "social-automation",
];

/// Enumerated business template slugs.
pub const BUSINESS_SLUGS: &[&str] = &[
    "crm",
    "lead-gen",
    "billing",
    "saas-subscription",
    "marketplace",
    "portfolio-mgmt",
];

/// Enumerated memory backends.
pub const MEMORY_BACKENDS: &[&str] = &["in-memory", "redis", "postgres"];

/// Declared infrastructure toggles. Keys outside this set become warnings in
/// the composition report, never silent noise.
pub const INFRASTRUCTURE_KEYS: &[&str] = &["docker", "ci", "terraform", "kubernetes", "monitoring"];

/// Declared governance toggles (the TAP set plus audit surfaces).
pub const GOVERNANCE_KEYS: &[&str] = &["policy", "authority", "truth", "audit-log", "compliance"];

fn system_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9-]+$").expect("system name regex"))
}

fn instance_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_-]{0,62}$").expect("instance name regex"))
}

/// Declarative description of a desired composed system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub manifest_version: String,
    pub system_name: String,
    pub org: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub components: Components,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemorySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrations: Option<Integrations>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ManifestMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Components {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendComponent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend: Option<FrontendComponent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ai_agents: Vec<AgentComponent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business: Option<BusinessComponent>,
    /// Free-form toggles mapped to the declared enumeration at plan time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure: Option<BTreeMap<String, bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance: Option<BTreeMap<String, bool>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendComponent {
    pub template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrontendComponent {
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pwa: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentComponent {
    pub template: String,
    /// Defaults to the template slug when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
}

impl AgentComponent {
    /// Effective instance name: explicit name or the template slug.
    pub fn effective_instance_name(&self) -> &str {
        self.instance_name.as_deref().unwrap_or(&self.template)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusinessComponent {
    pub template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemorySpec {
    pub backend: String,
    pub ttl_seconds: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Integrations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_api: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_compatible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_dispatch: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors_origins: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ManifestMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Manifest {
    /// Validate schema rules and name constraints, collecting every failure.
    ///
    /// Duplicate agent instance names (explicit or defaulted from the
    /// template slug) are a `NameCollision`, surfaced before any resolution
    /// or write happens. All other rule failures are `ManifestInvalid`.
    pub fn validate(&self) -> Result<(), ComposeError> {
        let mut errors = Vec::new();

        if self.manifest_version != MANIFEST_VERSION {
            errors.push(FieldError::new(
                "manifest_version",
                format!(
                    "must be the literal \"{}\" (got \"{}\")",
                    MANIFEST_VERSION, self.manifest_version
                ),
            ));
        }

        if self.system_name.len() < 3 || self.system_name.len() > 63 {
            errors.push(FieldError::new(
                "system_name",
                format!(
                    "must be 3..=63 characters (got {})",
                    self.system_name.len()
                ),
            ));
        } else if !system_name_re().is_match(&self.system_name) {
            errors.push(FieldError::new(
                "system_name",
                "must match ^[a-z][a-z0-9-]+$ (kebab-case)",
            ));
        }

        if self.org.trim().is_empty() {
            errors.push(FieldError::new("org", "must be non-empty"));
        }

        if let Some(desc) = &self.description {
            if desc.chars().count() > 500 {
                errors.push(FieldError::new(
                    "description",
                    "must be at most 500 characters",
                ));
            }
        }

        if let Some(backend) = &self.components.backend {
            if !BACKEND_SLUGS.contains(&backend.template.as_str()) {
                errors.push(FieldError::new(
                    "components.backend.template",
                    format!(
                        "\"{}\" is not an allowed backend (expected one of: {})",
                        backend.template,
                        BACKEND_SLUGS.join(", ")
                    ),
                ));
            }
        }

        if let Some(frontend) = &self.components.frontend {
            if !FRONTEND_SLUGS.contains(&frontend.template.as_str()) {
                errors.push(FieldError::new(
                    "components.frontend.template",
                    format!(
                        "\"{}\" is not an allowed frontend (expected one of: {})",
                        frontend.template,
                        FRONTEND_SLUGS.join(", ")
                    ),
                ));
            }
        }

        for (idx, agent) in self.components.ai_agents.iter().enumerate() {
            if !AGENT_SLUGS.contains(&agent.template.as_str()) {
                errors.push(FieldError::new(
                    format!("components.ai_agents.{}.template", idx),
                    format!(
                        "\"{}\" is not an allowed agent (expected one of: {})",
                        agent.template,
                        AGENT_SLUGS.join(", ")
                    ),
                ));
            }
            if let Some(name) = &agent.instance_name {
                if !instance_name_re().is_match(name) {
                    errors.push(FieldError::new(
                        format!("components.ai_agents.{}.instance_name", idx),
                        "must match ^[a-z][a-z0-9_-]{0,62}$",
                    ));
                }
            }
        }

        if let Some(business) = &self.components.business {
            if !BUSINESS_SLUGS.contains(&business.template.as_str()) {
                errors.push(FieldError::new(
                    "components.business.template",
                    format!(
                        "\"{}\" is not an allowed business module (expected one of: {})",
                        business.template,
                        BUSINESS_SLUGS.join(", ")
                    ),
                ));
            }
        }

        if let Some(memory) = &self.memory {
            if !MEMORY_BACKENDS.contains(&memory.backend.as_str()) {
                errors.push(FieldError::new(
                    "memory.backend",
                    format!(
                        "\"{}\" is not an allowed memory backend (expected one of: {})",
                        memory.backend,
                        MEMORY_BACKENDS.join(", ")
                    ),
                ));
            }
            if memory.ttl_seconds < 0 {
                errors.push(FieldError::new("memory.ttl_seconds", "must be >= 0"));
            }
        }

        if !errors.is_empty() {
            return Err(ComposeError::ManifestInvalid(errors));
        }

        // Instance-name uniqueness is a collision, not a schema failure:
        // it names the target subpath that two agents would share.
        let mut seen = BTreeMap::new();
        let mut collisions = Vec::new();
        for agent in &self.components.ai_agents {
            let name = agent.effective_instance_name().to_string();
            if seen.insert(name.clone(), ()).is_some() {
                let target = format!("agents/{}", name);
                if !collisions.contains(&target) {
                    collisions.push(target);
                }
            }
        }
        if !collisions.is_empty() {
            return Err(ComposeError::NameCollision(collisions));
        }

        Ok(())
    }

    /// Toggles set to `true` whose keys are outside the declared
    /// enumerations. Reported as warnings by the engine.
    pub fn unknown_toggle_keys(&self) -> Vec<String> {
        let mut unknown = Vec::new();
        if let Some(infra) = &self.components.infrastructure {
            for key in infra.keys() {
                if !INFRASTRUCTURE_KEYS.contains(&key.as_str()) {
                    unknown.push(format!("components.infrastructure.{}", key));
                }
            }
        }
        if let Some(gov) = &self.components.governance {
            for key in gov.keys() {
                if !GOVERNANCE_KEYS.contains(&key.as_str()) {
                    unknown.push(format!("components.governance.{}", key));
                }
            }
        }
        unknown
    }

    /// Declared infrastructure toggles that are enabled and recognized.
    pub fn enabled_infrastructure(&self) -> Vec<&str> {
        self.components
            .infrastructure
            .as_ref()
            .map(|m| {
                m.iter()
                    .filter(|(k, v)| **v && INFRASTRUCTURE_KEYS.contains(&k.as_str()))
                    .map(|(k, _)| k.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Declared governance toggles that are enabled and recognized.
    pub fn enabled_governance(&self) -> Vec<&str> {
        self.components
            .governance
            .as_ref()
            .map(|m| {
                m.iter()
                    .filter(|(k, v)| **v && GOVERNANCE_KEYS.contains(&k.as_str()))
                    .map(|(k, _)| k.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Load a manifest from a JSON file without validating it.
    pub fn load(path: &std::path::Path) -> Result<Manifest, ComposeError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ComposeError::fs(format!("reading manifest {}", path.display()), e))?;
        let manifest: Manifest = serde_json::from_str(&raw).map_err(|e| {
            ComposeError::ManifestInvalid(vec![FieldError::new("manifest", e.to_string())])
        })?;
        Ok(manifest)
    }
}
