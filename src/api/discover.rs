//! Discovery operations: the machine-readable surface that lets external
//! clients enumerate the library, the pipeline and the capability catalog.
//!
//! `GET /discover` lists the operations plus the catalog version hash;
//! `POST /discover` executes one operation. Every operation has a fixed
//! input shape; missing or malformed params are 400s with specific
//! messages.

use crate::api::error::ApiError;
use crate::core::catalog::{Catalog, TemplateCategory, TemplateRef};
use crate::core::registry;
use serde::Deserialize;
use serde_json::{Value, json};

/// Names of every discovery operation, in listing order.
pub const OPERATIONS: &[&str] = &[
    "list_categories",
    "list_templates",
    "get_template",
    "compose_system",
    "get_pipeline_stage",
    "get_capabilities",
    "get_blueprint",
];

#[derive(Debug, Deserialize)]
pub struct DiscoverRequest {
    pub operation: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Listing payload for `GET /discover`.
pub fn operations_listing(catalog: &Catalog) -> Value {
    json!({
        "operations": [
            { "name": "list_categories", "params": {}, "description": "Enumerate template categories with counts" },
            { "name": "list_templates", "params": { "category": "string" }, "description": "List descriptors in one category" },
            { "name": "get_template", "params": { "template_id": "category:slug" }, "description": "Fetch one template descriptor" },
            { "name": "compose_system", "params": { "system_name": "string" }, "description": "Pointer to POST /compose" },
            { "name": "get_pipeline_stage", "params": { "stage": "string" }, "description": "Describe one pipeline stage" },
            { "name": "get_capabilities", "params": {}, "description": "Capability catalog" },
            { "name": "get_blueprint", "params": { "blueprint_name": "string" }, "description": "Fetch a blueprint manifest" },
        ],
        "catalog_version": catalog.snapshot_hash(),
    })
}

/// Execute one discovery operation against the read-only catalog snapshot.
pub fn execute(request: &DiscoverRequest, catalog: &Catalog) -> Result<Value, ApiError> {
    let params = request.params.as_ref().unwrap_or(&Value::Null);
    match request.operation.as_str() {
        "list_categories" => Ok(list_categories(catalog)),
        "list_templates" => {
            let category = require_str(params, "category", "list_templates")?;
            let parsed = TemplateCategory::parse(category).ok_or_else(|| {
                ApiError::BadRequest(format!(
                    "unknown category \"{}\" (expected one of: {})",
                    category,
                    TemplateCategory::ALL
                        .iter()
                        .map(|c| c.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })?;
            Ok(list_templates(catalog, parsed))
        }
        "get_template" => {
            let template_id = require_str(params, "template_id", "get_template")?;
            let template_ref = TemplateRef::parse(template_id).ok_or_else(|| {
                ApiError::BadRequest(format!(
                    "malformed template_id \"{}\" (expected category:slug)",
                    template_id
                ))
            })?;
            let descriptor = catalog.resolve_ref(&template_ref).ok_or_else(|| {
                ApiError::BadRequest(format!("unknown template \"{}\"", template_ref))
            })?;
            Ok(json!({ "template": descriptor }))
        }
        "compose_system" => {
            let system_name = require_str(params, "system_name", "compose_system")?;
            Ok(json!({
                "system_name": system_name,
                "note": "composition is dispatched via POST /compose with the full manifest",
                "endpoint": "/compose",
            }))
        }
        "get_pipeline_stage" => {
            let stage = require_str(params, "stage", "get_pipeline_stage")?;
            registry::pipeline_stage(stage)
                .map(|s| json!({ "stage": s }))
                .ok_or_else(|| {
                    ApiError::BadRequest(format!(
                        "unknown pipeline stage \"{}\" (expected one of: {})",
                        stage,
                        registry::list_pipeline_stages().join(", ")
                    ))
                })
        }
        "get_capabilities" => Ok(registry::capabilities()),
        "get_blueprint" => {
            let name = require_str(params, "blueprint_name", "get_blueprint")?;
            registry::blueprint(name)
                .map(|b| json!({ "blueprint": b }))
                .ok_or_else(|| {
                    ApiError::BadRequest(format!(
                        "unknown blueprint \"{}\" (expected one of: {})",
                        name,
                        registry::list_blueprints().join(", ")
                    ))
                })
        }
        other => Err(ApiError::BadRequest(format!(
            "unknown operation \"{}\" (expected one of: {})",
            other,
            OPERATIONS.join(", ")
        ))),
    }
}

fn list_categories(catalog: &Catalog) -> Value {
    let categories: Vec<Value> = catalog
        .categories()
        .into_iter()
        .map(|(category, count)| json!({ "category": category.as_str(), "count": count }))
        .collect();
    json!({ "categories": categories })
}

fn list_templates(catalog: &Catalog, category: TemplateCategory) -> Value {
    let templates: Vec<Value> = catalog
        .templates_in(category)
        .into_iter()
        .map(|d| {
            json!({
                "slug": d.slug,
                "category": d.category.as_str(),
                "description": d.description,
                "requires": d.requires,
                "outputs": d.outputs,
            })
        })
        .collect();
    json!({ "category": category.as_str(), "templates": templates })
}

fn require_str<'a>(params: &'a Value, key: &str, operation: &str) -> Result<&'a str, ApiError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            ApiError::BadRequest(format!(
                "operation \"{}\" requires string param \"{}\"",
                operation, key
            ))
        })
}
