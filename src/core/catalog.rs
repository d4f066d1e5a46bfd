//! Library catalog: filesystem index of template descriptors.
//!
//! The catalog scans a configured library root once at startup and exposes
//! read-only lookups keyed by `(category, slug)`. A template directory is
//! any directory containing a `template.toml` descriptor. Templates with
//! missing or invalid descriptors are logged as warnings and omitted; the
//! catalog never fails startup over a bad library entry.
//!
//! The catalog is immutable for the lifetime of a composition; restarts
//! pick up library edits.

use crate::core::error::ComposeError;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Descriptor file name expected inside every template directory.
pub const DESCRIPTOR_FILE: &str = "template.toml";

/// Closed set of template categories. Free-form category strings are parsed
/// once at catalog load; everything downstream dispatches on this tag.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TemplateCategory {
    Backend,
    Frontend,
    AiAgent,
    Business,
    Infrastructure,
    Governance,
    Connector,
    Industry,
}

impl TemplateCategory {
    pub const ALL: &'static [TemplateCategory] = &[
        TemplateCategory::Backend,
        TemplateCategory::Frontend,
        TemplateCategory::AiAgent,
        TemplateCategory::Business,
        TemplateCategory::Infrastructure,
        TemplateCategory::Governance,
        TemplateCategory::Connector,
        TemplateCategory::Industry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateCategory::Backend => "backend",
            TemplateCategory::Frontend => "frontend",
            TemplateCategory::AiAgent => "ai_agent",
            TemplateCategory::Business => "business",
            TemplateCategory::Infrastructure => "infrastructure",
            TemplateCategory::Governance => "governance",
            TemplateCategory::Connector => "connector",
            TemplateCategory::Industry => "industry",
        }
    }

    pub fn parse(raw: &str) -> Option<TemplateCategory> {
        TemplateCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == raw)
    }
}

impl fmt::Display for TemplateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `category:slug` reference, the unit of template addressing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateRef {
    pub category: TemplateCategory,
    pub slug: String,
}

impl TemplateRef {
    pub fn new(category: TemplateCategory, slug: impl Into<String>) -> Self {
        Self {
            category,
            slug: slug.into(),
        }
    }

    /// Parse `"category:slug"`. Returns `None` for malformed refs or
    /// unknown categories.
    pub fn parse(raw: &str) -> Option<TemplateRef> {
        let (cat, slug) = raw.split_once(':')?;
        let category = TemplateCategory::parse(cat)?;
        if slug.is_empty() {
            return None;
        }
        Some(TemplateRef::new(category, slug))
    }
}

impl fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.slug)
    }
}

/// A variable a template declares for interpolation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateVariable {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Static metadata about one template, parsed from `template.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateDescriptor {
    pub slug: String,
    pub category: TemplateCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Globs (relative to the template dir) selecting files that receive
    /// text interpolation. Everything else is copied verbatim.
    #[serde(default)]
    pub templated: Vec<String>,
    #[serde(default)]
    pub variables: Vec<TemplateVariable>,
    /// Sentinel paths (relative to the target subpath) that must exist
    /// after composition.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// `category:slug` refs this template requires in the same plan.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Absolute path of the template directory. Populated at scan time,
    /// never serialized into the snapshot.
    #[serde(skip)]
    pub source_dir: PathBuf,
}

impl TemplateDescriptor {
    pub fn template_ref(&self) -> TemplateRef {
        TemplateRef::new(self.category, self.slug.clone())
    }

    /// Parsed `requires` refs. Malformed entries were already surfaced as
    /// catalog warnings at scan time and are skipped here.
    pub fn requires_refs(&self) -> Vec<TemplateRef> {
        self.requires
            .iter()
            .filter_map(|r| TemplateRef::parse(r))
            .collect()
    }
}

/// Read-only index over the template library.
#[derive(Debug, Clone)]
pub struct Catalog {
    index: FxHashMap<(TemplateCategory, String), TemplateDescriptor>,
    snapshot: String,
    warnings: Vec<String>,
    root: PathBuf,
}

impl Catalog {
    /// Scan `root` for `template.toml` descriptors and build the index.
    ///
    /// Parse failures and duplicate `(category, slug)` pairs become
    /// warnings; the offending entries are omitted. The scan itself only
    /// fails when the root cannot be read at all.
    pub fn scan(root: &Path) -> Result<Catalog, ComposeError> {
        if !root.is_dir() {
            return Err(ComposeError::FilesystemFault(format!(
                "template library root {} is not a directory",
                root.display()
            )));
        }

        let descriptor_paths: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry.file_type().is_file() && entry.file_name() == DESCRIPTOR_FILE
            })
            .map(|entry| entry.into_path())
            .collect();

        let mut parsed: Vec<(PathBuf, Result<TemplateDescriptor, String>)> = descriptor_paths
            .into_par_iter()
            .map(|path| {
                let result = parse_descriptor(&path);
                (path, result)
            })
            .collect();
        // The parallel scan preserves input order, but sort anyway so the
        // snapshot hash never depends on scheduling.
        parsed.sort_by(|a, b| a.0.cmp(&b.0));

        let mut index = FxHashMap::default();
        let mut warnings = Vec::new();
        let mut ordered: Vec<TemplateDescriptor> = Vec::new();

        for (path, result) in parsed {
            match result {
                Ok(descriptor) => {
                    let key = (descriptor.category, descriptor.slug.clone());
                    if index.contains_key(&key) {
                        warnings.push(format!(
                            "duplicate template {} at {} (keeping first occurrence)",
                            descriptor.template_ref(),
                            path.display()
                        ));
                        continue;
                    }
                    ordered.push(descriptor.clone());
                    index.insert(key, descriptor);
                }
                Err(message) => {
                    warnings.push(format!("skipping {}: {}", path.display(), message));
                }
            }
        }

        ordered.sort_by(|a, b| a.template_ref().cmp(&b.template_ref()));
        let snapshot = snapshot_hash(&ordered);

        Ok(Catalog {
            index,
            snapshot,
            warnings,
            root: root.to_path_buf(),
        })
    }

    /// Enumerated categories with cached template counts, in tag order.
    pub fn categories(&self) -> Vec<(TemplateCategory, usize)> {
        TemplateCategory::ALL
            .iter()
            .map(|cat| {
                let count = self.index.keys().filter(|(c, _)| c == cat).count();
                (*cat, count)
            })
            .collect()
    }

    /// Descriptors in one category, sorted by slug.
    pub fn templates_in(&self, category: TemplateCategory) -> Vec<&TemplateDescriptor> {
        let mut templates: Vec<&TemplateDescriptor> = self
            .index
            .values()
            .filter(|d| d.category == category)
            .collect();
        templates.sort_by(|a, b| a.slug.cmp(&b.slug));
        templates
    }

    pub fn resolve(&self, category: TemplateCategory, slug: &str) -> Option<&TemplateDescriptor> {
        self.index.get(&(category, slug.to_string()))
    }

    pub fn resolve_ref(&self, template_ref: &TemplateRef) -> Option<&TemplateDescriptor> {
        self.resolve(template_ref.category, &template_ref.slug)
    }

    /// Content hash of the aggregate descriptor set, used to fingerprint
    /// `system-metadata.json` and the discovery API.
    pub fn snapshot_hash(&self) -> &str {
        &self.snapshot
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

fn parse_descriptor(path: &Path) -> Result<TemplateDescriptor, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| format!("read failed: {}", e))?;
    let mut descriptor: TemplateDescriptor =
        toml::from_str(&raw).map_err(|e| format!("descriptor parse failed: {}", e))?;
    if descriptor.slug.trim().is_empty() {
        return Err("descriptor slug is empty".to_string());
    }
    for req in &descriptor.requires {
        if TemplateRef::parse(req).is_none() {
            return Err(format!("malformed requires ref \"{}\"", req));
        }
    }
    descriptor.source_dir = path
        .parent()
        .ok_or_else(|| "descriptor has no parent directory".to_string())?
        .to_path_buf();
    Ok(descriptor)
}

/// SHA-256 over the sorted canonical JSON of all descriptors.
fn snapshot_hash(descriptors: &[TemplateDescriptor]) -> String {
    let canonical =
        serde_json::to_string(descriptors).unwrap_or_else(|_| String::from("[]"));
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Seed a minimal descriptor skeleton for every enumerated slug so a fresh
/// checkout can compose end-to-end. Bodies are single-file placeholders;
/// the real payloads are curated outside this tool.
pub fn seed_library(root: &Path) -> Result<usize, ComposeError> {
    use crate::core::manifest::{
        AGENT_SLUGS, BACKEND_SLUGS, BUSINESS_SLUGS, FRONTEND_SLUGS, GOVERNANCE_KEYS,
        INFRASTRUCTURE_KEYS,
    };

    let mut seeded = 0usize;
    let mut write = |category: TemplateCategory,
                     slug: &str,
                     requires: &[&str]|
     -> Result<(), ComposeError> {
        let dir = root.join(category.as_str()).join(slug);
        std::fs::create_dir_all(&dir)
            .map_err(|e| ComposeError::fs(format!("creating {}", dir.display()), e))?;
        let descriptor_path = dir.join(DESCRIPTOR_FILE);
        if descriptor_path.exists() {
            return Ok(());
        }
        let requires_toml = requires
            .iter()
            .map(|r| format!("\"{}\"", r))
            .collect::<Vec<_>>()
            .join(", ");
        let descriptor = format!(
            "slug = \"{slug}\"\ncategory = \"{category}\"\ndescription = \"Seeded {category} template\"\ntemplated = [\"README.md\"]\noutputs = [\"README.md\"]\nrequires = [{requires_toml}]\n",
            slug = slug,
            category = category.as_str(),
            requires_toml = requires_toml,
        );
        std::fs::write(&descriptor_path, descriptor)
            .map_err(|e| ComposeError::fs(format!("writing {}", descriptor_path.display()), e))?;
        let readme = format!(
            "# {{{{system_name}}}} {category} ({slug})\n\nSeeded placeholder for org {{{{org}}}}.\n",
            category = category.as_str(),
            slug = slug,
        );
        std::fs::write(dir.join("README.md"), readme)
            .map_err(|e| ComposeError::fs(format!("seeding {}", dir.display()), e))?;
        seeded += 1;
        Ok(())
    };

    write(TemplateCategory::Infrastructure, "agent-base", &[])?;
    for slug in BACKEND_SLUGS {
        write(TemplateCategory::Backend, slug, &[])?;
    }
    for slug in FRONTEND_SLUGS {
        write(TemplateCategory::Frontend, slug, &[])?;
    }
    for slug in AGENT_SLUGS {
        write(
            TemplateCategory::AiAgent,
            slug,
            &["infrastructure:agent-base"],
        )?;
    }
    for slug in BUSINESS_SLUGS {
        write(TemplateCategory::Business, slug, &[])?;
    }
    for slug in INFRASTRUCTURE_KEYS {
        write(TemplateCategory::Infrastructure, slug, &[])?;
    }
    for slug in GOVERNANCE_KEYS {
        write(TemplateCategory::Governance, slug, &[])?;
    }

    Ok(seeded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_template(root: &Path, category: &str, slug: &str, body: &str) {
        let dir = root.join(category).join(slug);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(DESCRIPTOR_FILE), body).unwrap();
        std::fs::write(dir.join("README.md"), "# {{system_name}}\n").unwrap();
    }

    #[test]
    fn test_scan_indexes_valid_descriptors() {
        let tmp = tempdir().unwrap();
        write_template(
            tmp.path(),
            "backend",
            "fastapi",
            "slug = \"fastapi\"\ncategory = \"backend\"\noutputs = [\"README.md\"]\n",
        );
        let catalog = Catalog::scan(tmp.path()).unwrap();
        assert_eq!(catalog.len(), 1);
        let descriptor = catalog
            .resolve(TemplateCategory::Backend, "fastapi")
            .unwrap();
        assert_eq!(descriptor.outputs, vec!["README.md".to_string()]);
        assert!(descriptor.source_dir.ends_with("backend/fastapi"));
    }

    #[test]
    fn test_invalid_descriptor_is_warning_not_failure() {
        let tmp = tempdir().unwrap();
        write_template(tmp.path(), "backend", "fastapi", "not valid toml [");
        let catalog = Catalog::scan(tmp.path()).unwrap();
        assert!(catalog.is_empty());
        assert_eq!(catalog.warnings().len(), 1);
        assert!(catalog.warnings()[0].contains("skipping"));
    }

    #[test]
    fn test_unknown_category_is_skipped() {
        let tmp = tempdir().unwrap();
        write_template(
            tmp.path(),
            "widgets",
            "spinner",
            "slug = \"spinner\"\ncategory = \"widget\"\n",
        );
        let catalog = Catalog::scan(tmp.path()).unwrap();
        assert!(catalog.is_empty());
        assert_eq!(catalog.warnings().len(), 1);
    }

    #[test]
    fn test_snapshot_hash_is_deterministic_and_content_sensitive() {
        let tmp = tempdir().unwrap();
        write_template(
            tmp.path(),
            "backend",
            "fastapi",
            "slug = \"fastapi\"\ncategory = \"backend\"\n",
        );
        let first = Catalog::scan(tmp.path()).unwrap().snapshot_hash().to_string();
        let second = Catalog::scan(tmp.path()).unwrap().snapshot_hash().to_string();
        assert_eq!(first, second);

        write_template(
            tmp.path(),
            "frontend",
            "dashboard",
            "slug = \"dashboard\"\ncategory = \"frontend\"\n",
        );
        let third = Catalog::scan(tmp.path()).unwrap().snapshot_hash().to_string();
        assert_ne!(first, third);
    }

    #[test]
    fn test_categories_report_counts() {
        let tmp = tempdir().unwrap();
        write_template(
            tmp.path(),
            "backend",
            "fastapi",
            "slug = \"fastapi\"\ncategory = \"backend\"\n",
        );
        write_template(
            tmp.path(),
            "backend",
            "express",
            "slug = \"express\"\ncategory = \"backend\"\n",
        );
        let catalog = Catalog::scan(tmp.path()).unwrap();
        let counts = catalog.categories();
        let backend = counts
            .iter()
            .find(|(c, _)| *c == TemplateCategory::Backend)
            .unwrap();
        assert_eq!(backend.1, 2);
    }

    #[test]
    fn test_template_ref_parse() {
        let r = TemplateRef::parse("ai_agent:research").unwrap();
        assert_eq!(r.category, TemplateCategory::AiAgent);
        assert_eq!(r.slug, "research");
        assert!(TemplateRef::parse("nonsense").is_none());
        assert!(TemplateRef::parse("widget:spinner").is_none());
        assert!(TemplateRef::parse("backend:").is_none());
    }

    #[test]
    fn test_seed_library_composes_enumerated_slugs() {
        let tmp = tempdir().unwrap();
        let seeded = seed_library(tmp.path()).unwrap();
        assert!(seeded > 20);
        let catalog = Catalog::scan(tmp.path()).unwrap();
        assert!(catalog.resolve(TemplateCategory::Backend, "fastapi").is_some());
        assert!(
            catalog
                .resolve(TemplateCategory::Infrastructure, "agent-base")
                .is_some()
        );
        let research = catalog
            .resolve(TemplateCategory::AiAgent, "research")
            .unwrap();
        assert_eq!(research.requires, vec!["infrastructure:agent-base"]);
        assert!(catalog.warnings().is_empty());
    }
}
