//! Composition planning: template resolution, dependency ordering, and
//! target subpath assignment.
//!
//! A plan is the ordered list of write operations derived from a manifest
//! plus the catalog. Planning is pure: it touches no filesystem state and is
//! fully deterministic for a given manifest and catalog snapshot.

use crate::core::catalog::{Catalog, TemplateCategory, TemplateDescriptor, TemplateRef};
use crate::core::error::{ComposeError, FieldError};
use crate::core::manifest::Manifest;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One planned write operation: a resolved descriptor bound to an instance
/// name, variable bindings, and a target subpath inside the output tree.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanNode {
    pub category: TemplateCategory,
    pub slug: String,
    /// Distinguishes multiple agent instances of one template; equals the
    /// slug for every other category.
    pub instance_name: String,
    /// Subpath relative to the output tree root (e.g. `agents/wf`).
    pub target: String,
    pub bindings: Vec<(String, String)>,
    pub templated: Vec<String>,
    pub outputs: Vec<String>,
    pub source_dir: PathBuf,
}

impl PlanNode {
    pub fn template_ref(&self) -> TemplateRef {
        TemplateRef::new(self.category, self.slug.clone())
    }

    /// Sort key for deterministic tie-breaking.
    fn order_key(&self) -> (String, String, String) {
        (
            self.category.as_str().to_string(),
            self.slug.clone(),
            self.instance_name.clone(),
        )
    }
}

/// Ordered list of planned writes. Prerequisites always precede their
/// dependents; ties break lexicographically by
/// `(category, slug, instance_name)`.
#[derive(Debug, Clone, Default)]
pub struct CompositionPlan {
    pub nodes: Vec<PlanNode>,
}

impl CompositionPlan {
    /// Targets in write order, as recorded in `system-metadata.json`.
    pub fn order(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.target.clone()).collect()
    }

    /// Sorted unique `category:slug` refs in the plan.
    pub fn resolved_templates(&self) -> Vec<String> {
        let mut refs: Vec<String> = self
            .nodes
            .iter()
            .map(|n| n.template_ref().to_string())
            .collect::<FxHashSet<_>>()
            .into_iter()
            .collect();
        refs.sort();
        refs
    }
}

/// Selection pulled from the manifest before dependency closure: the
/// directly requested templates plus per-instance naming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct Selection {
    template_ref: TemplateRef,
    instance_name: String,
}

fn manifest_selections(manifest: &Manifest) -> Vec<Selection> {
    let mut selections = Vec::new();
    if let Some(backend) = &manifest.components.backend {
        selections.push(Selection {
            template_ref: TemplateRef::new(TemplateCategory::Backend, backend.template.clone()),
            instance_name: backend.template.clone(),
        });
    }
    if let Some(frontend) = &manifest.components.frontend {
        selections.push(Selection {
            template_ref: TemplateRef::new(TemplateCategory::Frontend, frontend.template.clone()),
            instance_name: frontend.template.clone(),
        });
    }
    for agent in &manifest.components.ai_agents {
        selections.push(Selection {
            template_ref: TemplateRef::new(TemplateCategory::AiAgent, agent.template.clone()),
            instance_name: agent.effective_instance_name().to_string(),
        });
    }
    if let Some(business) = &manifest.components.business {
        selections.push(Selection {
            template_ref: TemplateRef::new(TemplateCategory::Business, business.template.clone()),
            instance_name: business.template.clone(),
        });
    }
    for slug in manifest.enabled_infrastructure() {
        selections.push(Selection {
            template_ref: TemplateRef::new(TemplateCategory::Infrastructure, slug),
            instance_name: slug.to_string(),
        });
    }
    for slug in manifest.enabled_governance() {
        selections.push(Selection {
            template_ref: TemplateRef::new(TemplateCategory::Governance, slug),
            instance_name: slug.to_string(),
        });
    }
    selections
}

/// Target subpath for a node. Agent instances get their own directory under
/// `agents/`; slug-scoped categories nest under the category directory.
fn target_subpath(category: TemplateCategory, slug: &str, instance_name: &str) -> String {
    match category {
        TemplateCategory::Backend => "backend".to_string(),
        TemplateCategory::Frontend => "frontend".to_string(),
        TemplateCategory::AiAgent => format!("agents/{}", instance_name),
        TemplateCategory::Business => "business".to_string(),
        TemplateCategory::Infrastructure => format!("infrastructure/{}", slug),
        TemplateCategory::Governance => format!("governance/{}", slug),
        TemplateCategory::Connector => format!("connectors/{}", slug),
        TemplateCategory::Industry => format!("industry/{}", slug),
    }
}

/// Variable bindings for one node: the three builtins plus every
/// descriptor-declared variable's default. A required variable without a
/// default cannot be bound and fails the plan.
fn bindings_for(
    manifest: &Manifest,
    descriptor: &TemplateDescriptor,
    instance_name: &str,
) -> Result<Vec<(String, String)>, FieldError> {
    let mut bindings = vec![
        ("system_name".to_string(), manifest.system_name.clone()),
        ("org".to_string(), manifest.org.clone()),
        ("instance_name".to_string(), instance_name.to_string()),
    ];
    for variable in &descriptor.variables {
        match &variable.default {
            Some(default) => bindings.push((variable.name.clone(), default.clone())),
            None if variable.required => {
                return Err(FieldError::new(
                    format!(
                        "templates.{}.variables.{}",
                        descriptor.template_ref(),
                        variable.name
                    ),
                    "required variable has no default and no binding source",
                ));
            }
            None => {}
        }
    }
    Ok(bindings)
}

/// Build the composition plan: resolve every reference (collecting all
/// misses), close over declared dependencies, order topologically with
/// deterministic tie-breaks, assign targets, and reject collisions.
pub fn build_plan(manifest: &Manifest, catalog: &Catalog) -> Result<CompositionPlan, ComposeError> {
    let selections = manifest_selections(manifest);

    // Resolve direct references and the transitive requires closure,
    // collecting every missing ref before failing.
    let mut missing: Vec<String> = Vec::new();
    let mut resolved: BTreeMap<TemplateRef, TemplateDescriptor> = BTreeMap::new();
    let mut queue: Vec<TemplateRef> = selections.iter().map(|s| s.template_ref.clone()).collect();

    while let Some(template_ref) = queue.pop() {
        if resolved.contains_key(&template_ref) {
            continue;
        }
        match catalog.resolve_ref(&template_ref) {
            Some(descriptor) => {
                queue.extend(descriptor.requires_refs());
                resolved.insert(template_ref, descriptor.clone());
            }
            None => {
                let display = template_ref.to_string();
                if !missing.contains(&display) {
                    missing.push(display);
                }
            }
        }
    }
    if !missing.is_empty() {
        missing.sort();
        return Err(ComposeError::UnknownTemplate(missing));
    }

    // Nodes: one per manifest selection, plus one per dependency template
    // that was not itself selected.
    let mut nodes: Vec<PlanNode> = Vec::new();
    let mut binding_errors: Vec<FieldError> = Vec::new();
    let selected_refs: FxHashSet<TemplateRef> =
        selections.iter().map(|s| s.template_ref.clone()).collect();

    for selection in &selections {
        let descriptor = &resolved[&selection.template_ref];
        match bindings_for(manifest, descriptor, &selection.instance_name) {
            Ok(bindings) => nodes.push(PlanNode {
                category: descriptor.category,
                slug: descriptor.slug.clone(),
                instance_name: selection.instance_name.clone(),
                target: target_subpath(
                    descriptor.category,
                    &descriptor.slug,
                    &selection.instance_name,
                ),
                bindings,
                templated: descriptor.templated.clone(),
                outputs: descriptor.outputs.clone(),
                source_dir: descriptor.source_dir.clone(),
            }),
            Err(err) => binding_errors.push(err),
        }
    }
    for (template_ref, descriptor) in &resolved {
        if selected_refs.contains(template_ref) {
            continue;
        }
        match bindings_for(manifest, descriptor, &descriptor.slug) {
            Ok(bindings) => nodes.push(PlanNode {
                category: descriptor.category,
                slug: descriptor.slug.clone(),
                instance_name: descriptor.slug.clone(),
                target: target_subpath(descriptor.category, &descriptor.slug, &descriptor.slug),
                bindings,
                templated: descriptor.templated.clone(),
                outputs: descriptor.outputs.clone(),
                source_dir: descriptor.source_dir.clone(),
            }),
            Err(err) => binding_errors.push(err),
        }
    }
    if !binding_errors.is_empty() {
        return Err(ComposeError::ManifestInvalid(binding_errors));
    }

    // Target collision check before ordering: two nodes may not write to
    // the same subpath.
    let mut by_target: FxHashMap<String, usize> = FxHashMap::default();
    let mut collisions: Vec<String> = Vec::new();
    for node in &nodes {
        *by_target.entry(node.target.clone()).or_insert(0) += 1;
    }
    for (target, count) in &by_target {
        if *count > 1 {
            collisions.push(target.clone());
        }
    }
    if !collisions.is_empty() {
        collisions.sort();
        return Err(ComposeError::NameCollision(collisions));
    }

    let ordered = topo_order(nodes, &resolved)?;
    Ok(CompositionPlan { nodes: ordered })
}

/// Kahn's algorithm with a sorted ready set. Edges run from prerequisite to
/// dependent: a node becomes ready only after every template it requires
/// has been emitted.
fn topo_order(
    nodes: Vec<PlanNode>,
    resolved: &BTreeMap<TemplateRef, TemplateDescriptor>,
) -> Result<Vec<PlanNode>, ComposeError> {
    // Dependencies are declared per template; every instance of a template
    // shares them.
    let mut indegree: Vec<usize> = vec![0; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut by_ref: FxHashMap<TemplateRef, Vec<usize>> = FxHashMap::default();
    for (idx, node) in nodes.iter().enumerate() {
        by_ref.entry(node.template_ref()).or_default().push(idx);
    }

    for (idx, node) in nodes.iter().enumerate() {
        let descriptor = &resolved[&node.template_ref()];
        for prereq in descriptor.requires_refs() {
            if prereq == node.template_ref() {
                return Err(ComposeError::DependencyCycle(vec![
                    node.template_ref().to_string(),
                    node.template_ref().to_string(),
                ]));
            }
            if let Some(prereq_nodes) = by_ref.get(&prereq) {
                for &prereq_idx in prereq_nodes {
                    dependents[prereq_idx].push(idx);
                    indegree[idx] += 1;
                }
            }
        }
    }

    let mut ready: Vec<usize> = (0..nodes.len()).filter(|&i| indegree[i] == 0).collect();
    let mut ordered_indices = Vec::with_capacity(nodes.len());
    while !ready.is_empty() {
        // Smallest (category, slug, instance_name) first for determinism.
        ready.sort_by(|&a, &b| nodes[b].order_key().cmp(&nodes[a].order_key()));
        let next = ready.pop().expect("ready set is non-empty");
        ordered_indices.push(next);
        for &dependent in &dependents[next] {
            indegree[dependent] -= 1;
            if indegree[dependent] == 0 {
                ready.push(dependent);
            }
        }
    }

    if ordered_indices.len() != nodes.len() {
        let placed: FxHashSet<usize> = ordered_indices.iter().copied().collect();
        let stuck: Vec<&PlanNode> = nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| !placed.contains(i))
            .map(|(_, n)| n)
            .collect();
        let cycle = find_cycle(&stuck, resolved);
        return Err(ComposeError::DependencyCycle(cycle));
    }

    let mut by_index: FxHashMap<usize, PlanNode> =
        nodes.into_iter().enumerate().collect();
    Ok(ordered_indices
        .into_iter()
        .map(|i| by_index.remove(&i).expect("index emitted once"))
        .collect())
}

/// Walk requires edges from an arbitrary unplaced node until a template ref
/// repeats; the repeated window is the reported cycle.
fn find_cycle(
    stuck: &[&PlanNode],
    resolved: &BTreeMap<TemplateRef, TemplateDescriptor>,
) -> Vec<String> {
    let start = match stuck.first() {
        Some(node) => node.template_ref(),
        None => return Vec::new(),
    };
    let mut path: Vec<TemplateRef> = vec![start.clone()];
    let mut current = start;
    loop {
        let descriptor = match resolved.get(&current) {
            Some(d) => d,
            None => break,
        };
        let next = match descriptor.requires_refs().into_iter().next() {
            Some(n) => n,
            None => break,
        };
        if let Some(pos) = path.iter().position(|r| *r == next) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|r| r.to_string()).collect();
            cycle.push(next.to_string());
            return cycle;
        }
        path.push(next.clone());
        current = next;
    }
    path.into_iter().map(|r| r.to_string()).collect()
}
