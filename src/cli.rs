//! CLI struct definitions for the Forgeplane command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "forgeplane",
    version = env!("CARGO_PKG_VERSION"),
    about = "Forgeplane is the manifest-driven repository composer and orchestration control plane: declarative manifests in, immediately-buildable repositories out.",
    disable_version_flag = true
)]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Compose an output repository from a manifest
    Compose(ComposeCli),
    /// Run the control plane API server
    Serve(ServeCli),
    /// Inspect and maintain the template library
    Catalog(CatalogCli),
    /// Shared memory store operations (state, decisions, telemetry)
    Memory(MemoryCli),
    /// Print the tool version
    Version,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ComposeCli {
    /// Path to the manifest JSON file.
    #[clap(long)]
    pub manifest: PathBuf,
    /// Output root; the tree lands at `<output>/<system_name>/`.
    #[clap(long)]
    pub output: PathBuf,
    /// Validate, resolve and order without writing any files.
    #[clap(long)]
    pub dry_run: bool,
    /// Template library root.
    #[clap(long, default_value = "templates")]
    pub template_root: PathBuf,
    /// Replace an existing output tree for this system name.
    #[clap(long)]
    pub overwrite: bool,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ServeCli {
    /// Listen address.
    #[clap(long, default_value = "127.0.0.1:8420")]
    pub addr: String,
    /// Template library root.
    #[clap(long, default_value = "templates")]
    pub template_root: PathBuf,
}

#[derive(clap::Args, Debug)]
pub(crate) struct CatalogCli {
    /// Template library root.
    #[clap(long, default_value = "templates")]
    pub template_root: PathBuf,
    #[clap(subcommand)]
    pub command: CatalogCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CatalogCommand {
    /// List categories and template counts
    List {
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Show one template descriptor
    Show {
        /// Template category (e.g. backend, ai_agent).
        category: String,
        /// Template slug.
        slug: String,
    },
    /// Print the catalog snapshot hash
    Snapshot,
    /// Seed a minimal descriptor skeleton for every enumerated slug
    Seed,
}

#[derive(clap::Args, Debug)]
pub(crate) struct MemoryCli {
    /// State directory (defaults to $STATE_DIR, then `.memory/`).
    #[clap(long)]
    pub state_dir: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: MemoryCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum MemoryCommand {
    /// Load and validate all four memory files; always exits success
    Rehydrate {
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "json")]
        format: String,
    },
    /// Patch the system state (fails closed on schema violations)
    State {
        /// System name used when constructing a fresh state.
        #[clap(long)]
        system_name: String,
        /// Set the pipeline phase: planning|building|testing|deployed.
        #[clap(long)]
        phase: Option<String>,
        /// Record an action (timestamps last_action_at).
        #[clap(long)]
        last_action: Option<String>,
        /// Set the health score (0..=100).
        #[clap(long)]
        health_score: Option<u8>,
        /// Set one component status as `name=status`.
        #[clap(long)]
        component: Option<String>,
    },
    /// Append a decision entry
    Decision {
        #[clap(long)]
        decision_type: String,
        #[clap(long)]
        description: String,
        #[clap(long)]
        rationale: String,
        /// Who decided: human|agent.
        #[clap(long, default_value = "agent")]
        made_by: String,
        #[clap(long)]
        outcome: Option<String>,
        /// Related component (repeatable).
        #[clap(long = "component")]
        related_components: Vec<String>,
    },
    /// Append a telemetry event
    Telemetry {
        /// Event type: workflow_run|test_pass|test_fail|deploy|error|health_check.
        #[clap(long)]
        event_type: String,
        #[clap(long)]
        component: String,
        #[clap(long)]
        value: Option<f64>,
        #[clap(long)]
        unit: Option<String>,
    },
    /// Render the merged decision/telemetry timeline
    Timeline {
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
}
