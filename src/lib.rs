//! Forgeplane: manifest-driven repository composer with an orchestration
//! control plane.
//!
//! **Declarative manifests in, immediately-buildable repositories out.**
//!
//! A JSON manifest names a backend, a frontend, a set of AI-agent
//! instances, business modules and governance toggles. Forgeplane resolves
//! those references against a curated template library, orders them by
//! declared dependency, materializes the result into a staging directory
//! and atomically promotes it to the output root. The same validation
//! model backs a stateless HTTP control plane that accepts manifests,
//! dispatches composition to an external worker, and answers discovery and
//! chat queries.
//!
//! # Core Principles
//!
//! - **All-or-nothing**: staging plus atomic rename; no partial output
//! - **Deterministic**: same manifest and catalog snapshot, same bytes
//! - **Stateless API**: read-only snapshots shared across handlers
//! - **Best-effort memory reads, fail-closed writes**: pipeline runners
//!   always rehydrate cleanly; schema violations never reach disk
//!
//! # Crate Structure
//!
//! - [`core`]: manifest model, catalog, planner, engine, embedded registry
//! - [`api`]: axum control plane (health, discover, compose, chat) and the
//!   dispatcher
//! - [`memory`]: disk-backed state/decision/telemetry store

pub mod api;
pub mod core;
pub mod memory;

mod cli;

use crate::api::config::ApiConfig;
use crate::api::dispatch::Dispatcher;
use crate::cli::{CatalogCommand, Cli, Command, MemoryCommand};
use crate::core::catalog::{Catalog, TemplateCategory};
use crate::core::engine::{CancelFlag, ComposeJob, ComposeOptions, JobStatus, compose};
use crate::core::error::ComposeError;
use crate::core::manifest::Manifest;
use crate::core::output::warning_block;
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Parse the CLI and dispatch. Returns the process exit code; `compose`
/// failures map to the documented 1..=5 range.
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Version => {
            println!("v{}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Command::Compose(args) => run_compose(args),
        Command::Serve(args) => run_serve(args),
        Command::Catalog(args) => run_catalog(args),
        Command::Memory(args) => run_memory(args),
    }
}

fn print_error(err: &ComposeError) {
    eprintln!(
        "{} [{}] {}",
        "error:".red().bold(),
        err.kind(),
        err
    );
    eprintln!("  next: {}", err.next_action());
}

fn run_compose(args: cli::ComposeCli) -> ExitCode {
    let result = (|| -> Result<(), ComposeError> {
        let manifest = Manifest::load(&args.manifest)?;
        let catalog = Catalog::scan(&args.template_root)?;
        for warning in catalog.warnings() {
            eprintln!("{} {}", "catalog:".yellow(), warning);
        }

        let timeout = std::env::var("MAX_COMPOSE_SECONDS")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or(crate::core::engine::DEFAULT_TIMEOUT_SECS);
        let options = ComposeOptions {
            output_root: args.output.clone(),
            dry_run: args.dry_run,
            overwrite: args.overwrite,
            timeout: Duration::from_secs(timeout),
        };
        let mut job = ComposeJob::new(manifest.clone(), &options);
        job.status = JobStatus::Running;
        let report = match compose(&manifest, &catalog, &options, &CancelFlag::new()) {
            Ok(report) => {
                job.status = JobStatus::Succeeded;
                report
            }
            Err(err) => {
                job.status = JobStatus::Failed;
                job.error = Some(err.to_string());
                return Err(err);
            }
        };

        if args.format == "json" {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "job": job,
                    "report": report,
                }))
                .unwrap_or_else(|_| "{}".to_string())
            );
        } else {
            let verb = if report.dry_run { "planned" } else { "composed" };
            println!(
                "{} {} ({} files, {} templates, {} ms, job {})",
                verb.green().bold(),
                report.system_name,
                report.files_written,
                report.resolved_templates.len(),
                report.duration_ms,
                job.id
            );
            for target in &report.plan_order {
                println!("  {}", target);
            }
            if !report.warnings.is_empty() {
                println!("{}", "warnings:".yellow());
                print!("{}", warning_block(&report.warnings, 5));
            }
        }
        Ok(())
    })();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            print_error(&err);
            ExitCode::from(err.exit_code())
        }
    }
}

fn run_serve(args: cli::ServeCli) -> ExitCode {
    match serve_blocking(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {:#}", "error:".red().bold(), err);
            ExitCode::FAILURE
        }
    }
}

fn serve_blocking(args: cli::ServeCli) -> anyhow::Result<()> {
    use anyhow::Context;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .init();

    let addr: std::net::SocketAddr = args
        .addr
        .parse()
        .with_context(|| format!("invalid listen address {}", args.addr))?;

    let catalog = Catalog::scan(&args.template_root)
        .with_context(|| format!("scanning template library {}", args.template_root.display()))?;
    for warning in catalog.warnings() {
        tracing::warn!(%warning, "catalog entry skipped");
    }
    tracing::info!(
        templates = catalog.len(),
        snapshot = %catalog.snapshot_hash(),
        "catalog loaded"
    );

    let config = ApiConfig::from_env();
    if config.api_key.is_none() {
        tracing::warn!("API_KEY unset, authentication disabled (development mode)");
    }
    if !config.dispatch_configured() {
        tracing::warn!("dispatch credentials unset, /compose will report dispatch_status=skipped");
    }
    let dispatcher = Dispatcher::from_config(&config);
    let state = api::AppState::new(catalog, config, dispatcher);

    let runtime = tokio::runtime::Runtime::new().context("building tokio runtime")?;
    runtime
        .block_on(api::serve(addr, state))
        .context("control plane server exited")?;
    Ok(())
}

fn run_catalog(args: cli::CatalogCli) -> ExitCode {
    let result = (|| -> Result<(), ComposeError> {
        match args.command {
            CatalogCommand::Seed => {
                let seeded = crate::core::catalog::seed_library(&args.template_root)?;
                println!("seeded {} templates under {}", seeded, args.template_root.display());
                return Ok(());
            }
            _ => {}
        }

        let catalog = Catalog::scan(&args.template_root)?;
        for warning in catalog.warnings() {
            eprintln!("{} {}", "catalog:".yellow(), warning);
        }

        match args.command {
            CatalogCommand::List { format } => {
                if format == "json" {
                    let listing: Vec<serde_json::Value> = catalog
                        .categories()
                        .into_iter()
                        .map(|(category, count)| {
                            serde_json::json!({"category": category.as_str(), "count": count})
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&listing).unwrap_or_default());
                } else {
                    for (category, count) in catalog.categories() {
                        println!("{:<16} {}", category.as_str(), count);
                        for descriptor in catalog.templates_in(category) {
                            println!("  {}", descriptor.slug);
                        }
                    }
                }
            }
            CatalogCommand::Show { category, slug } => {
                let parsed = TemplateCategory::parse(&category).ok_or_else(|| {
                    ComposeError::UnknownTemplate(vec![format!("{}:{}", category, slug)])
                })?;
                let descriptor = catalog.resolve(parsed, &slug).ok_or_else(|| {
                    ComposeError::UnknownTemplate(vec![format!("{}:{}", category, slug)])
                })?;
                println!(
                    "{}",
                    serde_json::to_string_pretty(descriptor).unwrap_or_default()
                );
            }
            CatalogCommand::Snapshot => {
                println!("{}", catalog.snapshot_hash());
            }
            CatalogCommand::Seed => unreachable!("handled above"),
        }
        Ok(())
    })();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            print_error(&err);
            ExitCode::from(err.exit_code())
        }
    }
}

fn state_dir_for(args_dir: Option<PathBuf>) -> PathBuf {
    args_dir
        .or_else(|| std::env::var("STATE_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(api::config::DEFAULT_STATE_DIR))
}

fn run_memory(args: cli::MemoryCli) -> ExitCode {
    use crate::memory::schema::{ComponentStatus, MadeBy, Phase, TelemetryKind};
    use crate::memory::store::{
        self, NewDecision, NewTelemetry, StatePatch, append_decision, append_telemetry,
        write_state,
    };

    let state_dir = state_dir_for(args.state_dir);

    let result = (|| -> Result<(), ComposeError> {
        match args.command {
            MemoryCommand::Rehydrate { format } => {
                let context = store::rehydrate(&state_dir);
                if format == "json" {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&context).unwrap_or_default()
                    );
                } else {
                    println!(
                        "state: {}",
                        context
                            .system_state
                            .as_ref()
                            .map(|s| format!("{:?} (health {})", s.phase, s.health_score))
                            .unwrap_or_else(|| "absent".to_string())
                    );
                    println!("decisions: {}", context.decision_log.len());
                    println!("telemetry: {}", context.telemetry.len());
                    println!(
                        "architecture: {}",
                        if context.architecture_map.is_some() {
                            "present"
                        } else {
                            "absent"
                        }
                    );
                    if !context.warnings.is_empty() {
                        println!("{}", "warnings:".yellow());
                        print!("{}", warning_block(&context.warnings, 6));
                    }
                }
                Ok(())
            }
            MemoryCommand::State {
                system_name,
                phase,
                last_action,
                health_score,
                component,
            } => {
                let phase = match phase {
                    Some(raw) => Some(Phase::parse(&raw).ok_or_else(|| {
                        ComposeError::MemoryFileInvalid(crate::core::error::FieldError::new(
                            "phase",
                            format!("unknown phase \"{}\"", raw),
                        ))
                    })?),
                    None => None,
                };
                let component = match component {
                    Some(raw) => {
                        let (name, status) = raw.split_once('=').ok_or_else(|| {
                            ComposeError::MemoryFileInvalid(crate::core::error::FieldError::new(
                                "component",
                                "expected name=status",
                            ))
                        })?;
                        let status = ComponentStatus::parse(status).ok_or_else(|| {
                            ComposeError::MemoryFileInvalid(crate::core::error::FieldError::new(
                                "component",
                                format!("unknown status \"{}\"", status),
                            ))
                        })?;
                        Some((name.to_string(), status))
                    }
                    None => None,
                };
                let state = write_state(
                    &state_dir,
                    &system_name,
                    StatePatch {
                        phase,
                        last_action,
                        health_score,
                        component,
                        ..Default::default()
                    },
                )?;
                println!(
                    "state written: {:?} (health {})",
                    state.phase, state.health_score
                );
                Ok(())
            }
            MemoryCommand::Decision {
                decision_type,
                description,
                rationale,
                made_by,
                outcome,
                related_components,
            } => {
                let made_by = MadeBy::parse(&made_by).ok_or_else(|| {
                    ComposeError::MemoryFileInvalid(crate::core::error::FieldError::new(
                        "made_by",
                        format!("expected human|agent, got \"{}\"", made_by),
                    ))
                })?;
                let entry = append_decision(
                    &state_dir,
                    NewDecision {
                        decision_type,
                        description,
                        rationale,
                        made_by,
                        outcome,
                        related_components,
                    },
                )?;
                println!("decision appended: {}", entry.id);
                Ok(())
            }
            MemoryCommand::Telemetry {
                event_type,
                component,
                value,
                unit,
            } => {
                let event_type = TelemetryKind::parse(&event_type).ok_or_else(|| {
                    ComposeError::MemoryFileInvalid(crate::core::error::FieldError::new(
                        "event_type",
                        format!("unknown event type \"{}\"", event_type),
                    ))
                })?;
                let event = append_telemetry(
                    &state_dir,
                    NewTelemetry {
                        event_type,
                        component,
                        value,
                        unit,
                        metadata: None,
                    },
                )?;
                println!("telemetry appended: {}", event.id);
                Ok(())
            }
            MemoryCommand::Timeline { format } => {
                print!("{}", crate::memory::timeline::render(&state_dir, format == "json"));
                Ok(())
            }
        }
    })();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            print_error(&err);
            ExitCode::FAILURE
        }
    }
}
