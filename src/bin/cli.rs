//! skelgraph CLI - Python code skeleton as a property graph.
//!
//! Usage:
//!   skelgraph ingest [--reset]       # Scan and write the graph
//!   skelgraph stats                  # Node/edge counts
//!   skelgraph imports <module>       # What a module imports
//!   skelgraph dependents <module>    # What depends on a module
//!   skelgraph defines <method>       # Classes defining a method
//!   skelgraph show <Class.full_name> # Class outline
//!   skelgraph reset                  # Clear the graph

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use skelgraph::cli::{self, Cli, Commands};
use skelgraph::config::{SkelConfig, STATE_DIR};
use skelgraph::pipeline::{self, CancelToken, RunOptions};
use skelgraph::query;
use skelgraph::store::{GraphStore, LocalStore};
use skelgraph::SkelError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Logs go to stderr so `--json` output stays clean on stdout.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .init();
}

async fn run(cli: Cli) -> Result<i32> {
    let root = pipeline::check_root(&cli.root)?;
    let state_dir = root.join(STATE_DIR);
    let mut config = SkelConfig::load_for_root(&root)?;
    let store_path = match &cli.store {
        Some(path) => path.clone(),
        None => config.resolve_store_path(&state_dir),
    };

    match cli.command {
        Commands::Ingest {
            reset,
            strict,
            workers,
        } => {
            if let Some(workers) = workers {
                config.pipeline.workers = workers.max(1);
            }
            let store = open_store(&store_path)?;
            let cancel = CancelToken::new();
            spawn_interrupt_handler(cancel.clone());

            let summary = pipeline::run(&root, &config, store, cancel, RunOptions { reset }).await?;
            if cli.json {
                print_json(&summary)?;
            } else {
                cli::print_summary(&summary);
            }
            Ok(cli::exit_code(summary.outcome(), strict))
        }

        Commands::Reset => {
            let store = open_store(&store_path)?;
            store.reset().map_err(SkelError::StoreUnavailable)?;
            println!("Graph cleared: {}", store_path.display());
            Ok(0)
        }

        Commands::Stats => {
            let store = open_store(&store_path)?;
            let stats = store.stats().map_err(SkelError::StoreUnavailable)?;
            if cli.json {
                print_json(&stats)?;
            } else {
                cli::print_stats(&stats);
            }
            Ok(0)
        }

        Commands::Imports { module } => {
            let store = open_store(&store_path)?;
            let graph = store.read().map_err(SkelError::StoreUnavailable)?;
            let modules = query::imports_of(&graph, &module);
            if cli.json {
                print_json(&modules)?;
            } else {
                cli::print_modules(&format!("{} imports", module), &modules);
            }
            Ok(0)
        }

        Commands::Dependents { module } => {
            let store = open_store(&store_path)?;
            let graph = store.read().map_err(SkelError::StoreUnavailable)?;
            let modules = query::dependents(&graph, &module);
            if cli.json {
                print_json(&modules)?;
            } else {
                cli::print_modules(&format!("Modules importing {}", module), &modules);
            }
            Ok(0)
        }

        Commands::Defines { method } => {
            let store = open_store(&store_path)?;
            let graph = store.read().map_err(SkelError::StoreUnavailable)?;
            let classes = query::classes_defining(&graph, &method);
            if cli.json {
                print_json(&classes)?;
            } else {
                cli::print_classes(&method, &classes);
            }
            Ok(0)
        }

        Commands::Show { full_name } => {
            let store = open_store(&store_path)?;
            let graph = store.read().map_err(SkelError::StoreUnavailable)?;
            match query::class_outline(&graph, &full_name) {
                Some(outline) if cli.json => print_json(&outline)?,
                Some(outline) => cli::print_outline(&outline),
                None => {
                    println!("No class named '{}'", full_name);
                    return Ok(1);
                }
            }
            Ok(0)
        }
    }
}

fn open_store(path: &Path) -> Result<Arc<LocalStore>> {
    let store = LocalStore::open(path)
        .map_err(SkelError::StoreUnavailable)
        .with_context(|| format!("opening graph at {}", path.display()))?;
    Ok(Arc::new(store))
}

/// First Ctrl-C stops the run after in-flight units; the summary still prints.
fn spawn_interrupt_handler(cancel: CancelToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received, finishing in-flight work");
                cancel.cancel();
            }
            Err(e) => info!(error = %e, "interrupt handler unavailable"),
        }
    });
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
