//! Command-line surface for skelgraph.
//!
//! Commands:
//! - Ingest: ingest
//! - Query: stats, imports, dependents, defines, show
//! - System: reset

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::query::{ClassOutline, ClassRef, ModuleRef};
use crate::store::GraphStats;
use crate::summary::{RunOutcome, RunSummary};

#[derive(Parser, Debug)]
#[command(name = "skelgraph")]
#[command(about = "Extract the structural skeleton of a Python codebase into a graph")]
#[command(version)]
pub struct Cli {
    /// Project root directory (default: current directory)
    #[arg(short, long, default_value = ".")]
    pub root: PathBuf,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Graph snapshot path (default: from config, under .skelgraph/)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan the root and write its skeleton into the graph
    Ingest {
        /// Clear the graph before writing
        #[arg(long)]
        reset: bool,

        /// Exit with status 2 when the run completes with warnings
        #[arg(long)]
        strict: bool,

        /// Concurrent extraction and write workers
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Node and edge counts per kind
    Stats,

    /// Modules imported by a module
    Imports {
        /// Dotted module name
        module: String,
    },

    /// Modules that import a module
    Dependents {
        /// Dotted module name
        module: String,
    },

    /// Classes defining a method with this name
    Defines {
        /// Method name
        method: String,
    },

    /// A class with its methods and attributes
    Show {
        /// Class full name (`module.Class`)
        full_name: String,
    },

    /// Clear the graph
    Reset,
}

/// Process exit status for a finished ingestion.
pub fn exit_code(outcome: RunOutcome, strict: bool) -> i32 {
    match outcome {
        RunOutcome::Clean => 0,
        RunOutcome::CompletedWithWarnings if strict => 2,
        RunOutcome::CompletedWithWarnings => 0,
        RunOutcome::Aborted => 1,
    }
}

pub fn print_summary(summary: &RunSummary) {
    println!("{}", summary);
    if !summary.unresolved_imports.is_empty() {
        println!();
        println!("Unresolved imports:");
        for unresolved in summary.unresolved_imports.iter().take(20) {
            println!("  {} -> {}", unresolved.module, unresolved.reference);
        }
        if summary.unresolved_imports.len() > 20 {
            println!("  ... and {} more", summary.unresolved_imports.len() - 20);
        }
    }
}

pub fn print_stats(stats: &GraphStats) {
    println!("Graph Statistics");
    println!("════════════════");
    println!("Nodes: {}", stats.total_nodes);
    for (kind, count) in &stats.nodes {
        println!("  {:<14} {}", kind.to_string(), count);
    }
    println!("Edges: {}", stats.total_edges);
    for (kind, count) in &stats.edges {
        println!("  {:<14} {}", kind.to_string(), count);
    }
}

pub fn print_modules(title: &str, modules: &[ModuleRef]) {
    if modules.is_empty() {
        println!("{}: none", title);
        return;
    }
    println!("{}:", title);
    for module in modules {
        println!("  {} ({})", module.name, module.path);
    }
}

pub fn print_classes(method: &str, classes: &[ClassRef]) {
    if classes.is_empty() {
        println!("No class defines '{}'", method);
        return;
    }
    println!("Classes defining '{}':", method);
    for class in classes {
        match &class.module {
            Some(module) => println!("  {} (module {})", class.full_name, module),
            None => println!("  {}", class.full_name),
        }
    }
}

pub fn print_outline(outline: &ClassOutline) {
    println!("class {}", outline.class.full_name);
    if let Some(module) = &outline.class.module {
        println!("  module: {}", module);
    }
    if !outline.attributes.is_empty() {
        println!("  attributes:");
        for attribute in &outline.attributes {
            println!("    {}", attribute);
        }
    }
    if !outline.methods.is_empty() {
        println!("  methods:");
        for method in &outline.methods {
            println!("    {}({})", method.name, method.params.join(", "));
        }
    }
}
