//! Per-run summary: what was found, written, skipped and why.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::discover::DiscoveryWarning;
use crate::extract::ParseFailure;
use crate::resolve::UnresolvedImport;
use crate::writer::{WriteFailure, WriteReport};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Clean,
    CompletedWithWarnings,
    /// Cancelled before every phase finished.
    Aborted,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Clean => write!(f, "completed cleanly"),
            RunOutcome::CompletedWithWarnings => write!(f, "completed with warnings"),
            RunOutcome::Aborted => write!(f, "aborted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub root: PathBuf,

    pub modules_discovered: usize,
    pub modules_parsed: usize,
    pub parse_failures: Vec<ParseFailure>,
    pub discovery_warnings: Vec<DiscoveryWarning>,

    pub classes_written: usize,
    pub methods_written: usize,
    pub attributes_written: usize,
    pub import_edges: usize,

    pub nodes_created: usize,
    /// Existing nodes rewritten, each node counted once per run.
    pub nodes_updated: usize,
    pub edges_created: usize,
    pub write_retries: usize,

    pub unresolved_imports: Vec<UnresolvedImport>,
    pub write_failures: Vec<WriteFailure>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn new(root: PathBuf) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            duration_ms: 0,
            root,
            modules_discovered: 0,
            modules_parsed: 0,
            parse_failures: Vec::new(),
            discovery_warnings: Vec::new(),
            classes_written: 0,
            methods_written: 0,
            attributes_written: 0,
            import_edges: 0,
            nodes_created: 0,
            nodes_updated: 0,
            edges_created: 0,
            write_retries: 0,
            unresolved_imports: Vec::new(),
            write_failures: Vec::new(),
            cancelled: false,
        }
    }

    /// Fold the writer's totals in.
    pub fn absorb_writes(&mut self, report: WriteReport) {
        self.classes_written = report.classes_written;
        self.methods_written = report.methods_written;
        self.attributes_written = report.attributes_written;
        self.import_edges = report.import_edges;
        self.nodes_created = report.store.nodes_created;
        self.nodes_updated = report.store.nodes_updated;
        self.edges_created = report.store.edges_created;
        self.write_retries = report.retries;
        self.write_failures = report.failures;
        self.cancelled |= report.cancelled;
    }

    /// Warnings that make a run "completed with warnings".
    ///
    /// Unresolved imports are reported but do not count: most of them name
    /// the standard library or third-party packages.
    pub fn warning_count(&self) -> usize {
        self.parse_failures.len() + self.discovery_warnings.len() + self.write_failures.len()
    }

    pub fn outcome(&self) -> RunOutcome {
        if self.cancelled {
            RunOutcome::Aborted
        } else if self.warning_count() > 0 {
            RunOutcome::CompletedWithWarnings
        } else {
            RunOutcome::Clean
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {} ({}): {}", self.run_id, self.root.display(), self.outcome())?;
        writeln!(
            f,
            "  modules:    {} discovered, {} parsed, {} failed",
            self.modules_discovered,
            self.modules_parsed,
            self.parse_failures.len()
        )?;
        writeln!(
            f,
            "  written:    {} classes, {} methods, {} attributes, {} import edges",
            self.classes_written, self.methods_written, self.attributes_written, self.import_edges
        )?;
        writeln!(
            f,
            "  store:      {} nodes created, {} updated, {} edges created",
            self.nodes_created, self.nodes_updated, self.edges_created
        )?;
        writeln!(f, "  unresolved: {} import references", self.unresolved_imports.len())?;
        write!(f, "  took:       {}ms", self.duration_ms)?;

        if !self.discovery_warnings.is_empty() {
            write!(f, "\n\nDiscovery warnings:")?;
            for warning in &self.discovery_warnings {
                write!(f, "\n  {}", warning)?;
            }
        }
        if !self.parse_failures.is_empty() {
            write!(f, "\n\nParse failures:")?;
            for failure in &self.parse_failures {
                write!(f, "\n  {}: {}", failure.path.display(), failure.reason)?;
            }
        }
        if !self.write_failures.is_empty() {
            write!(f, "\n\nWrite failures:")?;
            for failure in &self.write_failures {
                write!(
                    f,
                    "\n  [{}] {}: {} (after {} attempts)",
                    failure.phase, failure.module, failure.reason, failure.attempts
                )?;
            }
        }
        Ok(())
    }
}
