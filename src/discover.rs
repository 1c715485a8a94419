//! File discovery: walks the scan root and yields candidate source files.
//!
//! The walk is lazy and restartable: every call to [`Discoverer::walk`]
//! starts a fresh traversal. Entries that cannot be read never abort the
//! walk; they come out of the iterator as [`DiscoveryEvent::Warning`].

use ignore::{DirEntry, WalkBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::{ScanConfig, STATE_DIR};

/// One step of a directory walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    File(PathBuf),
    Warning(DiscoveryWarning),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Permission denied or another I/O failure on an entry.
    Unreadable,
    /// A symlink whose target does not exist.
    BrokenLink,
    /// A symlink that points back at one of its ancestors.
    SymlinkLoop,
    /// Two files map to the same module name; the later one is skipped.
    DuplicateModule,
}

/// A non-fatal problem met while discovering files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryWarning {
    pub kind: WarningKind,
    pub path: Option<PathBuf>,
    pub message: String,
}

impl std::fmt::Display for DiscoveryWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", path.display(), self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Walks a root directory for files matching the configured suffixes.
#[derive(Debug, Clone)]
pub struct Discoverer {
    root: PathBuf,
    extensions: Vec<String>,
    follow_links: bool,
    respect_gitignore: bool,
    include_hidden: bool,
}

impl Discoverer {
    pub fn new(root: &Path, scan: &ScanConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            extensions: scan
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_string())
                .collect(),
            follow_links: scan.follow_links,
            respect_gitignore: scan.respect_gitignore,
            include_hidden: scan.include_hidden,
        }
    }

    /// Whether `path` carries one of the configured source suffixes.
    pub fn is_source(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|want| want == ext))
    }

    /// Start a new walk. Order is not significant.
    pub fn walk(&self) -> impl Iterator<Item = DiscoveryEvent> + '_ {
        let walker = WalkBuilder::new(&self.root)
            .hidden(!self.include_hidden)
            .git_ignore(self.respect_gitignore)
            .git_global(self.respect_gitignore)
            .git_exclude(self.respect_gitignore)
            .ignore(self.respect_gitignore)
            .parents(self.respect_gitignore)
            .follow_links(self.follow_links)
            .filter_entry(|entry| entry.file_name() != STATE_DIR)
            .build();

        walker.filter_map(move |entry| match entry {
            Ok(entry) => self.classify(entry),
            Err(err) => Some(DiscoveryEvent::Warning(warning_from_error(&err))),
        })
    }

    /// Convenience: every source file of one walk, warnings split off.
    pub fn collect(&self) -> (Vec<PathBuf>, Vec<DiscoveryWarning>) {
        let mut files = Vec::new();
        let mut warnings = Vec::new();
        for event in self.walk() {
            match event {
                DiscoveryEvent::File(path) => files.push(path),
                DiscoveryEvent::Warning(warning) => warnings.push(warning),
            }
        }
        (files, warnings)
    }

    fn classify(&self, entry: DirEntry) -> Option<DiscoveryEvent> {
        let file_type = entry.file_type()?;
        if file_type.is_dir() || !self.is_source(entry.path()) {
            return None;
        }
        if file_type.is_file() {
            return Some(DiscoveryEvent::File(entry.into_path()));
        }
        if file_type.is_symlink() {
            // Reached only when links are not followed: accept links to
            // regular files, report dangling ones.
            return match std::fs::metadata(entry.path()) {
                Ok(meta) if meta.is_file() => Some(DiscoveryEvent::File(entry.into_path())),
                Ok(_) => None,
                Err(e) => {
                    debug!(path = %entry.path().display(), error = %e, "dangling symlink");
                    Some(DiscoveryEvent::Warning(DiscoveryWarning {
                        kind: WarningKind::BrokenLink,
                        path: Some(entry.into_path()),
                        message: format!("broken link: {}", e),
                    }))
                }
            };
        }
        None
    }
}

fn warning_from_error(err: &ignore::Error) -> DiscoveryWarning {
    let kind = match innermost(err) {
        ignore::Error::Loop { .. } => WarningKind::SymlinkLoop,
        ignore::Error::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
            WarningKind::BrokenLink
        }
        _ => WarningKind::Unreadable,
    };
    DiscoveryWarning {
        kind,
        path: error_path(err),
        message: err.to_string(),
    }
}

fn innermost(err: &ignore::Error) -> &ignore::Error {
    match err {
        ignore::Error::WithPath { err, .. }
        | ignore::Error::WithDepth { err, .. }
        | ignore::Error::WithLineNumber { err, .. } => innermost(err),
        other => other,
    }
}

fn error_path(err: &ignore::Error) -> Option<PathBuf> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.clone()),
        ignore::Error::Loop { child, .. } => Some(child.clone()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        _ => None,
    }
}
