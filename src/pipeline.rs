//! Pipeline orchestration: discover → extract → resolve → write.
//!
//! Only fatal configuration problems (missing root, unusable store) come
//! back as `Err`. Everything else ends up in the [`RunSummary`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::SkelConfig;
use crate::discover::Discoverer;
use crate::error::{Result, SkelError};
use crate::extract::{self, FailureReason, FileOutcome};
use crate::parser::with_python_parser;
use crate::resolve::{resolve_all, ModuleIndex};
use crate::store::GraphStore;
use crate::summary::RunSummary;
use crate::writer::{GraphWriter, WriteFailure, WritePhase, WriterConfig};

/// Cooperative cancellation shared by every stage of a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Clear the store before writing.
    pub reset: bool,
}

/// Canonicalize the scan root, rejecting missing paths and plain files.
pub fn check_root(root: &Path) -> Result<PathBuf> {
    let canonical = match root.canonicalize() {
        Ok(path) => path,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SkelError::RootNotFound(root.to_path_buf()))
        }
        Err(e) => return Err(SkelError::Io(e)),
    };
    if !canonical.is_dir() {
        return Err(SkelError::RootNotDirectory(canonical));
    }
    Ok(canonical)
}

/// Run the whole ingestion over `root` into `store`.
pub async fn run(
    root: &Path,
    config: &SkelConfig,
    store: Arc<dyn GraphStore>,
    cancel: CancelToken,
    options: RunOptions,
) -> Result<RunSummary> {
    let started = Instant::now();
    let root = check_root(root)?;
    let mut summary = RunSummary::new(root.clone());

    if options.reset {
        store.reset().map_err(SkelError::StoreUnavailable)?;
    }

    // Discovery
    let discoverer = Discoverer::new(&root, &config.scan);
    let (mut files, warnings) = tokio::task::spawn_blocking(move || discoverer.collect())
        .await
        .map_err(|e| SkelError::Worker(e.to_string()))?;
    files.sort();
    files.dedup();
    for warning in &warnings {
        warn!(kind = ?warning.kind, "{}", warning);
    }
    summary.modules_discovered = files.len();
    summary.discovery_warnings = warnings;
    info!(root = %root.display(), files = files.len(), "discovery complete");

    // Extraction
    let (outcomes, cancelled) = extract_all(
        &root,
        files,
        config.pipeline.workers.max(1),
        config.read_timeout(),
        &cancel,
    )
    .await;
    if cancelled {
        info!("run cancelled during extraction");
        summary.cancelled = true;
        return Ok(finish(summary, started));
    }

    let mut records = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        let (record, failure) = outcome.into_parts();
        match failure {
            Some(failure) => summary.parse_failures.push(failure),
            None => summary.modules_parsed += 1,
        }
        records.push(record);
    }
    info!(
        parsed = summary.modules_parsed,
        failed = summary.parse_failures.len(),
        "extraction complete"
    );

    // Resolution
    let (index, duplicates) = ModuleIndex::build(records);
    for warning in &duplicates {
        warn!("{}", warning);
    }
    summary.discovery_warnings.extend(duplicates);

    let (index, imports) = tokio::task::spawn_blocking(move || {
        let imports = resolve_all(&index);
        (index, imports)
    })
    .await
    .map_err(|e| SkelError::Worker(e.to_string()))?;
    info!(
        modules = index.len(),
        edges = imports.edges.len(),
        unresolved = imports.unresolved.len(),
        "resolution complete"
    );
    summary.unresolved_imports = imports.unresolved.clone();

    if cancel.is_cancelled() {
        summary.cancelled = true;
        return Ok(finish(summary, started));
    }

    // Write
    let writer = GraphWriter::new(store.clone(), WriterConfig::from_config(config), cancel);
    let report = writer.write(&index, &imports).await;
    summary.absorb_writes(report);

    let flushing = store.clone();
    let flushed = tokio::task::spawn_blocking(move || flushing.flush())
        .await
        .map_err(|e| SkelError::Worker(e.to_string()))?;
    if let Err(e) = flushed {
        warn!(error = %e, "failed to persist store");
        summary.write_failures.push(WriteFailure {
            phase: WritePhase::Flush,
            module: String::new(),
            reason: e.to_string(),
            attempts: 1,
        });
    }

    Ok(finish(summary, started))
}

fn finish(mut summary: RunSummary, started: Instant) -> RunSummary {
    summary.duration_ms = started.elapsed().as_millis() as u64;
    info!(
        run_id = %summary.run_id,
        outcome = %summary.outcome(),
        duration_ms = summary.duration_ms,
        "run finished"
    );
    summary
}

/// Extract every file with at most `workers` in flight.
///
/// Returns outcomes ordered by path, and whether the run was cancelled.
async fn extract_all(
    root: &Path,
    files: Vec<PathBuf>,
    workers: usize,
    read_timeout: Duration,
    cancel: &CancelToken,
) -> (Vec<FileOutcome>, bool) {
    let permits = Arc::new(Semaphore::new(workers));
    let mut tasks: JoinSet<FileOutcome> = JoinSet::new();
    let mut cancelled = false;

    for path in files {
        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        let root = root.to_path_buf();
        tasks.spawn(async move {
            let outcome = extract_file(&root, &path, read_timeout).await;
            drop(permit);
            outcome
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => {
                if let Some(failure) = outcome.failure() {
                    warn!(path = %failure.path.display(), reason = %failure.reason, "file skipped");
                }
                outcomes.push(outcome);
            }
            Err(e) => warn!(error = %e, "extraction task failed"),
        }
    }
    outcomes.sort_by(|a, b| a.record().path.cmp(&b.record().path));
    (outcomes, cancelled || cancel.is_cancelled())
}

async fn extract_file(root: &Path, path: &Path, read_timeout: Duration) -> FileOutcome {
    let bytes = match tokio::time::timeout(read_timeout, tokio::fs::read(path)).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            return extract::failed(path, root, FailureReason::Io { message: e.to_string() })
        }
        Err(_) => {
            return extract::failed(
                path,
                root,
                FailureReason::Timeout {
                    after_ms: read_timeout.as_millis() as u64,
                },
            )
        }
    };

    let (task_root, task_path) = (root.to_path_buf(), path.to_path_buf());
    let parsed = tokio::task::spawn_blocking(move || {
        with_python_parser(|parser| extract::extract_bytes(&task_path, &task_root, &bytes, parser))
    })
    .await;

    match parsed {
        Ok(Ok(outcome)) => {
            debug!(path = %path.display(), module = %outcome.record().name, "extracted");
            outcome
        }
        Ok(Err(e)) => extract::failed(path, root, e.into()),
        Err(e) => extract::failed(
            path,
            root,
            FailureReason::Parser {
                message: e.to_string(),
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LocalStore, NodeKind};
    use std::fs;

    #[test]
    fn test_check_root() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_root(dir.path()).is_ok());

        let missing = dir.path().join("nope");
        assert!(matches!(check_root(&missing), Err(SkelError::RootNotFound(_))));

        let file = dir.path().join("f.py");
        fs::write(&file, "").unwrap();
        assert!(matches!(check_root(&file), Err(SkelError::RootNotDirectory(_))));
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_missing_root_aborts_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::in_memory());
        let result = run(
            &dir.path().join("missing"),
            &SkelConfig::default(),
            store.clone(),
            CancelToken::new(),
            RunOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(SkelError::RootNotFound(_))));
        assert_eq!(store.stats().unwrap().total_nodes, 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_is_aborted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "class A:\n    pass\n").unwrap();
        let store = Arc::new(LocalStore::in_memory());
        let cancel = CancelToken::new();
        cancel.cancel();

        let summary = run(dir.path(), &SkelConfig::default(), store.clone(), cancel, RunOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.outcome(), crate::summary::RunOutcome::Aborted);
        assert_eq!(store.stats().unwrap().total_nodes, 0);
    }

    #[tokio::test]
    async fn test_reset_clears_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "class A:\n    pass\n").unwrap();
        let store = Arc::new(LocalStore::in_memory());
        let config = SkelConfig::default();

        run(dir.path(), &config, store.clone(), CancelToken::new(), RunOptions::default())
            .await
            .unwrap();
        fs::remove_file(dir.path().join("a.py")).unwrap();
        fs::write(dir.path().join("b.py"), "x = 1\n").unwrap();

        run(dir.path(), &config, store.clone(), CancelToken::new(), RunOptions { reset: true })
            .await
            .unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.nodes_of(NodeKind::Module), 1);
        assert_eq!(stats.nodes_of(NodeKind::Class), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stalled_read_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let fifo = root.join("stalled.py");
        let made = std::process::Command::new("mkfifo").arg(&fifo).status().unwrap();
        assert!(made.success());

        let outcome = extract_file(&root, &fifo, Duration::from_millis(20)).await;
        // Give the blocked reader its EOF so the blocking pool can drain.
        drop(fs::OpenOptions::new().write(true).open(&fifo).unwrap());

        let failure = outcome.failure().unwrap();
        assert_eq!(failure.reason, FailureReason::Timeout { after_ms: 20 });
        let record = outcome.record();
        assert_eq!(record.name, "stalled");
        assert!(record.imports.is_empty());
        assert!(record.classes.is_empty());

        let store = LocalStore::in_memory();
        store.commit(crate::writer::module_batch(record), None).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.nodes_of(NodeKind::Module), 1);
        assert_eq!(stats.total_edges, 0);
    }

    #[tokio::test]
    async fn test_unreadable_bytes_become_parse_failures() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ok.py"), "import os\n").unwrap();
        fs::write(dir.path().join("latin.py"), [0x63u8, 0x61, 0x66, 0xe9, 0x0a]).unwrap();
        let store = Arc::new(LocalStore::in_memory());

        let summary = run(dir.path(), &SkelConfig::default(), store.clone(), CancelToken::new(), RunOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.modules_discovered, 2);
        assert_eq!(summary.modules_parsed, 1);
        assert_eq!(summary.parse_failures.len(), 1);
        assert!(matches!(summary.parse_failures[0].reason, FailureReason::Decode { .. }));
        assert_eq!(store.stats().unwrap().nodes_of(NodeKind::Module), 2);
    }
}
