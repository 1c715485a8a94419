//! Graph writer: persists extracted records and resolved imports.
//!
//! Three phases separated by barriers:
//! 1. one unit per module: the Module node;
//! 2. one unit per module: its whole subtree with containment edges;
//! 3. one unit per source module: its Import edges.
//!
//! Units run concurrently within a phase. A unit that fails on a transient
//! store error is retried with exponential backoff; a unit that still fails
//! is recorded and the remaining units carry on.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::SkelConfig;
use crate::extract::ModuleRecord;
use crate::pipeline::CancelToken;
use crate::resolve::{ModuleIndex, ResolvedImports};
use crate::store::{props, CommitStats, EdgeKind, GraphStore, NodeHandle, NodeKind, WriteBatch};

/// Concurrency, deadline and retry settings for write units.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub workers: usize,
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl WriterConfig {
    pub fn from_config(config: &SkelConfig) -> Self {
        Self {
            workers: config.pipeline.workers.max(1),
            timeout: config.write_timeout(),
            max_retries: config.write.max_retries,
            backoff: config.retry_backoff(),
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(1u32 << attempt.min(16))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePhase {
    Modules,
    Subtrees,
    Imports,
    /// Persisting the store after the last phase.
    Flush,
}

impl std::fmt::Display for WritePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WritePhase::Modules => write!(f, "modules"),
            WritePhase::Subtrees => write!(f, "subtrees"),
            WritePhase::Imports => write!(f, "imports"),
            WritePhase::Flush => write!(f, "flush"),
        }
    }
}

/// A unit the store rejected for good.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFailure {
    pub phase: WritePhase,
    pub module: String,
    pub reason: String,
    pub attempts: u32,
}

/// Totals of one write pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub store: CommitStats,
    pub modules_written: usize,
    pub classes_written: usize,
    pub methods_written: usize,
    pub attributes_written: usize,
    pub import_edges: usize,
    pub retries: usize,
    pub failures: Vec<WriteFailure>,
    pub cancelled: bool,
}

/// What a successful unit contributes to the report.
#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    classes: usize,
    methods: usize,
    attributes: usize,
    imports: usize,
}

struct Unit {
    module: String,
    batch: WriteBatch,
    tally: Tally,
    /// Upserts in `batch` repeating a node an earlier phase already wrote.
    restated: usize,
}

struct UnitOutcome {
    module: String,
    tally: Tally,
    restated: usize,
    attempts: u32,
    result: Result<CommitStats, String>,
}

#[derive(Default)]
struct PhaseOutcome {
    succeeded: HashSet<String>,
    cancelled: bool,
}

/// The Module node alone.
pub fn module_batch(record: &ModuleRecord) -> WriteBatch {
    let mut batch = WriteBatch::new();
    upsert_module(&mut batch, record);
    batch
}

/// A module plus every class, method and attribute under it.
pub fn subtree_batch(record: &ModuleRecord) -> WriteBatch {
    let mut batch = WriteBatch::new();
    let module = upsert_module(&mut batch, record);

    for class in &record.classes {
        let class_node = batch.upsert_node(
            NodeKind::Class,
            class.full_name.as_str(),
            props([("name", class.name.as_str()), ("full_name", class.full_name.as_str())]),
        );
        batch.connect(&module, &class_node, EdgeKind::ContainsClass);

        for method in &class.methods {
            let mut method_props = props([
                ("name", method.name.as_str()),
                ("full_name", method.full_name.as_str()),
                ("args", method.params.join(", ").as_str()),
            ]);
            method_props.insert("params".to_string(), method.params.clone().into());
            if method.is_async {
                method_props.insert("async".to_string(), "true".into());
            }
            let method_node = batch.upsert_node(NodeKind::Method, method.full_name.as_str(), method_props);
            batch.connect(&class_node, &method_node, EdgeKind::HasMethod);
        }

        for attribute in &class.attributes {
            let attribute_node = batch.upsert_node(
                NodeKind::Attribute,
                attribute.full_name.as_str(),
                props([
                    ("name", attribute.name.as_str()),
                    ("full_name", attribute.full_name.as_str()),
                ]),
            );
            batch.connect(&class_node, &attribute_node, EdgeKind::HasAttribute);
        }
    }
    batch
}

fn upsert_module(batch: &mut WriteBatch, record: &ModuleRecord) -> NodeHandle {
    let path = record.path.to_string_lossy();
    batch.upsert_node(
        NodeKind::Module,
        path.as_ref(),
        props([("name", record.name.as_str()), ("path", path.as_ref())]),
    )
}

fn subtree_tally(record: &ModuleRecord) -> Tally {
    let classes: BTreeSet<&str> = record.classes.iter().map(|c| c.full_name.as_str()).collect();
    let methods: BTreeSet<&str> = record
        .classes
        .iter()
        .flat_map(|c| c.methods.iter().map(|m| m.full_name.as_str()))
        .collect();
    let attributes: BTreeSet<&str> = record
        .classes
        .iter()
        .flat_map(|c| c.attributes.iter().map(|a| a.full_name.as_str()))
        .collect();
    Tally {
        classes: classes.len(),
        methods: methods.len(),
        attributes: attributes.len(),
        imports: 0,
    }
}

/// Writes one run's records through a [`GraphStore`].
pub struct GraphWriter {
    store: Arc<dyn GraphStore>,
    config: WriterConfig,
    cancel: CancelToken,
}

impl GraphWriter {
    pub fn new(store: Arc<dyn GraphStore>, config: WriterConfig, cancel: CancelToken) -> Self {
        Self {
            store,
            config,
            cancel,
        }
    }

    /// Run all three phases.
    pub async fn write(&self, index: &ModuleIndex, imports: &ResolvedImports) -> WriteReport {
        let mut report = WriteReport::default();

        let units: Vec<Unit> = index
            .records()
            .map(|record| Unit {
                module: record.name.clone(),
                batch: module_batch(record),
                tally: Tally::default(),
                restated: 0,
            })
            .collect();
        info!(units = units.len(), "writing module nodes");
        let modules = self.run_phase(WritePhase::Modules, units, &mut report).await;
        report.modules_written = modules.succeeded.len();
        if modules.cancelled {
            report.cancelled = true;
            return finish(report);
        }

        let units: Vec<Unit> = index
            .records()
            .map(|record| Unit {
                module: record.name.clone(),
                batch: subtree_batch(record),
                tally: subtree_tally(record),
                restated: usize::from(modules.succeeded.contains(&record.name)),
            })
            .collect();
        info!(units = units.len(), "writing module subtrees");
        let subtrees = self.run_phase(WritePhase::Subtrees, units, &mut report).await;
        if subtrees.cancelled {
            report.cancelled = true;
            return finish(report);
        }

        // A module node exists if either of the first two phases wrote it.
        let existing: HashSet<&str> = modules
            .succeeded
            .iter()
            .chain(subtrees.succeeded.iter())
            .map(String::as_str)
            .collect();

        let mut units = Vec::new();
        for (source, targets) in imports.by_source() {
            if !existing.contains(source) {
                continue;
            }
            let Some(source_path) = index.path_of(source) else {
                continue;
            };
            let from = NodeHandle::module(source_path);
            let mut batch = WriteBatch::new();
            for target in targets {
                if !existing.contains(target) {
                    debug!(source, target, "import target missing from store, skipped");
                    continue;
                }
                if let Some(target_path) = index.path_of(target) {
                    batch.connect(&from, &NodeHandle::module(target_path), EdgeKind::Imports);
                }
            }
            if batch.is_empty() {
                continue;
            }
            let tally = Tally {
                imports: batch.len(),
                ..Tally::default()
            };
            units.push(Unit {
                module: source.to_string(),
                batch,
                tally,
                restated: 0,
            });
        }
        info!(units = units.len(), "writing import edges");
        let edges = self.run_phase(WritePhase::Imports, units, &mut report).await;
        report.cancelled = edges.cancelled;

        finish(report)
    }

    async fn run_phase(&self, phase: WritePhase, units: Vec<Unit>, report: &mut WriteReport) -> PhaseOutcome {
        let mut outcome = PhaseOutcome::default();
        let permits = Arc::new(Semaphore::new(self.config.workers));
        let mut tasks: JoinSet<UnitOutcome> = JoinSet::new();

        for unit in units {
            let permit = match permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            // Checked once a slot frees up, so nothing starts after a cancel.
            if self.cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            let store = self.store.clone();
            let config = self.config.clone();
            let cancel = self.cancel.clone();
            tasks.spawn(async move {
                let outcome = commit_with_retry(store, unit, &config, &cancel).await;
                drop(permit);
                outcome
            });
        }

        // Barrier: every started unit finishes before the phase returns.
        while let Some(joined) = tasks.join_next().await {
            let unit = match joined {
                Ok(unit) => unit,
                Err(e) => {
                    warn!(%phase, error = %e, "write task failed");
                    continue;
                }
            };
            report.retries += unit.attempts.saturating_sub(1) as usize;
            match unit.result {
                Ok(mut stats) => {
                    stats.nodes_updated = stats.nodes_updated.saturating_sub(unit.restated);
                    report.store += stats;
                    report.classes_written += unit.tally.classes;
                    report.methods_written += unit.tally.methods;
                    report.attributes_written += unit.tally.attributes;
                    report.import_edges += unit.tally.imports;
                    outcome.succeeded.insert(unit.module);
                }
                Err(reason) => {
                    warn!(%phase, module = %unit.module, attempts = unit.attempts, %reason, "write unit failed");
                    report.failures.push(WriteFailure {
                        phase,
                        module: unit.module,
                        reason,
                        attempts: unit.attempts,
                    });
                }
            }
        }

        outcome
    }
}

async fn commit_with_retry(
    store: Arc<dyn GraphStore>,
    unit: Unit,
    config: &WriterConfig,
    cancel: &CancelToken,
) -> UnitOutcome {
    let mut attempts = 0u32;
    let result = loop {
        attempts += 1;
        let deadline = Instant::now() + config.timeout;
        let batch = unit.batch.clone();
        let target = store.clone();
        let committed = tokio::task::spawn_blocking(move || target.commit(batch, Some(deadline))).await;

        match committed {
            Ok(Ok(stats)) => break Ok(stats),
            Ok(Err(e)) if e.is_transient() && attempts <= config.max_retries && !cancel.is_cancelled() => {
                let delay = config.backoff_for(attempts - 1);
                debug!(module = %unit.module, attempt = attempts, error = %e, ?delay, "retrying write unit");
                tokio::time::sleep(delay).await;
            }
            Ok(Err(e)) => break Err(e.to_string()),
            Err(e) => break Err(format!("write task panicked: {}", e)),
        }
    };

    UnitOutcome {
        module: unit.module,
        tally: unit.tally,
        restated: unit.restated,
        attempts,
        result,
    }
}

fn finish(mut report: WriteReport) -> WriteReport {
    report.failures.sort_by(|a, b| (a.phase, &a.module).cmp(&(b.phase, &b.module)));
    info!(
        nodes_created = report.store.nodes_created,
        nodes_updated = report.store.nodes_updated,
        edges_created = report.store.edges_created,
        failures = report.failures.len(),
        cancelled = report.cancelled,
        "write complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{AttributeRecord, ClassRecord, MethodRecord};
    use crate::resolve::resolve_all;
    use crate::store::{GraphStats, LocalStore, StoreError, WriteOp};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> WriterConfig {
        WriterConfig {
            workers: 4,
            timeout: Duration::from_secs(5),
            max_retries: 3,
            backoff: Duration::from_millis(1),
        }
    }

    fn record(name: &str, imports: &[&str]) -> ModuleRecord {
        let full = format!("{}.Foo", name);
        ModuleRecord {
            path: PathBuf::from(format!("/proj/{}.py", name)),
            name: name.to_string(),
            imports: imports.iter().map(|s| s.to_string()).collect(),
            classes: vec![ClassRecord {
                name: "Foo".to_string(),
                full_name: full.clone(),
                methods: vec![MethodRecord {
                    name: "bar".to_string(),
                    full_name: format!("{}.bar", full),
                    params: vec!["x".to_string(), "y".to_string()],
                    is_async: false,
                }],
                attributes: vec![AttributeRecord {
                    name: "z".to_string(),
                    full_name: format!("{}.z", full),
                }],
            }],
        }
    }

    fn inputs(records: Vec<ModuleRecord>) -> (ModuleIndex, ResolvedImports) {
        let (index, _) = ModuleIndex::build(records);
        let imports = resolve_all(&index);
        (index, imports)
    }

    /// Fails the first `transient` commits with a timeout, and every commit
    /// touching `poisoned` permanently.
    struct FlakyStore {
        inner: LocalStore,
        transient: AtomicUsize,
        poisoned: Option<String>,
        commits: AtomicUsize,
    }

    impl FlakyStore {
        fn new(transient: usize, poisoned: Option<&str>) -> Self {
            Self {
                inner: LocalStore::in_memory(),
                transient: AtomicUsize::new(transient),
                poisoned: poisoned.map(str::to_string),
                commits: AtomicUsize::new(0),
            }
        }
    }

    impl GraphStore for FlakyStore {
        fn commit(&self, batch: WriteBatch, deadline: Option<Instant>) -> Result<CommitStats, StoreError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            let remaining = self.transient.load(Ordering::SeqCst);
            if remaining > 0 {
                self.transient.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Timeout);
            }
            if let Some(poisoned) = &self.poisoned {
                let touches = batch.ops().iter().any(|op| match op {
                    WriteOp::Upsert { handle, .. } => handle.key.contains(poisoned.as_str()),
                    WriteOp::Connect { from, .. } => from.key.contains(poisoned.as_str()),
                });
                if touches {
                    return Err(StoreError::Unavailable("constraint violated".to_string()));
                }
            }
            self.inner.commit(batch, deadline)
        }

        fn reset(&self) -> Result<(), StoreError> {
            self.inner.reset()
        }

        fn flush(&self) -> Result<(), StoreError> {
            Ok(())
        }

        fn stats(&self) -> Result<GraphStats, StoreError> {
            self.inner.stats()
        }
    }

    #[test]
    fn test_subtree_batch_shape() {
        let batch = subtree_batch(&record("a", &[]));
        // module, class, method, attribute upserts + three containment edges
        assert_eq!(batch.len(), 7);

        let store = LocalStore::in_memory();
        store.commit(batch, None).unwrap();
        let graph = store.read().unwrap();
        let method = graph.find(&NodeHandle::method("a.Foo.bar")).unwrap();
        assert_eq!(method.prop_str("args"), Some("x, y"));
        assert_eq!(method.prop_list("params").unwrap(), ["x", "y"]);
    }

    #[tokio::test]
    async fn test_write_all_phases() {
        let (index, imports) = inputs(vec![record("a", &[]), record("b", &["a", "numpy"])]);
        let store = Arc::new(LocalStore::in_memory());
        let writer = GraphWriter::new(store.clone(), config(), CancelToken::new());

        let report = writer.write(&index, &imports).await;
        assert!(report.failures.is_empty());
        assert!(!report.cancelled);
        assert_eq!(report.modules_written, 2);
        assert_eq!(report.classes_written, 2);
        assert_eq!(report.methods_written, 2);
        assert_eq!(report.attributes_written, 2);
        assert_eq!(report.import_edges, 1);

        let stats = store.stats().unwrap();
        assert_eq!(stats.nodes_of(NodeKind::Module), 2);
        assert_eq!(stats.edges_of(EdgeKind::Imports), 1);
    }

    #[tokio::test]
    async fn test_second_write_creates_nothing() {
        let (index, imports) = inputs(vec![record("a", &[]), record("b", &["a"])]);
        let store = Arc::new(LocalStore::in_memory());
        let writer = GraphWriter::new(store.clone(), config(), CancelToken::new());

        let first = writer.write(&index, &imports).await;
        let before = store.stats().unwrap();
        let second = writer.write(&index, &imports).await;

        assert!(first.store.nodes_created > 0);
        assert_eq!(first.store.nodes_updated, 0);
        assert_eq!(second.store.nodes_created, 0);
        // Each node counted once even though modules are upserted twice.
        assert_eq!(second.store.nodes_updated, before.total_nodes);
        assert_eq!(second.store.edges_created, 0);
        assert_eq!(store.stats().unwrap(), before);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let (index, imports) = inputs(vec![record("a", &[])]);
        let store = Arc::new(FlakyStore::new(2, None));
        let writer = GraphWriter::new(store.clone(), config(), CancelToken::new());

        let report = writer.write(&index, &imports).await;
        assert!(report.failures.is_empty());
        assert_eq!(report.retries, 2);
        assert_eq!(store.stats().unwrap().nodes_of(NodeKind::Class), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let (index, imports) = inputs(vec![record("a", &[])]);
        let store = Arc::new(FlakyStore::new(usize::MAX, None));
        let cfg = WriterConfig {
            max_retries: 2,
            ..config()
        };
        let writer = GraphWriter::new(store.clone(), cfg, CancelToken::new());

        let report = writer.write(&index, &imports).await;
        // Both module-level phases give up after 1 + 2 attempts.
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().all(|f| f.attempts == 3));
        assert_eq!(store.commits.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_isolated() {
        let (index, imports) = inputs(vec![
            record("good", &["bad"]),
            record("bad", &[]),
            record("other", &["good"]),
        ]);
        let store = Arc::new(FlakyStore::new(0, Some("bad")));
        let writer = GraphWriter::new(store.clone(), config(), CancelToken::new());

        let report = writer.write(&index, &imports).await;
        let failed: Vec<(WritePhase, &str)> = report
            .failures
            .iter()
            .map(|f| (f.phase, f.module.as_str()))
            .collect();
        assert_eq!(
            failed,
            vec![(WritePhase::Modules, "bad"), (WritePhase::Subtrees, "bad")]
        );
        assert!(report.failures.iter().all(|f| f.attempts == 1));

        let stats = store.stats().unwrap();
        assert_eq!(stats.nodes_of(NodeKind::Module), 2);
        assert_eq!(stats.nodes_of(NodeKind::Class), 2);
        // other -> good survives; good -> bad has no target node.
        assert_eq!(stats.edges_of(EdgeKind::Imports), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_writes_nothing() {
        let (index, imports) = inputs(vec![record("a", &[]), record("b", &["a"])]);
        let store = Arc::new(LocalStore::in_memory());
        let cancel = CancelToken::new();
        cancel.cancel();
        let writer = GraphWriter::new(store.clone(), config(), cancel);

        let report = writer.write(&index, &imports).await;
        assert!(report.cancelled);
        assert_eq!(report.modules_written, 0);
        assert_eq!(store.stats().unwrap().total_nodes, 0);
    }

    /// Sets `cancel` once `after` commits have gone through.
    struct CancellingStore {
        inner: LocalStore,
        cancel: CancelToken,
        after: usize,
        commits: AtomicUsize,
    }

    impl GraphStore for CancellingStore {
        fn commit(&self, batch: WriteBatch, deadline: Option<Instant>) -> Result<CommitStats, StoreError> {
            let stats = self.inner.commit(batch, deadline)?;
            if self.commits.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
                self.cancel.cancel();
            }
            Ok(stats)
        }

        fn reset(&self) -> Result<(), StoreError> {
            self.inner.reset()
        }

        fn flush(&self) -> Result<(), StoreError> {
            Ok(())
        }

        fn stats(&self) -> Result<GraphStats, StoreError> {
            self.inner.stats()
        }
    }

    #[tokio::test]
    async fn test_cancel_between_subtrees_stops_phase() {
        let (index, imports) = inputs(vec![record("a", &[]), record("b", &[]), record("c", &["a"])]);
        let cancel = CancelToken::new();
        // Three module units, then the first subtree.
        let store = Arc::new(CancellingStore {
            inner: LocalStore::in_memory(),
            cancel: cancel.clone(),
            after: 4,
            commits: AtomicUsize::new(0),
        });
        let cfg = WriterConfig {
            workers: 1,
            ..config()
        };
        let writer = GraphWriter::new(store.clone(), cfg, cancel);

        let report = writer.write(&index, &imports).await;
        assert!(report.cancelled);
        assert_eq!(report.modules_written, 3);
        assert_eq!(report.classes_written, 1);
        assert_eq!(report.import_edges, 0);
        assert_eq!(store.commits.load(Ordering::SeqCst), 4);

        let stats = store.stats().unwrap();
        assert_eq!(stats.nodes_of(NodeKind::Module), 3);
        assert_eq!(stats.nodes_of(NodeKind::Class), 1);
        assert_eq!(stats.edges_of(EdgeKind::Imports), 0);
        let graph = store.inner.read().unwrap();
        assert!(graph.find(&NodeHandle::class("a.Foo")).is_some());
        assert!(graph.find(&NodeHandle::class("b.Foo")).is_none());
    }

    #[test]
    fn test_backoff_doubles() {
        let cfg = WriterConfig {
            backoff: Duration::from_millis(50),
            ..config()
        };
        assert_eq!(cfg.backoff_for(0), Duration::from_millis(50));
        assert_eq!(cfg.backoff_for(1), Duration::from_millis(100));
        assert_eq!(cfg.backoff_for(3), Duration::from_millis(400));
    }
}
