//! `LocalStore`: a [`CodeGraph`] behind a lock, snapshotted to disk.
//!
//! Snapshots are bincode-encoded and replaced atomically (temp file, then
//! rename), so a reader sees either the previous snapshot or the new one.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::engine::CodeGraph;
use super::types::*;
use super::{GraphStore, StoreError};

const FORMAT_VERSION: u32 = 1;
const LOCK_POLL: Duration = Duration::from_millis(1);

#[derive(Serialize, Deserialize)]
struct Snapshot {
    format_version: u32,
    nodes: Vec<NodeData>,
    edges: Vec<(u32, u32, EdgeKind)>,
}

/// Local graph store with optional on-disk snapshot.
pub struct LocalStore {
    path: Option<PathBuf>,
    graph: RwLock<CodeGraph>,
}

impl LocalStore {
    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            graph: RwLock::new(CodeGraph::new()),
        }
    }

    /// Open the snapshot at `path`; a missing file is an empty store.
    ///
    /// An unreadable, corrupt or incompatible snapshot is
    /// [`StoreError::Unavailable`].
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let graph = match std::fs::read(path) {
            Ok(bytes) => decode_snapshot(&bytes)
                .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no snapshot, starting empty");
                CodeGraph::new()
            }
            Err(e) => {
                return Err(StoreError::Unavailable(format!(
                    "{}: {}",
                    path.display(),
                    e
                )))
            }
        };
        info!(
            path = %path.display(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "store opened"
        );
        Ok(Self {
            path: Some(path.to_path_buf()),
            graph: RwLock::new(graph),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Shared read access for queries.
    pub fn read(&self) -> Result<RwLockReadGuard<'_, CodeGraph>, StoreError> {
        self.graph
            .read()
            .map_err(|_| StoreError::Unavailable("graph lock poisoned".to_string()))
    }

    /// Acquire the write lock, giving up at `deadline`.
    fn write_until(
        &self,
        deadline: Option<Instant>,
    ) -> Result<RwLockWriteGuard<'_, CodeGraph>, StoreError> {
        let Some(deadline) = deadline else {
            return self
                .graph
                .write()
                .map_err(|_| StoreError::Unavailable("graph lock poisoned".to_string()));
        };
        loop {
            match self.graph.try_write() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(_)) => {
                    return Err(StoreError::Unavailable("graph lock poisoned".to_string()))
                }
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(StoreError::Timeout);
                    }
                    std::thread::sleep(LOCK_POLL);
                }
            }
        }
    }
}

impl GraphStore for LocalStore {
    fn commit(&self, batch: WriteBatch, deadline: Option<Instant>) -> Result<CommitStats, StoreError> {
        let mut graph = self.write_until(deadline)?;
        graph.apply(batch)
    }

    fn reset(&self) -> Result<(), StoreError> {
        let mut graph = self.write_until(None)?;
        graph.clear();
        if let Some(path) = &self.path {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
        info!("store reset");
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = {
            let graph = self.read()?;
            encode_snapshot(&graph)?
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("bin.tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), bytes = bytes.len(), "snapshot written");
        Ok(())
    }

    fn stats(&self) -> Result<GraphStats, StoreError> {
        Ok(self.read()?.stats())
    }
}

fn encode_snapshot(graph: &CodeGraph) -> Result<Vec<u8>, StoreError> {
    let (nodes, edges) = graph.to_parts();
    let snapshot = Snapshot {
        format_version: FORMAT_VERSION,
        nodes,
        edges,
    };
    Ok(bincode::serialize(&snapshot)?)
}

fn decode_snapshot(bytes: &[u8]) -> Result<CodeGraph, StoreError> {
    let snapshot: Snapshot = bincode::deserialize(bytes)?;
    if snapshot.format_version != FORMAT_VERSION {
        return Err(StoreError::Unavailable(format!(
            "snapshot format {} (expected {})",
            snapshot.format_version, FORMAT_VERSION
        )));
    }
    CodeGraph::from_parts(snapshot.nodes, snapshot.edges)
}
