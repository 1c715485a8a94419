//! Graph store capability and its local implementation.
//!
//! The writer only sees [`GraphStore`]: upsert by uniqueness key, connect
//! two handles, and commit a batch atomically before a deadline.

pub mod engine;
pub mod persistence;
pub mod types;

use std::time::Instant;
use thiserror::Error;

pub use engine::CodeGraph;
pub use persistence::LocalStore;
pub use types::*;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The commit could not start before its deadline.
    #[error("store busy: deadline exceeded")]
    Timeout,

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An edge names a node that neither exists nor is staged earlier in the batch.
    #[error("edge endpoint does not exist: {0}")]
    MissingEndpoint(NodeHandle),

    #[error("refusing self-loop on {0}")]
    SelfLoop(NodeHandle),

    /// The store cannot be used at all (corrupt snapshot, poisoned lock).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialize(String),
}

impl StoreError {
    /// Whether retrying the same batch later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout | StoreError::Io(_))
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialize(err.to_string())
    }
}

/// A property-graph store with keyed upsert and transactional batches.
pub trait GraphStore: Send + Sync {
    /// Apply every operation of `batch` or none of them.
    fn commit(&self, batch: WriteBatch, deadline: Option<Instant>) -> Result<CommitStats, StoreError>;

    /// Clear every node and edge.
    fn reset(&self) -> Result<(), StoreError>;

    /// Make committed state durable.
    fn flush(&self) -> Result<(), StoreError>;

    fn stats(&self) -> Result<GraphStats, StoreError>;

    /// Single-operation upsert outside any larger unit.
    fn upsert_node(&self, kind: NodeKind, key: &str, props: Props) -> Result<NodeHandle, StoreError> {
        let mut batch = WriteBatch::new();
        let handle = batch.upsert_node(kind, key, props);
        self.commit(batch, None)?;
        Ok(handle)
    }

    /// Single-operation connect outside any larger unit.
    fn connect(&self, from: &NodeHandle, to: &NodeHandle, kind: EdgeKind) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.connect(from, to, kind);
        self.commit(batch, None).map(|_| ())
    }
}
