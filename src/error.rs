//! Error types for skelgraph.
//!
//! Only fatal conditions surface as `Err`. Everything that lets a run
//! continue (unreadable entries, parse failures, unresolved imports,
//! failed write units) is collected into the run summary instead.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::store::StoreError;

/// Fatal errors that abort a run before any write happens.
#[derive(Debug, Error)]
pub enum SkelError {
    /// The scan root does not exist.
    #[error("root path does not exist: {0}")]
    RootNotFound(PathBuf),

    /// The scan root exists but is not a directory.
    #[error("root path is not a directory: {0}")]
    RootNotDirectory(PathBuf),

    /// The graph store could not be opened or reset.
    #[error("graph store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// The configuration file exists but could not be used.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The async runtime failed underneath the pipeline.
    #[error("worker task failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias used across the crate.
pub type Result<T> = std::result::Result<T, SkelError>;
