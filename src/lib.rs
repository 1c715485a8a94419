//! # skelgraph
//!
//! Extracts the structural skeleton of a Python codebase (modules, classes,
//! methods, attributes and module imports) into a persistent property graph.
//!
//! ## Pipeline
//!
//! - **Discover**: walk the root for source files ([`discover`])
//! - **Extract**: parse each file into a [`ModuleRecord`] ([`extract`])
//! - **Resolve**: map raw import references onto discovered modules ([`resolve`])
//! - **Write**: upsert nodes and edges through a [`GraphStore`] ([`writer`])
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use skelgraph::{pipeline, CancelToken, LocalStore, RunOptions, SkelConfig};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn demo() -> skelgraph::Result<()> {
//! let root = Path::new(".");
//! let config = SkelConfig::load_for_root(root)?;
//! let store = Arc::new(LocalStore::open(Path::new(".skelgraph/graph.bin"))
//!     .map_err(skelgraph::SkelError::StoreUnavailable)?);
//!
//! let summary = pipeline::run(root, &config, store, CancelToken::new(), RunOptions::default()).await?;
//! println!("{}", summary);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod discover;
pub mod error;
pub mod extract;
pub mod parser;
pub mod pipeline;
pub mod query;
pub mod resolve;
pub mod store;
pub mod summary;
pub mod writer;

// Re-exports for convenience
pub use config::SkelConfig;
pub use error::{Result, SkelError};
pub use extract::{ClassRecord, FileOutcome, ModuleRecord, ParseFailure};
pub use pipeline::{CancelToken, RunOptions};
pub use resolve::{ImportEdge, ModuleIndex, ResolvedImports, UnresolvedImport};
pub use store::{CodeGraph, EdgeKind, GraphStats, GraphStore, LocalStore, NodeHandle, NodeKind};
pub use summary::{RunOutcome, RunSummary};
