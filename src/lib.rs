//! # soulgraph — Embeddable Soul/Binding Graph Database
//!
//! An in-process graph store: schemaless nodes ("souls") connected by
//! directional, optionally-keyed mirrored edges ("bindings"), reached
//! through human-readable aliases and a deferred, chainable query builder.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: [`StoragePort`] is the contract between the query
//!    engine and any backend
//! 2. **Validated identifiers**: a [`SoulId`] only exists if it parsed or
//!    was allocated by the generator
//! 3. **Queries are plans**: builder calls accumulate steps; storage is
//!    only touched on `resolve`
//! 4. **Mirrored edges**: every binding half is created and removed
//!    together with its opposite-direction half
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use soulgraph::{DataMap, Direction, SoulGraph, Value};
//!
//! # async fn example() -> soulgraph::Result<()> {
//! let db = SoulGraph::in_memory();
//!
//! db.run(|tx| async move {
//!     let supervisor = tx.query("employee-1", true);
//!     let employee = tx.query("employee-2", true).put(DataMap::from([(
//!         "name".to_string(),
//!         Value::from("John Smith"),
//!     )]));
//!
//!     // keyed edge: employee-2 --NORTH--> employee-1, named "supervisor"
//!     employee.bind_keyed(&supervisor, Direction::North, "supervisor");
//!     employee.resolve().await?;
//!     Ok(())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage Backends
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | [`MemoryStore`] | `storage::memory` | In-memory graph for testing/embedding |
//! | [`JsonStore`] | `storage::json` | JSON file, persisted on commit |

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

// ============================================================================
// Modules
// ============================================================================

pub mod ident;
pub mod model;
pub mod query;
pub mod storage;
pub mod tx;

// ============================================================================
// Re-exports: Model
// ============================================================================

pub use model::{DataMap, Direction, MetaMap, SoulId, Value};

// ============================================================================
// Re-exports: Storage
// ============================================================================

pub use storage::{
    BindSpec, BindingScope, JsonStore, MemoryStore, StoragePort, UnbindSpec,
};

// ============================================================================
// Re-exports: Queries and transactions
// ============================================================================

pub use ident::generate_soul_id;
pub use query::{BindTargets, Navigate, Query};
pub use tx::Transaction;

// ============================================================================
// Top-level SoulGraph handle
// ============================================================================

/// The primary entry point. A `SoulGraph` wraps a storage factory and hands
/// out transactions, each over a fresh store instance.
pub struct SoulGraph {
    factory: Box<dyn Fn() -> Arc<dyn StoragePort> + Send + Sync>,
}

impl SoulGraph {
    /// Build over a custom storage factory.
    pub fn with_factory<F>(factory: F) -> SoulGraph
    where
        F: Fn() -> Arc<dyn StoragePort> + Send + Sync + 'static,
    {
        SoulGraph { factory: Box::new(factory) }
    }

    /// In-memory graph for testing and embedding. Nothing survives commit.
    pub fn in_memory() -> SoulGraph {
        SoulGraph::with_factory(|| Arc::new(MemoryStore::new()))
    }

    /// JSON-file-backed graph. Each transaction loads the file on first
    /// use and writes it back on commit.
    pub fn json_file(path: impl Into<PathBuf>) -> SoulGraph {
        let path = path.into();
        SoulGraph::with_factory(move || Arc::new(JsonStore::new(path.clone())))
    }

    /// Open an explicit transaction. The caller owns commit/rollback.
    pub fn transaction(&self) -> Transaction {
        Transaction::new((self.factory)())
    }

    /// Run `work` inside a transaction: commit on `Ok`, roll back on `Err`.
    pub async fn run<F, Fut, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let tx = self.transaction();
        match work(tx.clone()).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback failed after aborted work");
                }
                Err(err)
            }
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("soul id allocation exhausted its entropy budget")]
    EntropyExhausted,

    #[error("invalid soul id: {0:?}")]
    InvalidSoulId(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("circular query dependency involving {qid}")]
    CircularDependency { qid: String },

    #[error("transaction already closed")]
    TransactionClosed,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("persistence failure at {}: {message}", path.display())]
    Persist { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
