//! # Storage Port
//!
//! This is THE contract between the query engine and any storage backend.
//! Every capability the graph needs is defined here.
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryStore` | `memory` | In-memory reference implementation |
//! | `JsonStore` | `json` | JSON-file-backed, persists on commit |
//!
//! Any conforming backend must preserve the two graph consistency
//! invariants even if its physical encoding differs: every binding half is
//! mirrored by its opposite-direction half, and deleting a soul cascades to
//! its data, metadata, aliases, and bindings on both sides.

pub mod graph;
pub mod json;
pub mod memory;

use async_trait::async_trait;

use crate::model::{DataMap, Direction, MetaMap, SoulId, Value};
use crate::Result;

pub use json::JsonStore;
pub use memory::MemoryStore;

// ============================================================================
// Binding specifications
// ============================================================================

/// How to create a binding: the direction of the origin half, plus an
/// optional key making the edge addressable by name from the origin soul.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindSpec {
    pub direction: Direction,
    pub key: Option<String>,
}

impl BindSpec {
    pub fn direction(direction: Direction) -> BindSpec {
        BindSpec { direction, key: None }
    }

    pub fn keyed(direction: Direction, key: impl Into<String>) -> BindSpec {
        BindSpec { direction, key: Some(key.into()) }
    }
}

/// Keyless South binding — the conventional "down to a child" edge.
impl Default for BindSpec {
    fn default() -> BindSpec {
        BindSpec::direction(Direction::South)
    }
}

impl From<Direction> for BindSpec {
    fn from(direction: Direction) -> BindSpec {
        BindSpec::direction(direction)
    }
}

/// Which binding to remove: an explicit target in a direction, or a keyed
/// binding resolved through the origin soul's key index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnbindSpec {
    Soul { target: SoulId, direction: Direction },
    Key(String),
}

/// Scope of a [`StoragePort::clear_soul_bindings`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingScope {
    Direction(Direction),
    All,
}

impl From<Direction> for BindingScope {
    fn from(direction: Direction) -> BindingScope {
        BindingScope::Direction(direction)
    }
}

impl BindingScope {
    pub(crate) fn directions(self) -> &'static [Direction] {
        match self {
            BindingScope::All => &Direction::ALL,
            BindingScope::Direction(d) => match d {
                Direction::North => &[Direction::North],
                Direction::South => &[Direction::South],
                Direction::East => &[Direction::East],
                Direction::West => &[Direction::West],
            },
        }
    }
}

// ============================================================================
// StoragePort trait
// ============================================================================

/// The universal storage contract.
///
/// The trait deliberately has no defaulted method stubs: the JS ancestor of
/// this engine signalled an incomplete backend by failing at call time, but
/// in Rust an incomplete implementation simply does not compile.
///
/// Graph-mutating calls on a soul that does not exist yet must implicitly
/// create ("touch") it first — queries commonly chain creation and binding
/// in one traversal.
#[async_trait]
pub trait StoragePort: Send + Sync {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// One-time setup (load persisted state, allocate caches). Called lazily
    /// by the owning transaction, exactly once before any other method.
    async fn initialize(&self) -> Result<()>;

    /// Release the store. `persist` is true on commit, false on rollback.
    async fn close(&self, persist: bool) -> Result<()>;

    // ========================================================================
    // Aliases
    // ========================================================================

    async fn alias_exists(&self, alias: &str) -> Result<bool>;

    /// Point `alias` at `soul`. Reassigning an existing alias removes it
    /// from the previous soul's alias set.
    async fn set_alias(&self, alias: &str, soul: &SoulId) -> Result<()>;

    async fn resolve_alias(&self, alias: &str) -> Result<Option<SoulId>>;

    async fn remove_alias(&self, alias: &str) -> Result<()>;

    /// All aliases currently pointing at `soul`.
    async fn soul_aliases(&self, soul: &SoulId) -> Result<Vec<String>>;

    /// Drop every alias of `soul` from the global catalog.
    async fn clear_aliases(&self, soul: &SoulId) -> Result<()>;

    // ========================================================================
    // Soul lifecycle
    // ========================================================================

    async fn soul_exists(&self, soul: &SoulId) -> Result<bool>;

    /// Idempotent touch: creates the soul record with `cdate`/`mdate`
    /// timestamps if it does not exist yet.
    async fn create_soul(&self, soul: &SoulId) -> Result<()>;

    /// Cascading removal: data, bindings (both halves), aliases, record.
    /// Deleting a missing soul is a no-op.
    async fn delete_soul(&self, soul: &SoulId) -> Result<()>;

    // ========================================================================
    // Metadata
    // ========================================================================

    async fn soul_metadata(&self, soul: &SoulId) -> Result<MetaMap>;

    async fn soul_metadata_value(&self, soul: &SoulId, key: &str) -> Result<Option<Value>>;

    /// Merge `patch` into the metadata of every listed soul, touching
    /// missing souls and refreshing their `mdate`.
    async fn set_soul_metadata(&self, souls: &[SoulId], patch: &MetaMap) -> Result<()>;

    // ========================================================================
    // Data payload
    // ========================================================================

    async fn soul_has_data(&self, soul: &SoulId) -> Result<bool>;

    async fn soul_data(&self, soul: &SoulId) -> Result<DataMap>;

    /// Attach payload data. `merge` shallow-merges into the existing
    /// payload; otherwise the payload is replaced wholesale.
    async fn set_soul_data(&self, soul: &SoulId, data: &DataMap, merge: bool) -> Result<()>;

    async fn clear_soul_data(&self, soul: &SoulId) -> Result<()>;

    // ========================================================================
    // Graph
    // ========================================================================

    /// Create both halves of a binding from `a` to `b`. A keyed spec also
    /// updates `a`'s key indices, replacing any stale entry for the key.
    async fn bind_souls(&self, a: &SoulId, b: &SoulId, spec: &BindSpec) -> Result<()>;

    /// Remove both halves of a binding plus any stale key-index entries.
    async fn unbind_souls(&self, a: &SoulId, spec: &UnbindSpec) -> Result<()>;

    /// All souls bound from `a` in `direction`.
    async fn bound_souls(&self, a: &SoulId, direction: Direction) -> Result<Vec<SoulId>>;

    /// The soul bound from `a` under `key`, if any.
    async fn bound_soul(&self, a: &SoulId, key: &str) -> Result<Option<SoulId>>;

    /// The keys of all keyed bindings originating at `a`.
    async fn bound_keys(&self, a: &SoulId) -> Result<Vec<String>>;

    /// Every keyed binding originating at `a` as `(key, target, direction)`.
    async fn bound_key_souls(&self, a: &SoulId) -> Result<Vec<(String, SoulId, Direction)>>;

    /// Remove every binding of `a` within `scope`, cleaning the mirrored
    /// halves on the neighbors.
    async fn clear_soul_bindings(&self, a: &SoulId, scope: BindingScope) -> Result<()>;
}
