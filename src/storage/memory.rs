//! In-memory storage backend.
//!
//! This is the reference implementation of `StoragePort`: a [`GraphState`]
//! behind a `parking_lot::RwLock`. Every method is an async suspension point
//! to keep the port interface uniform across backends, but no real I/O
//! happens here.
//!
//! ## Limitations
//!
//! - **Nothing survives close**: `close()` discards the graph whether or not
//!   `persist` is requested. Use `JsonStore` for durability.
//! - **Single-transaction ownership**: the lock serializes individual calls,
//!   but multi-call sequences are not atomic. Concurrently-resolving queries
//!   touching overlapping souls are last-write-wins by design.

use parking_lot::RwLock;
use async_trait::async_trait;

use crate::model::{DataMap, Direction, MetaMap, SoulId, Value};
use crate::Result;
use super::graph::GraphState;
use super::{BindSpec, BindingScope, StoragePort, UnbindSpec};

/// In-memory soul graph storage.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<GraphState>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub(crate) fn state(&self) -> &RwLock<GraphState> {
        &self.state
    }
}

#[async_trait]
impl StoragePort for MemoryStore {
    async fn initialize(&self) -> Result<()> {
        *self.state.write() = GraphState::default();
        Ok(())
    }

    async fn close(&self, persist: bool) -> Result<()> {
        if persist {
            tracing::debug!("memory store has no persistence; commit discards the graph");
        }
        *self.state.write() = GraphState::default();
        Ok(())
    }

    // ========================================================================
    // Aliases
    // ========================================================================

    async fn alias_exists(&self, alias: &str) -> Result<bool> {
        Ok(self.state.read().alias_exists(alias))
    }

    async fn set_alias(&self, alias: &str, soul: &SoulId) -> Result<()> {
        self.state.write().set_alias(alias, soul);
        Ok(())
    }

    async fn resolve_alias(&self, alias: &str) -> Result<Option<SoulId>> {
        Ok(self.state.read().resolve_alias(alias))
    }

    async fn remove_alias(&self, alias: &str) -> Result<()> {
        self.state.write().remove_alias(alias);
        Ok(())
    }

    async fn soul_aliases(&self, soul: &SoulId) -> Result<Vec<String>> {
        Ok(self.state.read().soul_aliases(soul))
    }

    async fn clear_aliases(&self, soul: &SoulId) -> Result<()> {
        self.state.write().clear_aliases(soul);
        Ok(())
    }

    // ========================================================================
    // Soul lifecycle
    // ========================================================================

    async fn soul_exists(&self, soul: &SoulId) -> Result<bool> {
        Ok(self.state.read().exists(soul))
    }

    async fn create_soul(&self, soul: &SoulId) -> Result<()> {
        self.state.write().touch(soul);
        Ok(())
    }

    async fn delete_soul(&self, soul: &SoulId) -> Result<()> {
        self.state.write().delete(soul);
        Ok(())
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    async fn soul_metadata(&self, soul: &SoulId) -> Result<MetaMap> {
        Ok(self.state.read().metadata(soul))
    }

    async fn soul_metadata_value(&self, soul: &SoulId, key: &str) -> Result<Option<Value>> {
        Ok(self.state.read().metadata_value(soul, key))
    }

    async fn set_soul_metadata(&self, souls: &[SoulId], patch: &MetaMap) -> Result<()> {
        self.state.write().merge_metadata(souls, patch);
        Ok(())
    }

    // ========================================================================
    // Data payload
    // ========================================================================

    async fn soul_has_data(&self, soul: &SoulId) -> Result<bool> {
        Ok(self.state.read().has_data(soul))
    }

    async fn soul_data(&self, soul: &SoulId) -> Result<DataMap> {
        Ok(self.state.read().data(soul))
    }

    async fn set_soul_data(&self, soul: &SoulId, data: &DataMap, merge: bool) -> Result<()> {
        self.state.write().set_data(soul, data, merge);
        Ok(())
    }

    async fn clear_soul_data(&self, soul: &SoulId) -> Result<()> {
        self.state.write().clear_data(soul);
        Ok(())
    }

    // ========================================================================
    // Graph
    // ========================================================================

    async fn bind_souls(&self, a: &SoulId, b: &SoulId, spec: &BindSpec) -> Result<()> {
        self.state.write().bind(a, b, spec);
        Ok(())
    }

    async fn unbind_souls(&self, a: &SoulId, spec: &UnbindSpec) -> Result<()> {
        self.state.write().unbind(a, spec);
        Ok(())
    }

    async fn bound_souls(&self, a: &SoulId, direction: Direction) -> Result<Vec<SoulId>> {
        Ok(self.state.read().bound_souls(a, direction))
    }

    async fn bound_soul(&self, a: &SoulId, key: &str) -> Result<Option<SoulId>> {
        Ok(self.state.read().bound_soul(a, key))
    }

    async fn bound_keys(&self, a: &SoulId) -> Result<Vec<String>> {
        Ok(self.state.read().bound_keys(a))
    }

    async fn bound_key_souls(&self, a: &SoulId) -> Result<Vec<(String, SoulId, Direction)>> {
        Ok(self.state.read().bound_key_souls(a))
    }

    async fn clear_soul_bindings(&self, a: &SoulId, scope: BindingScope) -> Result<()> {
        self.state.write().clear_bindings(a, scope);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CDATE, MDATE};

    fn soul(tag: u8) -> SoulId {
        SoulId::parse(format!("SOUL-{:02X}{}", tag, "1".repeat(30))).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_touch_metadata() {
        let db = MemoryStore::new();
        let a = soul(1);

        assert!(!db.soul_exists(&a).await.unwrap());
        db.create_soul(&a).await.unwrap();
        assert!(db.soul_exists(&a).await.unwrap());

        let meta = db.soul_metadata(&a).await.unwrap();
        assert!(meta.contains_key(CDATE));
        assert!(meta.contains_key(MDATE));
    }

    #[tokio::test]
    async fn test_bind_touches_missing_souls() {
        let db = MemoryStore::new();
        let (a, b) = (soul(1), soul(2));

        db.bind_souls(&a, &b, &BindSpec::direction(Direction::South)).await.unwrap();

        assert!(db.soul_exists(&a).await.unwrap());
        assert!(db.soul_exists(&b).await.unwrap());
        assert_eq!(db.bound_souls(&a, Direction::South).await.unwrap(), vec![b.clone()]);
        assert_eq!(db.bound_souls(&b, Direction::North).await.unwrap(), vec![a.clone()]);
    }

    #[tokio::test]
    async fn test_data_merge_and_overwrite() {
        let db = MemoryStore::new();
        let a = soul(1);

        db.set_soul_data(&a, &DataMap::from([("x".into(), Value::from(1))]), true)
            .await
            .unwrap();
        db.set_soul_data(&a, &DataMap::from([("y".into(), Value::from(2))]), true)
            .await
            .unwrap();
        assert_eq!(db.soul_data(&a).await.unwrap().len(), 2);

        db.set_soul_data(&a, &DataMap::from([("z".into(), Value::from(3))]), false)
            .await
            .unwrap();
        let data = db.soul_data(&a).await.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data.get("z"), Some(&Value::Int(3)));

        db.clear_soul_data(&a).await.unwrap();
        assert!(!db.soul_has_data(&a).await.unwrap());
    }

    #[tokio::test]
    async fn test_alias_round_trip() {
        let db = MemoryStore::new();
        let a = soul(1);

        db.set_alias("employee-1", &a).await.unwrap();
        assert!(db.alias_exists("employee-1").await.unwrap());
        assert_eq!(db.resolve_alias("employee-1").await.unwrap(), Some(a.clone()));

        db.remove_alias("employee-1").await.unwrap();
        assert_eq!(db.resolve_alias("employee-1").await.unwrap(), None);
        assert!(db.soul_aliases(&a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_discards() {
        let db = MemoryStore::new();
        let a = soul(1);
        db.create_soul(&a).await.unwrap();
        db.close(true).await.unwrap();
        assert!(!db.soul_exists(&a).await.unwrap());
    }
}
