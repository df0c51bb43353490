//! Identifier generation.
//!
//! Soul ids are random hex tokens checked for existence against the storage
//! port before use. Collisions are astronomically unlikely, but the allocator
//! still has a deterministic, bounded failure mode: every retry adds one byte
//! of entropy, and exhausting the retry budget is a fatal
//! [`Error::EntropyExhausted`] rather than an open-ended loop.

use std::fmt::Write as _;

use rand::RngCore;

use crate::model::SoulId;
use crate::storage::StoragePort;
use crate::{Error, Result};

/// Random bytes in a first-attempt soul id (32 hex chars).
pub const BASE_ENTROPY_BYTES: usize = 16;

/// Extra bytes allowed before allocation fails (caps ids at 42 hex chars).
pub const MAX_EXTRA_ENTROPY: usize = 5;

/// Allocate a fresh soul id that does not yet exist in `store`.
pub async fn generate_soul_id(store: &dyn StoragePort) -> Result<SoulId> {
    let mut extra = 0;
    loop {
        let candidate = random_soul_id(BASE_ENTROPY_BYTES + extra);
        if !store.soul_exists(&candidate).await? {
            return Ok(candidate);
        }
        tracing::debug!(extra, "soul id collision, retrying with more entropy");
        extra += 1;
        if extra > MAX_EXTRA_ENTROPY {
            return Err(Error::EntropyExhausted);
        }
    }
}

fn random_soul_id(bytes: usize) -> SoulId {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    let mut token = String::with_capacity(crate::model::SOUL_ID_PREFIX.len() + bytes * 2);
    token.push_str(crate::model::SOUL_ID_PREFIX);
    for b in buf {
        let _ = write!(token, "{b:02X}");
    }
    SoulId::from_generated(token)
}

/// Unique id of a [`Query`](crate::Query), used for cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Qid([u8; 16]);

impl Qid {
    pub fn generate() -> Qid {
        let mut buf = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut buf);
        Qid(buf)
    }
}

impl std::fmt::Display for Qid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.0 {
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::model::{DataMap, Direction, MetaMap, Value};
    use crate::storage::{BindSpec, BindingScope, UnbindSpec};

    /// Storage stub whose first `collisions` existence checks report a hit.
    struct CollidingStore {
        collisions: usize,
        checks: AtomicUsize,
    }

    #[async_trait]
    impl StoragePort for CollidingStore {
        async fn initialize(&self) -> Result<()> {
            Ok(())
        }
        async fn close(&self, _persist: bool) -> Result<()> {
            Ok(())
        }
        async fn alias_exists(&self, _alias: &str) -> Result<bool> {
            unimplemented!()
        }
        async fn set_alias(&self, _alias: &str, _soul: &SoulId) -> Result<()> {
            unimplemented!()
        }
        async fn resolve_alias(&self, _alias: &str) -> Result<Option<SoulId>> {
            unimplemented!()
        }
        async fn remove_alias(&self, _alias: &str) -> Result<()> {
            unimplemented!()
        }
        async fn soul_aliases(&self, _soul: &SoulId) -> Result<Vec<String>> {
            unimplemented!()
        }
        async fn clear_aliases(&self, _soul: &SoulId) -> Result<()> {
            unimplemented!()
        }
        async fn soul_exists(&self, _soul: &SoulId) -> Result<bool> {
            let n = self.checks.fetch_add(1, Ordering::Relaxed);
            Ok(n < self.collisions)
        }
        async fn create_soul(&self, _soul: &SoulId) -> Result<()> {
            unimplemented!()
        }
        async fn delete_soul(&self, _soul: &SoulId) -> Result<()> {
            unimplemented!()
        }
        async fn soul_metadata(&self, _soul: &SoulId) -> Result<MetaMap> {
            unimplemented!()
        }
        async fn soul_metadata_value(&self, _soul: &SoulId, _key: &str) -> Result<Option<Value>> {
            unimplemented!()
        }
        async fn set_soul_metadata(&self, _souls: &[SoulId], _patch: &MetaMap) -> Result<()> {
            unimplemented!()
        }
        async fn soul_has_data(&self, _soul: &SoulId) -> Result<bool> {
            unimplemented!()
        }
        async fn soul_data(&self, _soul: &SoulId) -> Result<DataMap> {
            unimplemented!()
        }
        async fn set_soul_data(&self, _soul: &SoulId, _data: &DataMap, _merge: bool) -> Result<()> {
            unimplemented!()
        }
        async fn clear_soul_data(&self, _soul: &SoulId) -> Result<()> {
            unimplemented!()
        }
        async fn bind_souls(&self, _a: &SoulId, _b: &SoulId, _spec: &BindSpec) -> Result<()> {
            unimplemented!()
        }
        async fn unbind_souls(&self, _a: &SoulId, _spec: &UnbindSpec) -> Result<()> {
            unimplemented!()
        }
        async fn bound_souls(&self, _a: &SoulId, _direction: Direction) -> Result<Vec<SoulId>> {
            unimplemented!()
        }
        async fn bound_soul(&self, _a: &SoulId, _key: &str) -> Result<Option<SoulId>> {
            unimplemented!()
        }
        async fn bound_keys(&self, _a: &SoulId) -> Result<Vec<String>> {
            unimplemented!()
        }
        async fn bound_key_souls(&self, _a: &SoulId) -> Result<Vec<(String, SoulId, Direction)>> {
            unimplemented!()
        }
        async fn clear_soul_bindings(&self, _a: &SoulId, _scope: BindingScope) -> Result<()> {
            unimplemented!()
        }
    }

    fn colliding(n: usize) -> CollidingStore {
        CollidingStore { collisions: n, checks: AtomicUsize::new(0) }
    }

    #[tokio::test]
    async fn test_first_candidate_is_minimum_width() {
        let store = colliding(0);
        let id = generate_soul_id(&store).await.unwrap();
        assert_eq!(id.as_str().len(), "SOUL-".len() + 32);
        assert!(SoulId::is_valid(id.as_str()));
    }

    #[tokio::test]
    async fn test_entropy_grows_per_collision() {
        let store = colliding(3);
        let id = generate_soul_id(&store).await.unwrap();
        // three collisions -> three extra bytes -> six extra hex chars
        assert_eq!(id.as_str().len(), "SOUL-".len() + 32 + 6);
        assert!(SoulId::is_valid(id.as_str()));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_fatal() {
        let store = colliding(MAX_EXTRA_ENTROPY + 1);
        let err = generate_soul_id(&store).await.unwrap_err();
        assert!(matches!(err, Error::EntropyExhausted));
        // exactly budget + 1 candidates were ever checked
        assert_eq!(store.checks.load(Ordering::Relaxed), MAX_EXTRA_ENTROPY + 1);
    }

    #[test]
    fn test_qids_are_unique_enough() {
        let a = Qid::generate();
        let b = Qid::generate();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 32);
    }
}
