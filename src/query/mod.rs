//! # Deferred query builder
//!
//! A [`Query`] is an unevaluated plan: an ordered traversal of operation
//! steps plus the soul set they have produced so far. Builder calls never
//! touch storage; everything happens inside [`Query::resolve`].
//!
//! ## State machine
//!
//! *unresolved* (pending steps) → *resolved* (traversal drained, souls
//! authoritative) → *mutated* (new steps appended, back to unresolved).
//!
//! Navigation calls (`to`, `key`, `key_parent`, the compass shorthands) do
//! not mutate the current query; each spawns a child query whose first step
//! references the parent, registered in the parent's descendant list so
//! resolving the parent resolves every pending child exactly once.
//!
//! ## Resolution and cycles
//!
//! Steps run strictly in append order. Souls are committed back to the
//! query after every step, so a dependent query that references this one
//! mid-resolution observes the souls produced so far instead of a stale
//! snapshot. Each resolution carries a dependency chain of query ids; a
//! query whose own id is already on the incoming chain is a circular
//! dependency and fails instead of hanging. Descendants resolve after the
//! parent, concurrently, each on a fresh chain.

mod step;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture};
use futures::{StreamExt, TryStreamExt};
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::ident::Qid;
use crate::model::{DataMap, Direction, MetaMap, SoulId, Value};
use crate::tx::Transaction;
use crate::{Error, Result};

pub use step::{Navigate, OnCreate};
use step::{Step, StepContext};

// ============================================================================
// Dependency chain
// ============================================================================

/// The query ids an in-flight resolution passed through. Short in practice;
/// inlined up to four hops.
#[derive(Debug, Clone, Default)]
pub(crate) struct DependencyChain(SmallVec<[Qid; 4]>);

impl DependencyChain {
    fn contains(&self, qid: Qid) -> bool {
        self.0.contains(&qid)
    }

    fn push(&mut self, qid: Qid) {
        self.0.push(qid);
    }
}

/// Append `extra` to `base`, skipping ids already present.
pub(crate) fn merge_ids(mut base: Vec<SoulId>, extra: impl IntoIterator<Item = SoulId>) -> Vec<SoulId> {
    for id in extra {
        if !base.contains(&id) {
            base.push(id);
        }
    }
    base
}

// ============================================================================
// Bind targets
// ============================================================================

/// The other side of a `bind`/`unbind`: another query, literal soul ids, or
/// several queries at once. Everything normalizes through this before a
/// step is appended.
#[derive(Debug, Clone)]
pub enum BindTargets {
    Souls(Vec<SoulId>),
    Query(Query),
    Queries(Vec<Query>),
}

impl BindTargets {
    pub(crate) async fn resolve(&self, chain: &DependencyChain) -> Result<Vec<SoulId>> {
        match self {
            BindTargets::Souls(ids) => Ok(ids.clone()),
            BindTargets::Query(query) => query.resolve_with(chain.clone()).await,
            BindTargets::Queries(queries) => {
                let sets =
                    try_join_all(queries.iter().map(|q| q.resolve_with(chain.clone()))).await?;
                Ok(sets.into_iter().fold(Vec::new(), merge_ids))
            }
        }
    }
}

impl From<Query> for BindTargets {
    fn from(query: Query) -> BindTargets {
        BindTargets::Query(query)
    }
}

impl From<&Query> for BindTargets {
    fn from(query: &Query) -> BindTargets {
        BindTargets::Query(query.clone())
    }
}

impl From<SoulId> for BindTargets {
    fn from(id: SoulId) -> BindTargets {
        BindTargets::Souls(vec![id])
    }
}

impl From<&SoulId> for BindTargets {
    fn from(id: &SoulId) -> BindTargets {
        BindTargets::Souls(vec![id.clone()])
    }
}

impl From<Vec<SoulId>> for BindTargets {
    fn from(ids: Vec<SoulId>) -> BindTargets {
        BindTargets::Souls(ids)
    }
}

impl From<Vec<Query>> for BindTargets {
    fn from(queries: Vec<Query>) -> BindTargets {
        BindTargets::Queries(queries)
    }
}

// ============================================================================
// Query
// ============================================================================

/// A deferred, chainable plan of graph operations. Cheap to clone; clones
/// share the same traversal and soul set.
#[derive(Clone)]
pub struct Query {
    inner: Arc<QueryInner>,
}

struct QueryInner {
    qid: Qid,
    tx: Transaction,
    state: Mutex<QueryState>,
}

#[derive(Default)]
struct QueryState {
    traversal: Vec<Step>,
    souls: Vec<SoulId>,
    descendants: Vec<Query>,
}

impl Query {
    fn with_steps(tx: Transaction, mut steps: Vec<Step>) -> Query {
        // a leading literal is consumed immediately, not deferred
        let mut souls = Vec::new();
        if matches!(steps.first(), Some(Step::Souls(_))) {
            if let Step::Souls(ids) = steps.remove(0) {
                souls = ids;
            }
        }
        Query {
            inner: Arc::new(QueryInner {
                qid: Qid::generate(),
                tx,
                state: Mutex::new(QueryState { traversal: steps, souls, descendants: Vec::new() }),
            }),
        }
    }

    pub(crate) fn entry_alias(tx: Transaction, alias: String, create: bool) -> Query {
        Query::with_steps(tx, vec![Step::FromAlias { alias, create }])
    }

    pub(crate) fn entry_souls(tx: Transaction, ids: Vec<SoulId>) -> Query {
        Query::with_steps(tx, vec![Step::Souls(ids)])
    }

    // ========================================================================
    // Navigation (spawns child queries)
    // ========================================================================

    /// Child query of the souls bound in `direction`.
    pub fn to(&self, direction: Direction) -> Query {
        self.navigate(Navigate::direction(direction))
    }

    pub fn north(&self) -> Query {
        self.to(Direction::North)
    }

    pub fn south(&self) -> Query {
        self.to(Direction::South)
    }

    pub fn east(&self) -> Query {
        self.to(Direction::East)
    }

    pub fn west(&self) -> Query {
        self.to(Direction::West)
    }

    /// Child query of the soul bound under `name` in each origin's key index.
    pub fn key(&self, name: impl Into<String>) -> Query {
        self.navigate(Navigate::key(name))
    }

    /// Like [`Query::key`], but a soul created on a miss is bound *toward*
    /// the origin in the opposite direction.
    pub fn key_parent(&self, name: impl Into<String>) -> Query {
        self.navigate(Navigate::key(name).reverse())
    }

    /// Full-control navigation (creation, reversal, creation hook).
    pub fn navigate(&self, nav: Navigate) -> Query {
        self.spawn(Step::Navigate(nav))
    }

    // ========================================================================
    // Mutation (appends to this query)
    // ========================================================================

    /// Bind every resolved soul South to every target soul.
    pub fn bind(&self, targets: impl Into<BindTargets>) -> Query {
        self.bind_in(targets, Direction::South)
    }

    pub fn bind_in(&self, targets: impl Into<BindTargets>, direction: Direction) -> Query {
        self.append(Step::Bind { targets: targets.into(), direction, key: None })
    }

    /// Bind under a key, making the edge addressable by name from each
    /// origin soul.
    pub fn bind_keyed(
        &self,
        targets: impl Into<BindTargets>,
        direction: Direction,
        key: impl Into<String>,
    ) -> Query {
        let key = key.into();
        assert!(!key.is_empty(), "binding key must not be empty");
        self.append(Step::Bind { targets: targets.into(), direction, key: Some(key) })
    }

    /// Remove the bindings from every resolved soul to every target soul.
    pub fn unbind(&self, targets: impl Into<BindTargets>, direction: Direction) -> Query {
        self.append(Step::Unbind { targets: targets.into(), direction })
    }

    /// Remove the keyed binding named `key` from every resolved soul.
    pub fn unbind_key(&self, key: impl Into<String>) -> Query {
        let key = key.into();
        assert!(!key.is_empty(), "binding key must not be empty");
        self.append(Step::UnbindByKey { key })
    }

    /// Point `alias` at the first resolved soul. No-op on an empty set.
    pub fn set_alias(&self, alias: impl Into<String>) -> Query {
        let alias = alias.into();
        assert!(!alias.is_empty(), "alias must not be empty");
        self.append(Step::SetAlias { alias })
    }

    pub fn remove_alias(&self, alias: impl Into<String>) -> Query {
        let alias = alias.into();
        assert!(!alias.is_empty(), "alias must not be empty");
        self.append(Step::RemoveAlias { alias })
    }

    /// Merge `data` into every resolved soul's payload.
    pub fn put(&self, data: DataMap) -> Query {
        self.append(Step::PutData { data, merge: true })
    }

    /// Replace every resolved soul's payload wholesale.
    pub fn put_overwrite(&self, data: DataMap) -> Query {
        self.append(Step::PutData { data, merge: false })
    }

    pub fn clear_data(&self) -> Query {
        self.append(Step::ClearData)
    }

    /// Merge a single metadata pair into every resolved soul.
    pub fn set_meta(&self, key: impl Into<String>, value: impl Into<Value>) -> Query {
        self.update_meta(MetaMap::from([(key.into(), value.into())]))
    }

    /// Merge a metadata patch into every resolved soul.
    pub fn update_meta(&self, patch: MetaMap) -> Query {
        self.append(Step::UpdateMeta(patch))
    }

    /// Cascading delete of every resolved soul. Resolves to the empty set.
    pub fn delete(&self) -> Query {
        self.append(Step::Delete)
    }

    fn append(&self, step: Step) -> Query {
        self.inner.state.lock().traversal.push(step);
        self.clone()
    }

    fn spawn(&self, step: Step) -> Query {
        let child =
            Query::with_steps(self.inner.tx.clone(), vec![Step::Query(self.clone()), step]);
        self.inner.state.lock().descendants.push(child.clone());
        child
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Drain the pending traversal and return the resolved soul ids.
    /// Idempotent once resolved: no pending steps means no side effects.
    pub async fn resolve(&self) -> Result<Vec<SoulId>> {
        self.resolve_with(DependencyChain::default()).await
    }

    pub(crate) fn resolve_with(&self, chain: DependencyChain) -> BoxFuture<'static, Result<Vec<SoulId>>> {
        let query = self.clone();
        Box::pin(async move {
            // the cycle check runs before the resolved fast path, so a query
            // that reaches itself through its dependents always errors
            if chain.contains(query.inner.qid) {
                return Err(Error::CircularDependency { qid: query.inner.qid.to_string() });
            }

            if query.inner.state.lock().traversal.is_empty() {
                return Ok(query.inner.state.lock().souls.clone());
            }

            let mut chain = chain;
            chain.push(query.inner.qid);
            let store = query.inner.tx.store().await?;
            let ctx = StepContext { store, chain };

            loop {
                let (step, souls) = {
                    let mut state = query.inner.state.lock();
                    match state.traversal.is_empty() {
                        true => break,
                        false => (state.traversal.remove(0), state.souls.clone()),
                    }
                };
                tracing::trace!(qid = %query.inner.qid, step = step.name(), "applying step");
                let souls = step.apply(&ctx, souls).await?;
                query.inner.state.lock().souls = souls;
            }

            let descendants = std::mem::take(&mut query.inner.state.lock().descendants);
            try_join_all(descendants.iter().map(|d| d.resolve_with(DependencyChain::default())))
                .await?;

            Ok(query.inner.state.lock().souls.clone())
        })
    }

    // ========================================================================
    // Read accessors (force resolution)
    // ========================================================================

    pub async fn soul_ids(&self) -> Result<Vec<SoulId>> {
        self.resolve().await
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.resolve().await?.len())
    }

    /// Payload data of every resolved soul, in soul order.
    pub async fn get(&self) -> Result<Vec<DataMap>> {
        let ids = self.resolve().await?;
        let store = self.inner.tx.store().await?;
        try_join_all(ids.iter().map(|id| store.soul_data(id))).await
    }

    /// Payload data of the first resolved soul.
    pub async fn get_one(&self) -> Result<Option<DataMap>> {
        let ids = self.resolve().await?;
        match ids.first() {
            Some(id) => Ok(Some(self.inner.tx.store().await?.soul_data(id).await?)),
            None => Ok(None),
        }
    }

    /// Metadata of every resolved soul, in soul order.
    pub async fn meta(&self) -> Result<Vec<MetaMap>> {
        let ids = self.resolve().await?;
        let store = self.inner.tx.store().await?;
        try_join_all(ids.iter().map(|id| store.soul_metadata(id))).await
    }

    /// One metadata value of the first resolved soul.
    pub async fn meta_value(&self, key: &str) -> Result<Option<Value>> {
        let ids = self.resolve().await?;
        match ids.first() {
            Some(id) => self.inner.tx.store().await?.soul_metadata_value(id, key).await,
            None => Ok(None),
        }
    }

    /// Sorted union of the binding keys of every resolved soul.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let ids = self.resolve().await?;
        let store = self.inner.tx.store().await?;
        let per_soul = try_join_all(ids.iter().map(|id| store.bound_keys(id))).await?;
        let mut keys: Vec<String> = per_soul.into_iter().flatten().collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Whether every soul of `other` is among this query's resolved souls.
    pub async fn includes(&self, other: impl Into<BindTargets>) -> Result<bool> {
        let have = self.resolve().await?;
        let want = other.into().resolve(&DependencyChain::default()).await?;
        Ok(want.iter().all(|id| have.contains(id)))
    }

    /// Run `work` over every resolved soul with at most `concurrency` jobs
    /// in flight. Output order is unspecified.
    pub async fn map<F, Fut, T>(&self, concurrency: usize, work: F) -> Result<Vec<T>>
    where
        F: FnMut(SoulId) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let ids = self.resolve().await?;
        futures::stream::iter(ids.into_iter().map(work))
            .buffer_unordered(concurrency.max(1))
            .try_collect()
            .await
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Query")
            .field("qid", &self.inner.qid.to_string())
            .field("pending", &state.traversal.len())
            .field("souls", &state.souls.len())
            .field("descendants", &state.descendants.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
