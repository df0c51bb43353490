//! The operation algebra.
//!
//! Every traversal step a query can accumulate is a variant of [`Step`],
//! dispatched through a single `match` in [`Step::apply`]. An arm takes the
//! current soul set and produces the next one against the storage port; an
//! empty set is an ordinary value, and "no result" is unrepresentable.

use std::fmt;
use std::sync::Arc;

use futures::future::try_join_all;

use crate::ident::generate_soul_id;
use crate::model::{DataMap, Direction, MetaMap, SoulId};
use crate::storage::{BindSpec, StoragePort, UnbindSpec};
use crate::Result;
use super::{merge_ids, BindTargets, DependencyChain};

/// Hook invoked with each soul a [`Navigate`] step allocates.
pub type OnCreate = Arc<dyn Fn(&SoulId) + Send + Sync>;

/// A traversal move: follow a key and/or a direction from every soul in the
/// current set, optionally allocating and binding a fresh soul for origins
/// with no match.
#[derive(Clone, Default)]
pub struct Navigate {
    direction: Option<Direction>,
    key: Option<String>,
    create: bool,
    reverse: bool,
    on_create: Option<OnCreate>,
}

impl Navigate {
    /// Keyless navigation in a direction.
    pub fn direction(direction: Direction) -> Navigate {
        Navigate { direction: Some(direction), ..Navigate::default() }
    }

    /// Keyed navigation through the origin soul's key index.
    pub fn key(name: impl Into<String>) -> Navigate {
        let name = name.into();
        assert!(!name.is_empty(), "binding key must not be empty");
        Navigate { key: Some(name), ..Navigate::default() }
    }

    /// Direction used when binding a freshly created soul (and for keyless
    /// lookups). Defaults to South when unset.
    pub fn with_direction(mut self, direction: Direction) -> Navigate {
        self.direction = Some(direction);
        self
    }

    /// Allocate and bind a new soul for origins with no matching binding.
    pub fn create(mut self) -> Navigate {
        self.create = true;
        self
    }

    /// Bind created souls *toward* the origin (new soul becomes the binding
    /// origin, in the opposite direction) instead of away from it.
    pub fn reverse(mut self) -> Navigate {
        self.reverse = true;
        self
    }

    /// Observe every soul this step allocates.
    pub fn on_create(mut self, hook: impl Fn(&SoulId) + Send + Sync + 'static) -> Navigate {
        self.on_create = Some(Arc::new(hook));
        self
    }

    fn heading(&self) -> Direction {
        self.direction.unwrap_or(Direction::South)
    }

    async fn apply(&self, store: &dyn StoragePort, souls: Vec<SoulId>) -> Result<Vec<SoulId>> {
        let heading = self.heading();
        let mut next = Vec::new();

        for origin in &souls {
            let hits = match &self.key {
                Some(key) => Vec::from_iter(store.bound_soul(origin, key).await?),
                None => store.bound_souls(origin, heading).await?,
            };
            if !hits.is_empty() {
                next = merge_ids(next, hits);
                continue;
            }
            if !self.create {
                continue;
            }

            let fresh = generate_soul_id(store).await?;
            store.create_soul(&fresh).await?;
            if self.reverse {
                let spec = BindSpec { direction: heading.opposite(), key: self.key.clone() };
                store.bind_souls(&fresh, origin, &spec).await?;
            } else {
                let spec = BindSpec { direction: heading, key: self.key.clone() };
                store.bind_souls(origin, &fresh, &spec).await?;
            }
            if let Some(hook) = &self.on_create {
                hook(&fresh);
            }
            next = merge_ids(next, vec![fresh]);
        }

        Ok(next)
    }
}

impl fmt::Debug for Navigate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Navigate")
            .field("direction", &self.direction)
            .field("key", &self.key)
            .field("create", &self.create)
            .field("reverse", &self.reverse)
            .field("on_create", &self.on_create.is_some())
            .finish()
    }
}

/// Execution context threaded through a resolution pass.
pub(crate) struct StepContext {
    pub(crate) store: Arc<dyn StoragePort>,
    pub(crate) chain: DependencyChain,
}

/// One deferred operation in a query's traversal.
#[derive(Clone)]
pub(crate) enum Step {
    Souls(Vec<SoulId>),
    Query(super::Query),
    FromAlias { alias: String, create: bool },
    SetAlias { alias: String },
    RemoveAlias { alias: String },
    Navigate(Navigate),
    Bind { targets: BindTargets, direction: Direction, key: Option<String> },
    Unbind { targets: BindTargets, direction: Direction },
    UnbindByKey { key: String },
    UpdateMeta(MetaMap),
    PutData { data: DataMap, merge: bool },
    ClearData,
    Delete,
}

impl Step {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Step::Souls(_) => "SOULS",
            Step::Query(_) => "QUERY",
            Step::FromAlias { .. } => "FROM_ALIAS",
            Step::SetAlias { .. } => "SET_ALIAS",
            Step::RemoveAlias { .. } => "REMOVE_ALIAS",
            Step::Navigate(_) => "NAVIGATE",
            Step::Bind { .. } => "BIND",
            Step::Unbind { .. } => "UNBIND",
            Step::UnbindByKey { .. } => "UNBIND_BY_KEY",
            Step::UpdateMeta(_) => "UPDATE_META",
            Step::PutData { .. } => "PUT_DATA",
            Step::ClearData => "CLEAR_DATA",
            Step::Delete => "DELETE",
        }
    }

    pub(crate) async fn apply(self, ctx: &StepContext, souls: Vec<SoulId>) -> Result<Vec<SoulId>> {
        let store = ctx.store.as_ref();
        match self {
            Step::Souls(ids) => Ok(merge_ids(souls, ids)),

            Step::Query(query) => {
                let resolved = query.resolve_with(ctx.chain.clone()).await?;
                Ok(merge_ids(souls, resolved))
            }

            Step::FromAlias { alias, create } => {
                if let Some(id) = store.resolve_alias(&alias).await? {
                    return Ok(merge_ids(souls, vec![id]));
                }
                if !create {
                    return Ok(souls);
                }
                let id = generate_soul_id(store).await?;
                store.create_soul(&id).await?;
                store.set_alias(&alias, &id).await?;
                Ok(merge_ids(souls, vec![id]))
            }

            // an alias names exactly one soul: the head of the current set
            Step::SetAlias { alias } => {
                if let Some(first) = souls.first() {
                    store.set_alias(&alias, first).await?;
                }
                Ok(souls)
            }

            Step::RemoveAlias { alias } => {
                store.remove_alias(&alias).await?;
                Ok(souls)
            }

            Step::Navigate(nav) => nav.apply(store, souls).await,

            Step::Bind { targets, direction, key } => {
                let ends = targets.resolve(&ctx.chain).await?;
                let spec = BindSpec { direction, key };
                let mut jobs = Vec::with_capacity(souls.len() * ends.len());
                for a in &souls {
                    for b in &ends {
                        jobs.push(store.bind_souls(a, b, &spec));
                    }
                }
                try_join_all(jobs).await?;
                Ok(souls)
            }

            Step::Unbind { targets, direction } => {
                let ends = targets.resolve(&ctx.chain).await?;
                let pairs: Vec<(&SoulId, UnbindSpec)> = souls
                    .iter()
                    .flat_map(|a| {
                        ends.iter().map(move |b| {
                            (a, UnbindSpec::Soul { target: b.clone(), direction })
                        })
                    })
                    .collect();
                try_join_all(pairs.iter().map(|(a, spec)| store.unbind_souls(a, spec))).await?;
                Ok(souls)
            }

            Step::UnbindByKey { key } => {
                let spec = UnbindSpec::Key(key);
                try_join_all(souls.iter().map(|a| store.unbind_souls(a, &spec))).await?;
                Ok(souls)
            }

            Step::UpdateMeta(patch) => {
                store.set_soul_metadata(&souls, &patch).await?;
                Ok(souls)
            }

            Step::PutData { data, merge } => {
                try_join_all(souls.iter().map(|a| store.set_soul_data(a, &data, merge))).await?;
                Ok(souls)
            }

            Step::ClearData => {
                try_join_all(souls.iter().map(|a| store.clear_soul_data(a))).await?;
                Ok(souls)
            }

            Step::Delete => {
                try_join_all(souls.iter().map(|a| store.delete_soul(a))).await?;
                Ok(Vec::new())
            }
        }
    }
}
