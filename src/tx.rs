//! Transaction lifecycle over a storage port.
//!
//! A [`Transaction`] exclusively owns one storage instance: *unopened* →
//! *initialized* (the store's one-time setup has run, triggered lazily by
//! the first query resolution) → *closed* (commit persisted the store,
//! rollback discarded it). Closing is terminal; any further use fails with
//! [`Error::TransactionClosed`] instead of silently doing nothing.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::model::SoulId;
use crate::query::Query;
use crate::storage::StoragePort;
use crate::{Error, Result};

/// Handle to one storage instance's open/commit/rollback lifecycle. Cheap
/// to clone; clones share the same underlying store slot.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TxInner>,
}

struct TxInner {
    /// Emptied on commit/rollback; every later use errors.
    store: Mutex<Option<Arc<dyn StoragePort>>>,
    /// Guards the one-time `initialize` call. A tokio mutex because the
    /// store slot lock must not be held across the await.
    initialized: tokio::sync::Mutex<bool>,
}

impl Transaction {
    pub fn new(store: Arc<dyn StoragePort>) -> Transaction {
        Transaction {
            inner: Arc::new(TxInner {
                store: Mutex::new(Some(store)),
                initialized: tokio::sync::Mutex::new(false),
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.store.lock().is_none()
    }

    /// The initialized store, running its one-time setup on first access.
    pub(crate) async fn store(&self) -> Result<Arc<dyn StoragePort>> {
        let store = self.inner.store.lock().clone().ok_or(Error::TransactionClosed)?;
        let mut initialized = self.inner.initialized.lock().await;
        if !*initialized {
            tracing::debug!("initializing transaction store");
            store.initialize().await?;
            *initialized = true;
        }
        Ok(store)
    }

    /// Close the store, persisting its state. Terminal.
    pub async fn commit(&self) -> Result<()> {
        self.close(true).await
    }

    /// Close the store, discarding uncommitted state. Terminal.
    pub async fn rollback(&self) -> Result<()> {
        self.close(false).await
    }

    async fn close(&self, persist: bool) -> Result<()> {
        let store = self.inner.store.lock().take().ok_or(Error::TransactionClosed)?;
        tracing::debug!(persist, "closing transaction");
        store.close(persist).await
    }

    // ========================================================================
    // Query entry points
    // ========================================================================

    /// Start a query at the soul named by `alias`, optionally creating the
    /// soul (and the alias) if the alias is unknown.
    pub fn query(&self, alias: impl Into<String>, create: bool) -> Query {
        let alias = alias.into();
        assert!(!alias.is_empty(), "alias must not be empty");
        Query::entry_alias(self.clone(), alias, create)
    }

    /// Start a query over literal soul ids.
    pub fn souls(&self, ids: Vec<SoulId>) -> Query {
        Query::entry_souls(self.clone(), ids)
    }

    /// Start a query over a single literal soul id.
    pub fn soul(&self, id: SoulId) -> Query {
        Query::entry_souls(self.clone(), vec![id])
    }
}

// ============================================================================
// Tests
// ============================================================================
