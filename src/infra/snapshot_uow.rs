//! Snapshot-based unit of work.
//!
//! Each registered store keeps a pre-mutation snapshot of every entity the
//! open unit writes. `commit` drops those snapshots; `rollback` puts only
//! those entities back, so writes made outside the unit survive. Units of
//! work are serialized through an async mutex held by the open transaction.

use crate::domain::WorkflowResult;
use crate::ports::{Snapshotable, Transaction, UnitId, UnitOfWork};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

struct OpenUnit {
    _guard: OwnedMutexGuard<()>,
}

pub struct SnapshotUnitOfWork {
    stores: Vec<Arc<dyn Snapshotable>>,
    gate: Arc<Mutex<()>>,
}

impl SnapshotUnitOfWork {
    pub fn new(stores: Vec<Arc<dyn Snapshotable>>) -> Self {
        Self {
            stores,
            gate: Arc::new(Mutex::new(())),
        }
    }
}

#[async_trait]
impl UnitOfWork for SnapshotUnitOfWork {
    async fn begin(&self) -> WorkflowResult<Transaction> {
        let guard = self.gate.clone().lock_owned().await;
        let unit = UnitId::next();
        debug!(?unit, stores = self.stores.len(), "unit of work started");
        Ok(Transaction::new(unit, OpenUnit { _guard: guard }))
    }

    async fn commit(&self, tx: Transaction) -> WorkflowResult<()> {
        let unit = tx.unit();
        // The gate stays held until every store has dropped its snapshots.
        let _open = tx.into_inner::<OpenUnit>()?;
        let mut first_error = None;
        for store in &self.stores {
            if let Err(err) = store.commit_unit(unit).await {
                warn!(store = store.name(), error = %err, "dropping unit snapshots failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn rollback(&self, tx: Transaction) -> WorkflowResult<()> {
        let unit = tx.unit();
        let _open = tx.into_inner::<OpenUnit>()?;
        let mut first_error = None;
        for store in &self.stores {
            if let Err(err) = store.rollback_unit(unit).await {
                warn!(store = store.name(), error = %err, "snapshot restore failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
#[path = "tests/snapshot_uow_tests.rs"]
mod tests;
