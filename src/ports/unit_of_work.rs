//! All-or-nothing execution of repository mutations.
//!
//! A [`UnitOfWork`] brackets a block of repository writes. Adapters backed by
//! a transactional store map it onto a real transaction. The in-process
//! adapter relies on each registered [`Snapshotable`] store keeping a
//! pre-mutation snapshot of every entity the open unit writes, and puts only
//! those entities back on `rollback`. Writes made outside the unit, such as
//! commands on other runs, are never touched.

use crate::domain::{WorkflowError, WorkflowResult};
use crate::ports::repository::Entity;
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::warn;

/// Identifies one open unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitId(u64);

impl UnitId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

tokio::task_local! {
    static CURRENT_UNIT: UnitId;
}

/// The unit of work the running block belongs to, if any.
fn current_unit() -> Option<UnitId> {
    CURRENT_UNIT.try_with(|unit| *unit).ok()
}

/// State of one entity before the unit's first write to it.
#[derive(Debug, Clone)]
pub struct PreImage<T> {
    pub before: Option<T>,
    /// Version the unit's last write left behind; `None` after a removal.
    pub written: Option<u64>,
}

/// Per-unit pre-mutation snapshots kept by a store.
pub struct PreImages<T: Entity> {
    units: Mutex<HashMap<UnitId, HashMap<T::Id, PreImage<T>>>>,
}

impl<T: Entity> Default for PreImages<T> {
    fn default() -> Self {
        Self {
            units: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Entity> PreImages<T> {
    /// Notes a write to `id` made by the current unit. The first write keeps
    /// `before`; later writes only move `written`. Outside a unit this does
    /// nothing.
    pub fn record(&self, id: &T::Id, before: Option<&T>, written: Option<u64>) -> WorkflowResult<()> {
        let Some(unit) = current_unit() else {
            return Ok(());
        };
        let mut units = self.units.lock().map_err(|_| poisoned(T::KIND))?;
        let entry = units
            .entry(unit)
            .or_default()
            .entry(id.clone())
            .or_insert_with(|| PreImage {
                before: before.cloned(),
                written,
            });
        entry.written = written;
        Ok(())
    }

    /// Removes and returns everything recorded for `unit`.
    pub fn take(&self, unit: UnitId) -> WorkflowResult<Vec<(T::Id, PreImage<T>)>> {
        let mut units = self.units.lock().map_err(|_| poisoned(T::KIND))?;
        Ok(units
            .remove(&unit)
            .map(|entries| entries.into_iter().collect())
            .unwrap_or_default())
    }
}

fn poisoned(kind: &str) -> WorkflowError {
    WorkflowError::infra("unit of work", format!("{kind}: pre-image lock poisoned"))
}

/// A store that can undo the writes of one unit of work.
#[async_trait]
pub trait Snapshotable: Send + Sync {
    fn name(&self) -> &'static str;

    /// Drops the snapshots kept for `unit`.
    async fn commit_unit(&self, unit: UnitId) -> WorkflowResult<()>;

    /// Puts back every entity `unit` wrote. An entity written again after
    /// the unit's last write is left as it is.
    async fn rollback_unit(&self, unit: UnitId) -> WorkflowResult<()>;
}

/// Handle for one open unit of work, produced by [`UnitOfWork::begin`].
pub struct Transaction {
    unit: UnitId,
    state: Box<dyn Any + Send + Sync>,
}

impl Transaction {
    pub fn new<T: Any + Send + Sync>(unit: UnitId, state: T) -> Self {
        Self {
            unit,
            state: Box::new(state),
        }
    }

    pub fn unit(&self) -> UnitId {
        self.unit
    }

    pub fn into_inner<T: Any>(self) -> WorkflowResult<T> {
        self.state
            .downcast::<T>()
            .map(|state| *state)
            .map_err(|_| WorkflowError::infra("unit of work", "transaction from another unit of work"))
    }
}

#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn begin(&self) -> WorkflowResult<Transaction>;
    async fn commit(&self, tx: Transaction) -> WorkflowResult<()>;
    async fn rollback(&self, tx: Transaction) -> WorkflowResult<()>;
}

/// Runs `block` inside a unit of work: commits on success, rolls back and
/// returns the block's error on failure. The block must not have been polled
/// before the call. Only writes made while polling `block` belong to the
/// unit; tasks it spawns do not.
pub async fn run_in_unit_of_work<T, F>(uow: &dyn UnitOfWork, block: F) -> WorkflowResult<T>
where
    F: Future<Output = WorkflowResult<T>> + Send,
    T: Send,
{
    let tx = uow.begin().await?;
    match CURRENT_UNIT.scope(tx.unit(), block).await {
        Ok(value) => {
            uow.commit(tx).await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = uow.rollback(tx).await {
                warn!(error = %rollback_err, "unit of work rollback failed");
            }
            Err(err)
        }
    }
}
