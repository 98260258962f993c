//! In-process entity store.

use crate::domain::WorkflowResult;
use crate::ports::repository::check_version;
use crate::ports::{Entity, EntityStore, PreImages, Snapshotable, UnitId};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub struct MemoryStore<T: Entity> {
    data: RwLock<HashMap<T::Id, T>>,
    undo: PreImages<T>,
}

impl<T: Entity> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            undo: PreImages::default(),
        }
    }
}

impl<T: Entity> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Entity> EntityStore<T> for MemoryStore<T> {
    async fn get(&self, id: &T::Id) -> WorkflowResult<Option<T>> {
        Ok(self.data.read().await.get(id).cloned())
    }

    async fn list(&self) -> WorkflowResult<Vec<T>> {
        Ok(self.data.read().await.values().cloned().collect())
    }

    async fn save(&self, entity: &mut T) -> WorkflowResult<()> {
        let mut data = self.data.write().await;
        let id = entity.entity_id();
        let next = check_version(data.get(&id), entity)?;
        self.undo.record(&id, data.get(&id), Some(next))?;
        entity.set_version(next);
        data.insert(id.clone(), entity.clone());
        debug!(kind = T::KIND, id = %id, version = next, "saved");
        Ok(())
    }

    async fn remove(&self, id: &T::Id) -> WorkflowResult<bool> {
        let mut data = self.data.write().await;
        let Some(existing) = data.get(id) else {
            return Ok(false);
        };
        self.undo.record(id, Some(existing), None)?;
        data.remove(id);
        Ok(true)
    }
}

#[async_trait]
impl<T: Entity> Snapshotable for MemoryStore<T> {
    fn name(&self) -> &'static str {
        T::KIND
    }

    async fn commit_unit(&self, unit: UnitId) -> WorkflowResult<()> {
        self.undo.take(unit)?;
        Ok(())
    }

    async fn rollback_unit(&self, unit: UnitId) -> WorkflowResult<()> {
        let mut data = self.data.write().await;
        for (id, pre) in self.undo.take(unit)? {
            let current = data.get(&id).map(Entity::version);
            if current != pre.written {
                warn!(kind = T::KIND, id = %id, "written outside the unit of work, not restored");
                continue;
            }
            match pre.before {
                Some(before) => data.insert(id, before),
                None => data.remove(&id),
            };
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/memory_store_tests.rs"]
mod tests;
