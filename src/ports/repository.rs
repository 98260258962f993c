//! Repository ports.
//!
//! Every aggregate is persisted through an [`EntityStore`], a version-checked
//! key/value store. The per-aggregate repository traits add the ordering and
//! range queries the use cases need and are implemented for every store by
//! blanket impls, so an adapter only has to implement `EntityStore<T>`.

use crate::domain::errors::{WorkflowError, WorkflowResult};
use crate::domain::{
    Checkpoint, CheckpointId, GitId, Report, ReportId, RunStatus, TaskExecutionId,
    WorkExecution, WorkExecutionId, WorkTree, WorkTreeId, WorkflowRun, WorkflowRunId,
    WorkflowSpace, WorkflowSpaceId,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::hash::Hash;

/// A persistable, independently versioned aggregate.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Id: Clone + Eq + Hash + Display + Send + Sync + 'static;

    /// Kind name used in errors and as the storage directory.
    const KIND: &'static str;

    fn entity_id(&self) -> Self::Id;
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}

/// Version-checked storage for one aggregate type.
///
/// `save` must fail with [`WorkflowError::OptimisticLock`] when the stored
/// version differs from the entity's version (an absent record counts as
/// version 0). On success the stored and in-memory versions become N+1.
#[async_trait]
pub trait EntityStore<T: Entity>: Send + Sync {
    async fn get(&self, id: &T::Id) -> WorkflowResult<Option<T>>;
    async fn list(&self) -> WorkflowResult<Vec<T>>;
    async fn save(&self, entity: &mut T) -> WorkflowResult<()>;
    /// Returns true when a record was removed.
    async fn remove(&self, id: &T::Id) -> WorkflowResult<bool>;
}

/// Shared version check for store implementations.
pub fn check_version<T: Entity>(stored: Option<&T>, entity: &T) -> WorkflowResult<u64> {
    let actual = stored.map_or(0, <T as Entity>::version);
    if actual != entity.version() {
        return Err(WorkflowError::OptimisticLock {
            kind: T::KIND,
            id: entity.entity_id().to_string(),
            expected: entity.version(),
            actual,
        });
    }
    Ok(actual + 1)
}

macro_rules! entity {
    ($ty:ty, $id:ty, $kind:literal, $getter:ident) => {
        impl Entity for $ty {
            type Id = $id;
            const KIND: &'static str = $kind;

            fn entity_id(&self) -> Self::Id {
                self.$getter()
            }

            fn version(&self) -> u64 {
                <$ty>::version(self)
            }

            fn set_version(&mut self, version: u64) {
                <$ty>::set_version(self, version)
            }
        }
    };
}

entity!(WorkflowRun, WorkflowRunId, "workflow_run", id);
entity!(WorkExecution, WorkExecutionId, "work_execution", id);
entity!(Report, ReportId, "report", id);
entity!(Checkpoint, CheckpointId, "checkpoint", id);
entity!(WorkTree, WorkTreeId, "work_tree", id);
entity!(WorkflowSpace, WorkflowSpaceId, "workflow_space", id);

#[async_trait]
pub trait WorkflowRunRepository: Send + Sync {
    async fn find_by_id(&self, id: WorkflowRunId) -> WorkflowResult<Option<WorkflowRun>>;
    async fn find_all(&self) -> WorkflowResult<Vec<WorkflowRun>>;
    async fn find_by_status(&self, status: RunStatus) -> WorkflowResult<Vec<WorkflowRun>>;
    async fn save(&self, run: &mut WorkflowRun) -> WorkflowResult<()>;
    async fn delete(&self, id: WorkflowRunId) -> WorkflowResult<bool>;
    async fn exists(&self, id: WorkflowRunId) -> WorkflowResult<bool>;

    /// Loads a run or fails with not-found.
    async fn get(&self, id: WorkflowRunId) -> WorkflowResult<WorkflowRun> {
        WorkflowRunRepository::find_by_id(self, id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(WorkflowRun::KIND, id))
    }
}

#[async_trait]
impl<S: EntityStore<WorkflowRun>> WorkflowRunRepository for S {
    async fn find_by_id(&self, id: WorkflowRunId) -> WorkflowResult<Option<WorkflowRun>> {
        EntityStore::<WorkflowRun>::get(self, &id).await
    }

    /// Oldest first.
    async fn find_all(&self) -> WorkflowResult<Vec<WorkflowRun>> {
        let mut runs = EntityStore::<WorkflowRun>::list(self).await?;
        runs.sort_by_key(|r| (r.created_at(), r.id()));
        Ok(runs)
    }

    async fn find_by_status(&self, status: RunStatus) -> WorkflowResult<Vec<WorkflowRun>> {
        let mut runs = WorkflowRunRepository::find_all(self).await?;
        runs.retain(|r| r.status() == status);
        Ok(runs)
    }

    async fn save(&self, run: &mut WorkflowRun) -> WorkflowResult<()> {
        EntityStore::<WorkflowRun>::save(self, run).await
    }

    async fn delete(&self, id: WorkflowRunId) -> WorkflowResult<bool> {
        EntityStore::<WorkflowRun>::remove(self, &id).await
    }

    async fn exists(&self, id: WorkflowRunId) -> WorkflowResult<bool> {
        Ok(EntityStore::<WorkflowRun>::get(self, &id).await?.is_some())
    }
}

#[async_trait]
pub trait WorkExecutionRepository: Send + Sync {
    async fn find_by_id(&self, id: WorkExecutionId) -> WorkflowResult<Option<WorkExecution>>;
    /// Ordered by work node sequence.
    async fn find_by_workflow_run_id(
        &self,
        run_id: WorkflowRunId,
    ) -> WorkflowResult<Vec<WorkExecution>>;
    async fn save(&self, execution: &mut WorkExecution) -> WorkflowResult<()>;
    async fn delete(&self, id: WorkExecutionId) -> WorkflowResult<bool>;
    /// Deletes the run's executions with `sequence >= from_sequence` and
    /// returns them.
    async fn delete_by_workflow_run_id_from_sequence(
        &self,
        run_id: WorkflowRunId,
        from_sequence: usize,
    ) -> WorkflowResult<Vec<WorkExecution>>;

    async fn get(&self, id: WorkExecutionId) -> WorkflowResult<WorkExecution> {
        WorkExecutionRepository::find_by_id(self, id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(WorkExecution::KIND, id))
    }

    async fn find_by_run_and_sequence(
        &self,
        run_id: WorkflowRunId,
        sequence: u32,
    ) -> WorkflowResult<Option<WorkExecution>> {
        Ok(WorkExecutionRepository::find_by_workflow_run_id(self, run_id)
            .await?
            .into_iter()
            .find(|e| e.work_node_sequence() == sequence))
    }
}

#[async_trait]
impl<S: EntityStore<WorkExecution>> WorkExecutionRepository for S {
    async fn find_by_id(&self, id: WorkExecutionId) -> WorkflowResult<Option<WorkExecution>> {
        EntityStore::<WorkExecution>::get(self, &id).await
    }

    async fn find_by_workflow_run_id(
        &self,
        run_id: WorkflowRunId,
    ) -> WorkflowResult<Vec<WorkExecution>> {
        let mut executions: Vec<_> = EntityStore::<WorkExecution>::list(self)
            .await?
            .into_iter()
            .filter(|e| e.workflow_run_id() == run_id)
            .collect();
        executions.sort_by_key(|e| (e.work_node_sequence(), e.created_at()));
        Ok(executions)
    }

    async fn save(&self, execution: &mut WorkExecution) -> WorkflowResult<()> {
        EntityStore::<WorkExecution>::save(self, execution).await
    }

    async fn delete(&self, id: WorkExecutionId) -> WorkflowResult<bool> {
        EntityStore::<WorkExecution>::remove(self, &id).await
    }

    async fn delete_by_workflow_run_id_from_sequence(
        &self,
        run_id: WorkflowRunId,
        from_sequence: usize,
    ) -> WorkflowResult<Vec<WorkExecution>> {
        let doomed: Vec<_> = WorkExecutionRepository::find_by_workflow_run_id(self, run_id)
            .await?
            .into_iter()
            .filter(|e| e.work_node_sequence() as usize >= from_sequence)
            .collect();
        for execution in &doomed {
            EntityStore::<WorkExecution>::remove(self, &execution.id()).await?;
        }
        Ok(doomed)
    }
}

#[async_trait]
pub trait ReportRepository: Send + Sync {
    async fn find_by_id(&self, id: ReportId) -> WorkflowResult<Option<Report>>;
    async fn find_by_task_execution_id(
        &self,
        task_id: TaskExecutionId,
    ) -> WorkflowResult<Option<Report>>;
    async fn find_by_workflow_run_id(&self, run_id: WorkflowRunId)
        -> WorkflowResult<Vec<Report>>;
    async fn save(&self, report: &mut Report) -> WorkflowResult<()>;
    async fn delete_by_work_execution_ids(
        &self,
        execution_ids: &[WorkExecutionId],
    ) -> WorkflowResult<usize>;

    async fn get(&self, id: ReportId) -> WorkflowResult<Report> {
        ReportRepository::find_by_id(self, id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(Report::KIND, id))
    }
}

#[async_trait]
impl<S: EntityStore<Report>> ReportRepository for S {
    async fn find_by_id(&self, id: ReportId) -> WorkflowResult<Option<Report>> {
        EntityStore::<Report>::get(self, &id).await
    }

    async fn find_by_task_execution_id(
        &self,
        task_id: TaskExecutionId,
    ) -> WorkflowResult<Option<Report>> {
        Ok(EntityStore::<Report>::list(self)
            .await?
            .into_iter()
            .find(|r| r.task_execution_id() == task_id))
    }

    async fn find_by_workflow_run_id(
        &self,
        run_id: WorkflowRunId,
    ) -> WorkflowResult<Vec<Report>> {
        Ok(EntityStore::<Report>::list(self)
            .await?
            .into_iter()
            .filter(|r| r.workflow_run_id() == run_id)
            .collect())
    }

    async fn save(&self, report: &mut Report) -> WorkflowResult<()> {
        EntityStore::<Report>::save(self, report).await
    }

    async fn delete_by_work_execution_ids(
        &self,
        execution_ids: &[WorkExecutionId],
    ) -> WorkflowResult<usize> {
        let doomed: Vec<_> = EntityStore::<Report>::list(self)
            .await?
            .into_iter()
            .filter(|r| execution_ids.contains(&r.work_execution_id()))
            .collect();
        for report in &doomed {
            EntityStore::<Report>::remove(self, &report.id()).await?;
        }
        Ok(doomed.len())
    }
}

#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    async fn find_by_id(&self, id: CheckpointId) -> WorkflowResult<Option<Checkpoint>>;
    /// Oldest first.
    async fn find_by_workflow_run_id(
        &self,
        run_id: WorkflowRunId,
    ) -> WorkflowResult<Vec<Checkpoint>>;
    async fn save(&self, checkpoint: &mut Checkpoint) -> WorkflowResult<()>;
    async fn delete_by_workflow_run_id(&self, run_id: WorkflowRunId) -> WorkflowResult<usize>;

    async fn find_latest(&self, run_id: WorkflowRunId) -> WorkflowResult<Option<Checkpoint>> {
        Ok(CheckpointRepository::find_by_workflow_run_id(self, run_id).await?.pop())
    }
}

#[async_trait]
impl<S: EntityStore<Checkpoint>> CheckpointRepository for S {
    async fn find_by_id(&self, id: CheckpointId) -> WorkflowResult<Option<Checkpoint>> {
        EntityStore::<Checkpoint>::get(self, &id).await
    }

    async fn find_by_workflow_run_id(
        &self,
        run_id: WorkflowRunId,
    ) -> WorkflowResult<Vec<Checkpoint>> {
        let mut checkpoints: Vec<_> = EntityStore::<Checkpoint>::list(self)
            .await?
            .into_iter()
            .filter(|c| c.workflow_run_id() == run_id)
            .collect();
        checkpoints.sort_by_key(|c| (c.created_at(), c.work_sequence()));
        Ok(checkpoints)
    }

    async fn save(&self, checkpoint: &mut Checkpoint) -> WorkflowResult<()> {
        EntityStore::<Checkpoint>::save(self, checkpoint).await
    }

    async fn delete_by_workflow_run_id(&self, run_id: WorkflowRunId) -> WorkflowResult<usize> {
        let doomed = CheckpointRepository::find_by_workflow_run_id(self, run_id).await?;
        for checkpoint in &doomed {
            EntityStore::<Checkpoint>::remove(self, &checkpoint.id()).await?;
        }
        Ok(doomed.len())
    }
}

#[async_trait]
pub trait WorkTreeRepository: Send + Sync {
    async fn find_by_workflow_run_id(&self, run_id: WorkflowRunId)
        -> WorkflowResult<Vec<WorkTree>>;
    async fn save(&self, work_tree: &mut WorkTree) -> WorkflowResult<()>;
    async fn delete(&self, id: WorkTreeId) -> WorkflowResult<bool>;

    async fn find_by_run_and_git(
        &self,
        run_id: WorkflowRunId,
        git_id: &GitId,
    ) -> WorkflowResult<Option<WorkTree>> {
        Ok(WorkTreeRepository::find_by_workflow_run_id(self, run_id)
            .await?
            .into_iter()
            .find(|t| t.git_id() == git_id))
    }
}

#[async_trait]
impl<S: EntityStore<WorkTree>> WorkTreeRepository for S {
    async fn find_by_workflow_run_id(
        &self,
        run_id: WorkflowRunId,
    ) -> WorkflowResult<Vec<WorkTree>> {
        let mut trees: Vec<_> = EntityStore::<WorkTree>::list(self)
            .await?
            .into_iter()
            .filter(|t| t.workflow_run_id() == run_id)
            .collect();
        trees.sort_by(|a, b| a.git_id().cmp(b.git_id()));
        Ok(trees)
    }

    async fn save(&self, work_tree: &mut WorkTree) -> WorkflowResult<()> {
        EntityStore::<WorkTree>::save(self, work_tree).await
    }

    async fn delete(&self, id: WorkTreeId) -> WorkflowResult<bool> {
        EntityStore::<WorkTree>::remove(self, &id).await
    }
}

#[async_trait]
pub trait WorkflowSpaceRepository: Send + Sync {
    async fn find_by_workflow_run_id(
        &self,
        run_id: WorkflowRunId,
    ) -> WorkflowResult<Option<WorkflowSpace>>;
    async fn save(&self, space: &mut WorkflowSpace) -> WorkflowResult<()>;
    async fn delete(&self, id: WorkflowSpaceId) -> WorkflowResult<bool>;

    async fn get_for_run(&self, run_id: WorkflowRunId) -> WorkflowResult<WorkflowSpace> {
        WorkflowSpaceRepository::find_by_workflow_run_id(self, run_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(WorkflowSpace::KIND, run_id))
    }
}

#[async_trait]
impl<S: EntityStore<WorkflowSpace>> WorkflowSpaceRepository for S {
    async fn find_by_workflow_run_id(
        &self,
        run_id: WorkflowRunId,
    ) -> WorkflowResult<Option<WorkflowSpace>> {
        Ok(EntityStore::<WorkflowSpace>::list(self)
            .await?
            .into_iter()
            .find(|s| s.workflow_run_id() == run_id))
    }

    async fn save(&self, space: &mut WorkflowSpace) -> WorkflowResult<()> {
        EntityStore::<WorkflowSpace>::save(self, space).await
    }

    async fn delete(&self, id: WorkflowSpaceId) -> WorkflowResult<bool> {
        EntityStore::<WorkflowSpace>::remove(self, &id).await
    }
}
