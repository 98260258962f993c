use super::*;
use crate::domain::{RunStatus, WorkflowError, WorkflowRun};
use crate::ports::WorkflowRunRepository;
use crate::infra::SnapshotUnitOfWork;
use crate::ports::run_in_unit_of_work;
use crate::testing::run_with_steps;
use std::sync::Arc;

#[tokio::test]
async fn save_increments_version_and_persists_copy() {
    let store: MemoryStore<WorkflowRun> = MemoryStore::new();
    let mut run = run_with_steps(1);

    EntityStore::save(&store, &mut run).await.unwrap();
    assert_eq!(run.version(), 1);
    EntityStore::save(&store, &mut run).await.unwrap();
    assert_eq!(run.version(), 2);

    let stored = EntityStore::get(&store, &run.id()).await.unwrap().unwrap();
    assert_eq!(stored.version(), 2);
}

#[tokio::test]
async fn stale_save_is_an_optimistic_lock_conflict() {
    let store: MemoryStore<WorkflowRun> = MemoryStore::new();
    let mut run = run_with_steps(1);
    EntityStore::save(&store, &mut run).await.unwrap();

    let mut first = run.clone();
    let mut second = run.clone();
    first.start().unwrap();
    EntityStore::save(&store, &mut first).await.unwrap();

    second.cancel("late").unwrap();
    let err = EntityStore::save(&store, &mut second).await.unwrap_err();

    assert_eq!(
        err,
        WorkflowError::OptimisticLock {
            kind: "workflow_run",
            id: run.id().to_string(),
            expected: 1,
            actual: 2,
        }
    );
    assert!(err.is_transient());
    assert_eq!(second.version(), 1);
    let stored = EntityStore::get(&store, &run.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), RunStatus::Running);
}

#[tokio::test]
async fn new_entity_with_nonzero_version_is_rejected() {
    let store: MemoryStore<WorkflowRun> = MemoryStore::new();
    let mut run = run_with_steps(1);
    run.set_version(3);
    assert_eq!(
        EntityStore::save(&store, &mut run).await.unwrap_err().code(),
        "optimistic_lock"
    );
}

#[tokio::test]
async fn repository_view_filters_by_status_oldest_first() {
    let store: MemoryStore<WorkflowRun> = MemoryStore::new();
    let mut older = run_with_steps(1);
    let mut newer = run_with_steps(1);
    let mut idle = run_with_steps(1);
    older.start().unwrap();
    newer.start().unwrap();
    for run in [&mut newer, &mut idle, &mut older] {
        WorkflowRunRepository::save(&store, run).await.unwrap();
    }

    let running = store.find_by_status(RunStatus::Running).await.unwrap();
    let ids: Vec<_> = running.iter().map(WorkflowRun::id).collect();

    assert_eq!(ids, vec![older.id(), newer.id()]);
    assert!(store.exists(idle.id()).await.unwrap());
    assert!(WorkflowRunRepository::delete(&store, idle.id()).await.unwrap());
    assert!(!store.exists(idle.id()).await.unwrap());
}

#[tokio::test]
async fn failed_unit_puts_back_removed_and_drops_created_entities() {
    let store = Arc::new(MemoryStore::<WorkflowRun>::new());
    let uow = SnapshotUnitOfWork::new(vec![store.clone() as Arc<dyn Snapshotable>]);
    let mut kept = run_with_steps(1);
    EntityStore::save(store.as_ref(), &mut kept).await.unwrap();

    let result: WorkflowResult<()> = run_in_unit_of_work(&uow, async {
        let mut added = run_with_steps(1);
        EntityStore::save(store.as_ref(), &mut added).await?;
        EntityStore::remove(store.as_ref(), &kept.id()).await?;
        Err(WorkflowError::infra("test", "boom"))
    })
    .await;

    assert!(result.is_err());
    let all = EntityStore::list(store.as_ref()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id(), kept.id());
    assert_eq!(all[0].status(), RunStatus::Initialized);
    assert_eq!(all[0].version(), 1);
}
