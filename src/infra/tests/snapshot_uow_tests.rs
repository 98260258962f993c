use super::*;
use crate::domain::{Checkpoint, RunStatus, WorkflowError, WorkflowRun};
use crate::infra::MemoryStore;
use crate::ports::{run_in_unit_of_work, CheckpointRepository, EntityStore, WorkflowRunRepository};
use crate::testing::run_with_steps;
use std::collections::BTreeMap;
use std::time::Duration;

struct Fixture {
    runs: Arc<MemoryStore<WorkflowRun>>,
    checkpoints: Arc<MemoryStore<Checkpoint>>,
    uow: Arc<SnapshotUnitOfWork>,
}

fn fixture() -> Fixture {
    let runs = Arc::new(MemoryStore::<WorkflowRun>::new());
    let checkpoints = Arc::new(MemoryStore::<Checkpoint>::new());
    let uow = Arc::new(SnapshotUnitOfWork::new(vec![
        runs.clone() as Arc<dyn Snapshotable>,
        checkpoints.clone() as Arc<dyn Snapshotable>,
    ]));
    Fixture {
        runs,
        checkpoints,
        uow,
    }
}

#[tokio::test]
async fn failed_block_rolls_back_every_registered_store() {
    let f = fixture();
    let mut run = run_with_steps(1);
    WorkflowRunRepository::save(f.runs.as_ref(), &mut run).await.unwrap();

    let result: WorkflowResult<()> = run_in_unit_of_work(f.uow.as_ref(), async {
        let mut started = run.clone();
        started.start()?;
        WorkflowRunRepository::save(f.runs.as_ref(), &mut started).await?;
        let mut checkpoint = Checkpoint::capture(&started, BTreeMap::new());
        CheckpointRepository::save(f.checkpoints.as_ref(), &mut checkpoint).await?;
        Err(WorkflowError::infra("test", "boom"))
    })
    .await;

    assert_eq!(result.unwrap_err().code(), "infrastructure");
    let stored = EntityStore::get(f.runs.as_ref(), &run.id()).await.unwrap().unwrap();
    assert_eq!(stored.version(), 1);
    assert!(EntityStore::list(f.checkpoints.as_ref()).await.unwrap().is_empty());
}

#[tokio::test]
async fn rollback_keeps_saves_made_by_other_tasks() {
    let f = fixture();
    let mut a = run_with_steps(1);
    let mut b = run_with_steps(1);
    WorkflowRunRepository::save(f.runs.as_ref(), &mut a).await.unwrap();
    WorkflowRunRepository::save(f.runs.as_ref(), &mut b).await.unwrap();

    let result: WorkflowResult<()> = run_in_unit_of_work(f.uow.as_ref(), async {
        let mut started = a.clone();
        started.start()?;
        WorkflowRunRepository::save(f.runs.as_ref(), &mut started).await?;
        let runs = f.runs.clone();
        let mut other = b.clone();
        tokio::spawn(async move {
            other.start()?;
            WorkflowRunRepository::save(runs.as_ref(), &mut other).await
        })
        .await
        .expect("join")?;
        Err(WorkflowError::infra("test", "boom"))
    })
    .await;

    assert!(result.is_err());
    let a = WorkflowRunRepository::get(f.runs.as_ref(), a.id()).await.unwrap();
    assert_eq!((a.status(), a.version()), (RunStatus::Initialized, 1));
    let b = WorkflowRunRepository::get(f.runs.as_ref(), b.id()).await.unwrap();
    assert_eq!((b.status(), b.version()), (RunStatus::Running, 2));
}

#[tokio::test]
async fn entity_rewritten_after_the_unit_wrote_it_is_left_alone() {
    let f = fixture();
    let mut run = run_with_steps(1);
    WorkflowRunRepository::save(f.runs.as_ref(), &mut run).await.unwrap();

    let result: WorkflowResult<()> = run_in_unit_of_work(f.uow.as_ref(), async {
        let mut started = run.clone();
        started.start()?;
        WorkflowRunRepository::save(f.runs.as_ref(), &mut started).await?;
        let runs = f.runs.clone();
        let id = run.id();
        tokio::spawn(async move {
            let mut current = WorkflowRunRepository::get(runs.as_ref(), id).await?;
            current.pause()?;
            WorkflowRunRepository::save(runs.as_ref(), &mut current).await
        })
        .await
        .expect("join")?;
        Err(WorkflowError::infra("test", "boom"))
    })
    .await;

    assert!(result.is_err());
    let stored = WorkflowRunRepository::get(f.runs.as_ref(), run.id()).await.unwrap();
    assert_eq!((stored.status(), stored.version()), (RunStatus::Paused, 3));
}

#[tokio::test]
async fn commit_forgets_pre_images() {
    let f = fixture();
    let mut run = run_with_steps(1);
    WorkflowRunRepository::save(f.runs.as_ref(), &mut run).await.unwrap();

    run_in_unit_of_work(f.uow.as_ref(), async {
        run.start()?;
        WorkflowRunRepository::save(f.runs.as_ref(), &mut run).await
    })
    .await
    .unwrap();
    let failed: WorkflowResult<()> =
        run_in_unit_of_work(f.uow.as_ref(), async { Err(WorkflowError::infra("test", "boom")) }).await;

    assert!(failed.is_err());
    let stored = WorkflowRunRepository::get(f.runs.as_ref(), run.id()).await.unwrap();
    assert_eq!(stored.status(), RunStatus::Running);
}

#[tokio::test]
async fn successful_block_commits_and_returns_value() {
    let f = fixture();
    let mut run = run_with_steps(1);

    let version = run_in_unit_of_work(f.uow.as_ref(), async {
        WorkflowRunRepository::save(f.runs.as_ref(), &mut run).await?;
        Ok(run.version())
    })
    .await
    .unwrap();

    assert_eq!(version, 1);
    assert!(f.runs.exists(run.id()).await.unwrap());
}

#[tokio::test]
async fn units_of_work_are_serialized() {
    let f = fixture();
    let tx = f.uow.begin().await.unwrap();

    let uow = f.uow.clone();
    let second = tokio::spawn(async move {
        let tx = uow.begin().await.unwrap();
        uow.commit(tx).await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!second.is_finished());

    f.uow.commit(tx).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), second)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn foreign_transaction_is_rejected() {
    let f = fixture();
    let err = f.uow.commit(Transaction::new(UnitId::next(), "nope")).await.unwrap_err();
    assert_eq!(err.code(), "infrastructure");
}
