use super::*;
use crate::domain::RunEvent;
use crate::testing::test_app;

#[tokio::test]
async fn running_runs_are_paused_on_startup() {
    let app = test_app();
    let orphan = app.started_run(1).await;
    let idle = app.create_run(1).await;
    let paused = app.started_run(1).await;
    app.engine.lifecycle.pause(paused.id()).await.unwrap();

    let recovered = app.engine.recovery.recover_orphans().await.unwrap();

    assert_eq!(recovered, vec![orphan.id()]);
    let stored = app.stored_run(orphan.id()).await;
    assert_eq!(stored.status(), RunStatus::Paused);
    assert!(!stored.can_pause());
    assert_eq!(app.stored_run(idle.id()).await.status(), RunStatus::Initialized);
    assert!(app.published().iter().any(|e| matches!(
        e,
        RunEvent::RunPaused { run_id, .. } if *run_id == orphan.id()
    )));
}

#[tokio::test]
async fn sweep_is_idempotent() {
    let app = test_app();
    let run = app.started_run(1).await;

    app.engine.recovery.recover_orphans().await.unwrap();
    let again = app.engine.recovery.recover_orphans().await.unwrap();

    assert!(again.is_empty());
    assert_eq!(app.stored_run(run.id()).await.status(), RunStatus::Paused);
}

#[tokio::test]
async fn recovered_run_resumes_at_its_step() {
    let app = test_app();
    let run = app.started_run(2).await;
    let first = app.start_step(run.id()).await;
    app.finish_step(run.id(), &first).await;

    app.engine.recovery.recover_orphans().await.unwrap();
    let resumed = app.engine.lifecycle.resume(run.id()).await.unwrap();

    assert_eq!(resumed.status(), RunStatus::Running);
    assert_eq!(resumed.current_work_index(), 1);
}
