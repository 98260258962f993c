use crate::domain::{
    CheckpointId, CommitHash, GitId, RunEvent, RunStatus, WorkExecution, WorkExecutionId,
};
use crate::testing::test_app;

fn hash(c: char) -> CommitHash {
    CommitHash::parse(&c.to_string().repeat(40)).unwrap()
}

#[tokio::test]
async fn capture_then_restore_round_trips_position() {
    let app = test_app();
    let run = app.started_run(2).await;
    let first = app.start_step(run.id()).await;
    app.finish_step(run.id(), &first).await;

    let checkpoint = app.engine.checkpoints.capture(run.id()).await.unwrap();
    let restored = app
        .engine
        .checkpoints
        .restore(run.id(), checkpoint.id())
        .await
        .unwrap();

    assert_eq!(checkpoint.work_sequence(), 1);
    assert_eq!(checkpoint.work_execution_id(), Some(first.id()));
    assert_eq!(restored.current_work_index(), 1);
    assert_eq!(restored.work_execution_ids(), &[first.id()]);
    assert!(restored.restored_to_checkpoint());
    assert_eq!(restored.status(), RunStatus::Paused);
    assert_eq!(app.stored_run(run.id()).await.version(), restored.version());
}

#[tokio::test]
async fn capture_is_refused_while_a_step_is_in_progress() {
    let app = test_app();
    let run = app.started_run(2).await;
    let e0 = app.start_step(run.id()).await;
    let repos = &app.engine.ctx.repos;
    let before = repos.checkpoints.find_by_workflow_run_id(run.id()).await.unwrap().len();

    let err = app.engine.checkpoints.capture(run.id()).await.unwrap_err();

    assert_eq!(err.code(), "checkpoint_invalid");
    let after = repos.checkpoints.find_by_workflow_run_id(run.id()).await.unwrap().len();
    assert_eq!(after, before);

    app.finish_step(run.id(), &e0).await;
    let checkpoint = app.engine.checkpoints.capture(run.id()).await.unwrap();
    assert_eq!(checkpoint.work_sequence(), 1);
}

#[tokio::test]
async fn restore_resets_work_tree_to_captured_commit() {
    let app = test_app();
    let run = app.started_run(1).await;
    let tree = app.tree_path(run.id(), "g1");
    app.mem.git.set_commit(&tree, hash('a')).unwrap();

    let checkpoint = app.engine.checkpoints.capture(run.id()).await.unwrap();
    app.mem.git.set_commit(&tree, hash('b')).unwrap();
    app.engine
        .checkpoints
        .restore(run.id(), checkpoint.id())
        .await
        .unwrap();

    assert_eq!(checkpoint.commit_hashes()[&GitId::from("g1")], hash('a'));
    let head = app.engine.ctx.git.current_commit(&tree).await.unwrap();
    assert_eq!(head, hash('a'));
}

#[tokio::test]
async fn restore_drops_executions_from_checkpoint_step_on() {
    let app = test_app();
    let run = app.started_run(3).await;
    let e0 = app.start_step(run.id()).await;
    app.finish_step(run.id(), &e0).await;
    let e1 = app.start_step(run.id()).await;
    app.finish_step(run.id(), &e1).await;
    let e2 = app.start_step(run.id()).await;

    let repos = &app.engine.ctx.repos;
    let checkpoints = repos.checkpoints.find_by_workflow_run_id(run.id()).await.unwrap();
    assert_eq!(checkpoints.len(), 3);
    let at_step_one = checkpoints
        .iter()
        .find(|c| c.work_sequence() == 1)
        .unwrap()
        .id();

    let restored = app
        .engine
        .checkpoints
        .restore(run.id(), at_step_one)
        .await
        .unwrap();

    let remaining: Vec<WorkExecutionId> = repos
        .executions
        .find_by_workflow_run_id(run.id())
        .await
        .unwrap()
        .iter()
        .map(WorkExecution::id)
        .collect();
    assert_eq!(remaining, vec![e0.id()]);
    assert_eq!(restored.work_execution_ids(), &[e0.id()]);
    assert_eq!(restored.current_work_index(), 1);

    let reports = repos.reports.find_by_workflow_run_id(run.id()).await.unwrap();
    assert!(reports.iter().all(|r| r.work_execution_id() == e0.id()));
    let space = repos.spaces.get_for_run(run.id()).await.unwrap();
    assert!(space.work_space_for(e1.id()).is_none());
    assert!(space.work_space_for(e2.id()).is_none());
    assert!(space.work_space_for(e0.id()).is_some());

    assert!(app.published().iter().any(|e| matches!(
        e,
        RunEvent::CheckpointRestored { checkpoint_id, work_sequence: 1, .. } if *checkpoint_id == at_step_one
    )));
}

#[tokio::test]
async fn restarted_step_after_restore_is_not_captured_twice() {
    let app = test_app();
    let run = app.started_run(2).await;
    let e0 = app.start_step(run.id()).await;
    app.finish_step(run.id(), &e0).await;
    let _e1 = app.start_step(run.id()).await;
    let repos = &app.engine.ctx.repos;
    let latest = repos.checkpoints.find_latest(run.id()).await.unwrap().unwrap();

    app.engine.checkpoints.restore(run.id(), latest.id()).await.unwrap();
    app.engine.lifecycle.resume(run.id()).await.unwrap();
    let again = app.start_step(run.id()).await;

    let count = repos.checkpoints.find_by_workflow_run_id(run.id()).await.unwrap().len();
    assert_eq!(count, 2);
    let stored = app.stored_run(run.id()).await;
    assert!(!stored.restored_to_checkpoint());
    assert_eq!(stored.work_execution_ids(), &[e0.id(), again.id()]);
}

#[tokio::test]
async fn failing_git_reset_leaves_state_untouched() {
    let app = test_app();
    let run = app.started_run(2).await;
    let e0 = app.start_step(run.id()).await;
    app.finish_step(run.id(), &e0).await;
    let checkpoint = app.engine.checkpoints.capture(run.id()).await.unwrap();
    app.mem
        .git
        .fail_resets_for(&app.tree_path(run.id(), "g1"))
        .unwrap();
    let before = app.stored_run(run.id()).await;

    let err = app
        .engine
        .checkpoints
        .restore(run.id(), checkpoint.id())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "infrastructure");
    let after = app.stored_run(run.id()).await;
    assert_eq!(after.version(), before.version());
    assert_eq!(after.status(), RunStatus::Running);
    assert_eq!(after.work_execution_ids(), &[e0.id()]);
    assert!(!after.restored_to_checkpoint());
}

#[tokio::test]
async fn restore_rejects_foreign_unknown_and_terminal() {
    let app = test_app();
    let run = app.started_run(1).await;
    let other = app.started_run(1).await;
    let foreign = app.engine.checkpoints.capture(other.id()).await.unwrap();
    let own = app.engine.checkpoints.capture(run.id()).await.unwrap();

    let err = app
        .engine
        .checkpoints
        .restore(run.id(), foreign.id())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "checkpoint_invalid");

    let err = app
        .engine
        .checkpoints
        .restore(run.id(), CheckpointId::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");

    app.engine.lifecycle.cancel(run.id(), "stop").await.unwrap();
    let err = app
        .engine
        .checkpoints
        .restore(run.id(), own.id())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "checkpoint_invalid");
}

#[tokio::test]
async fn capture_skips_invalidated_refs() {
    let app = test_app();
    let run = app.started_run(1).await;
    app.engine
        .invalidation
        .git_deleted(&GitId::from("g1"))
        .await
        .unwrap();

    let checkpoint = app.engine.checkpoints.capture(run.id()).await.unwrap();

    assert!(checkpoint.commit_hashes().is_empty());
    assert_eq!(checkpoint.work_sequence(), 0);
}
