use super::*;
use crate::domain::{ReportStatus, RunEvent, TaskOutcome, WorkExecution};
use crate::testing::{new_run, node, test_app};

#[tokio::test]
async fn start_provisions_one_work_tree_per_ref() {
    let app = test_app();
    let created = app
        .engine
        .create_run
        .create(new_run(vec![node(&["g1", "g2"], false), node(&["g1"], false)]))
        .await
        .unwrap();

    let run = app.engine.lifecycle.start(created.id()).await.unwrap();

    assert_eq!(run.status(), RunStatus::Running);
    let trees = app
        .engine
        .ctx
        .repos
        .work_trees
        .find_by_workflow_run_id(run.id())
        .await
        .unwrap();
    assert_eq!(trees.len(), 2);
    assert_eq!(trees[0].base_branch(), "main");
    let mut on_disk = app.mem.git.worktrees();
    on_disk.sort();
    let mut expected = vec![app.tree_path(run.id(), "g1"), app.tree_path(run.id(), "g2")];
    expected.sort();
    assert_eq!(on_disk, expected);
    assert!(app
        .published()
        .iter()
        .any(|e| matches!(e, RunEvent::RunStarted { run_id } if *run_id == run.id())));
}

#[tokio::test]
async fn failed_provisioning_removes_created_trees() {
    let app = test_app();
    let created = app
        .engine
        .create_run
        .create(new_run(vec![node(&["g1", "g2"], false)]))
        .await
        .unwrap();
    app.mem.git.fail_creates_for(&GitId::from("g2")).unwrap();

    let err = app.engine.lifecycle.start(created.id()).await.unwrap_err();

    assert_eq!(err.code(), "infrastructure");
    assert!(app.mem.git.worktrees().is_empty());
    let stored = app.stored_run(created.id()).await;
    assert_eq!(stored.status(), RunStatus::Initialized);
    let trees = app
        .engine
        .ctx
        .repos
        .work_trees
        .find_by_workflow_run_id(created.id())
        .await
        .unwrap();
    assert!(trees.is_empty());
}

#[tokio::test]
async fn pause_resume_and_illegal_edges() {
    let app = test_app();
    let run = app.started_run(1).await;

    let paused = app.engine.lifecycle.pause(run.id()).await.unwrap();
    assert_eq!(paused.status(), RunStatus::Paused);
    assert!(!paused.can_pause());

    let err = app.engine.lifecycle.pause(run.id()).await.unwrap_err();
    assert_eq!(err.code(), "invalid_state_transition");

    let resumed = app.engine.lifecycle.resume(run.id()).await.unwrap();
    assert_eq!(resumed.status(), RunStatus::Running);
    assert_eq!(app.stored_run(run.id()).await.version(), resumed.version());
}

#[tokio::test]
async fn cancel_cancels_open_executions() {
    let app = test_app();
    let run = app.started_run(2).await;
    let execution = app.start_step(run.id()).await;

    let cancelled = app.engine.lifecycle.cancel(run.id(), "operator").await.unwrap();

    assert_eq!(cancelled.status(), RunStatus::Cancelled);
    assert_eq!(cancelled.cancellation_reason(), Some("operator"));
    assert_eq!(cancelled.cancelled_at_work_index(), Some(0));
    let stored: WorkExecution = app
        .engine
        .ctx
        .repos
        .executions
        .get(execution.id())
        .await
        .unwrap();
    assert!(stored.is_cancelled());
    assert!(stored
        .tasks()
        .iter()
        .all(|t| t.outcome() == Some(&TaskOutcome::Cancelled)));

    let err = app.engine.lifecycle.resume(run.id()).await.unwrap_err();
    assert_eq!(err.code(), "invalid_state_transition");
}

#[tokio::test]
async fn add_and_remove_work_nodes() {
    let app = test_app();
    let run = app.started_run(2).await;
    let first = app.start_step(run.id()).await;
    app.finish_step(run.id(), &first).await;

    let sequence = app
        .engine
        .lifecycle
        .add_work_node(run.id(), node(&["g1"], false))
        .await
        .unwrap();
    assert_eq!(sequence, 2);

    let err = app
        .engine
        .lifecycle
        .remove_work_node(run.id(), 1)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "work_node_locked");

    let removed = app
        .engine
        .lifecycle
        .remove_work_node(run.id(), 2)
        .await
        .unwrap();
    assert_eq!(removed.sequence(), 2);
    assert_eq!(app.stored_run(run.id()).await.work_node_configs().len(), 2);
}

#[tokio::test]
async fn rewind_reopens_tasks_and_reports() {
    let app = test_app();
    let run = app.started_run(1).await;
    let execution = app.start_step(run.id()).await;
    let report_id = execution.tasks()[1].report_id().unwrap();
    app.engine
        .progress
        .handle(crate::domain::PipelineEvent::ReportCompleted {
            report_id,
            file_path: None,
            content: Some("draft".to_string()),
        })
        .await
        .unwrap();
    for task in execution.tasks() {
        app.engine
            .progress
            .handle(crate::domain::PipelineEvent::QueryResponded {
                run_id: run.id(),
                work_execution_id: execution.id(),
                task_execution_id: task.id(),
            })
            .await
            .unwrap();
    }

    let rewound = app
        .engine
        .lifecycle
        .rewind_work_execution(run.id(), execution.id(), 1)
        .await
        .unwrap();

    assert_eq!(rewound.current_task_index(), 1);
    assert!(rewound.tasks()[0].is_terminal());
    assert!(!rewound.tasks()[1].is_terminal());
    let report = app.engine.ctx.repos.reports.get(report_id).await.unwrap();
    assert_eq!(report.status(), ReportStatus::Pending);
    assert!(report.content().is_none());
}

#[tokio::test]
async fn delete_removes_records_trees_and_directory() {
    let app = test_app();
    let run = app.started_run(2).await;
    let execution = app.start_step(run.id()).await;
    app.engine.lifecycle.pause(run.id()).await.unwrap();
    let root = app
        .engine
        .ctx
        .repos
        .spaces
        .get_for_run(run.id())
        .await
        .unwrap()
        .root()
        .to_path_buf();

    app.engine.lifecycle.delete_run(run.id()).await.unwrap();

    let repos = &app.engine.ctx.repos;
    assert!(!repos.runs.exists(run.id()).await.unwrap());
    assert!(repos.executions.find_by_id(execution.id()).await.unwrap().is_none());
    assert!(repos.reports.find_by_workflow_run_id(run.id()).await.unwrap().is_empty());
    assert!(repos.checkpoints.find_by_workflow_run_id(run.id()).await.unwrap().is_empty());
    assert!(repos.work_trees.find_by_workflow_run_id(run.id()).await.unwrap().is_empty());
    assert!(repos.spaces.find_by_workflow_run_id(run.id()).await.unwrap().is_none());
    assert!(app.mem.git.worktrees().is_empty());
    assert!(app.mem.fs.paths().iter().all(|p| !p.starts_with(&root)));
    assert!(app
        .published()
        .iter()
        .any(|e| matches!(e, RunEvent::RunDeleted { .. })));
}

#[tokio::test]
async fn delete_refuses_active_runs() {
    let app = test_app();
    let run = app.started_run(1).await;

    let err = app.engine.lifecycle.delete_run(run.id()).await.unwrap_err();

    assert_eq!(err.code(), "invalid_state_transition");
    assert!(app.engine.ctx.repos.runs.exists(run.id()).await.unwrap());
}

#[tokio::test]
async fn failed_unit_on_one_run_keeps_a_concurrent_pause_of_another() {
    let app = test_app();
    let a = app.started_run(1).await;
    let b = app.started_run(1).await;
    let ctx = &app.engine.ctx;

    let failed_unit = run_in_unit_of_work(ctx.uow.as_ref(), async {
        let mut run = ctx.repos.runs.get(a.id()).await?;
        run.pause()?;
        ctx.repos.runs.save(&mut run).await?;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        Err::<(), _>(WorkflowError::infra("test", "boom"))
    });
    let pause_other = async {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        app.engine.lifecycle.pause(b.id()).await
    };
    let (failed, paused) = tokio::join!(failed_unit, pause_other);

    assert!(failed.is_err());
    assert_eq!(paused.unwrap().status(), RunStatus::Paused);
    assert_eq!(app.stored_run(a.id()).await.status(), RunStatus::Running);
    assert_eq!(app.stored_run(b.id()).await.status(), RunStatus::Paused);
}
