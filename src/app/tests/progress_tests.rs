use super::*;
use crate::domain::{ReportStatus, SymLinkKind, TaskOutcome};
use crate::testing::{new_run, node, test_app};
use std::time::Duration;

#[tokio::test]
async fn started_step_creates_execution_space_and_checkpoint() {
    let app = test_app();
    let run = app.started_run(2).await;

    let execution = app.start_step(run.id()).await;

    let repos = &app.engine.ctx.repos;
    let stored = app.stored_run(run.id()).await;
    assert_eq!(stored.work_execution_ids(), &[execution.id()]);
    assert_eq!(execution.work_node_sequence(), 0);
    assert_eq!(execution.tasks().len(), 2);

    let reports = repos.reports.find_by_workflow_run_id(run.id()).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status(), ReportStatus::Pending);
    assert_eq!(Some(reports[0].id()), execution.tasks()[1].report_id());

    let space = repos.spaces.get_for_run(run.id()).await.unwrap();
    let work_space = space.work_space_for(execution.id()).unwrap();
    let tree_link = work_space
        .links
        .iter()
        .find(|l| l.kind == SymLinkKind::WorkTree)
        .unwrap();
    assert_eq!(tree_link.target, app.tree_path(run.id(), "g1"));
    assert_eq!(
        app.mem.fs.link_target(&tree_link.link),
        Some(tree_link.target.clone())
    );
    assert_eq!(
        app.mem.fs.link_target(&work_space.path.join("reports")),
        Some(space.reports_dir())
    );

    let checkpoints = repos.checkpoints.find_by_workflow_run_id(run.id()).await.unwrap();
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(checkpoints[0].work_sequence(), 0);

    let published = app.published();
    let created = published
        .iter()
        .position(|e| matches!(e, RunEvent::CheckpointCreated { .. }))
        .unwrap();
    let recorded = published
        .iter()
        .position(|e| matches!(e, RunEvent::WorkExecutionRecorded { .. }))
        .unwrap();
    assert!(created < recorded);
}

#[tokio::test]
async fn start_rejects_other_step_and_idle_run() {
    let app = test_app();
    let run = app.started_run(2).await;

    let err = app
        .engine
        .progress
        .start_work_execution(run.id(), 1)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_execution_transition");

    app.engine.lifecycle.pause(run.id()).await.unwrap();
    let err = app
        .engine
        .progress
        .start_work_execution(run.id(), 0)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_state_transition");

    let executions = app
        .engine
        .ctx
        .repos
        .executions
        .find_by_workflow_run_id(run.id())
        .await
        .unwrap();
    assert!(executions.is_empty());
}

#[tokio::test]
async fn awaiting_input_until_query_answered() {
    let app = test_app();
    let run = app.started_run(1).await;
    let execution = app.start_step(run.id()).await;
    let task = execution.tasks()[0].id();

    app.engine
        .progress
        .handle(PipelineEvent::TaskAwaitingInput {
            run_id: run.id(),
            work_execution_id: execution.id(),
            task_execution_id: task,
        })
        .await
        .unwrap();
    assert_eq!(app.stored_run(run.id()).await.status(), RunStatus::Awaiting);

    app.engine
        .progress
        .handle(PipelineEvent::QueryResponded {
            run_id: run.id(),
            work_execution_id: execution.id(),
            task_execution_id: task,
        })
        .await
        .unwrap();

    assert_eq!(app.stored_run(run.id()).await.status(), RunStatus::Running);
    let stored = app.engine.ctx.repos.executions.get(execution.id()).await.unwrap();
    assert_eq!(stored.tasks()[0].outcome(), Some(&TaskOutcome::Completed));
    assert_eq!(stored.current_task_index(), 1);
}

#[tokio::test]
async fn failed_task_is_recorded() {
    let app = test_app();
    let run = app.started_run(1).await;
    let execution = app.start_step(run.id()).await;

    app.engine
        .progress
        .handle(PipelineEvent::TaskFailed {
            run_id: run.id(),
            work_execution_id: execution.id(),
            task_execution_id: execution.tasks()[0].id(),
            reason: "agent exited".to_string(),
        })
        .await
        .unwrap();

    let stored = app.engine.ctx.repos.executions.get(execution.id()).await.unwrap();
    assert_eq!(
        stored.tasks()[0].outcome(),
        Some(&TaskOutcome::Failed("agent exited".to_string()))
    );
}

#[tokio::test]
async fn finishing_steps_pauses_then_completes() {
    let app = test_app();
    let created = app
        .engine
        .create_run
        .create(new_run(vec![node(&["g1"], true), node(&["g1"], false)]))
        .await
        .unwrap();
    app.engine.lifecycle.start(created.id()).await.unwrap();

    let first = app.start_step(created.id()).await;
    app.finish_step(created.id(), &first).await;
    let paused = app.stored_run(created.id()).await;
    assert_eq!(paused.status(), RunStatus::Paused);
    assert_eq!(paused.current_work_index(), 1);

    app.engine.lifecycle.resume(created.id()).await.unwrap();
    let second = app.start_step(created.id()).await;
    app.finish_step(created.id(), &second).await;

    let done = app.stored_run(created.id()).await;
    assert_eq!(done.status(), RunStatus::Completed);
    assert_eq!(done.current_work_index(), 2);
    let stored = app.engine.ctx.repos.executions.get(second.id()).await.unwrap();
    assert!(stored.is_completed());
}

#[tokio::test]
async fn completing_a_stale_execution_is_rejected() {
    let app = test_app();
    let run = app.started_run(2).await;
    let first = app.start_step(run.id()).await;
    app.finish_step(run.id(), &first).await;

    let err = app
        .engine
        .progress
        .handle(PipelineEvent::WorkExecutionCompleted {
            run_id: run.id(),
            work_execution_id: first.id(),
        })
        .await
        .unwrap_err();

    assert_eq!(err.code(), "invalid_execution_transition");
    assert_eq!(app.stored_run(run.id()).await.current_work_index(), 1);
}

#[tokio::test]
async fn report_events_update_reports() {
    let app = test_app();
    let run = app.started_run(1).await;
    let execution = app.start_step(run.id()).await;
    let report_id = execution.tasks()[1].report_id().unwrap();

    app.engine
        .progress
        .handle(PipelineEvent::ReportCompleted {
            report_id,
            file_path: None,
            content: Some("# Findings".to_string()),
        })
        .await
        .unwrap();
    let report = app.engine.ctx.repos.reports.get(report_id).await.unwrap();
    assert_eq!(report.status(), ReportStatus::Completed);

    let err = app
        .engine
        .progress
        .handle(PipelineEvent::ReportFailed {
            report_id,
            reason: "late".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_execution_transition");
}

#[tokio::test]
async fn router_routes_pipeline_events_and_survives_rejections() {
    let app = test_app();
    let run = app.started_run(2).await;
    let router = app.engine.router(None);
    let handle = tokio::spawn(router.run());

    let events = app.engine.ctx.events.clone();
    events
        .publish(RunEvent::Pipeline(PipelineEvent::WorkExecutionStarted {
            run_id: run.id(),
            sequence: 7,
        }))
        .await
        .unwrap();
    events
        .publish(RunEvent::Pipeline(PipelineEvent::WorkExecutionStarted {
            run_id: run.id(),
            sequence: 0,
        }))
        .await
        .unwrap();

    let recorded = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if !app.stored_run(run.id()).await.work_execution_ids().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    handle.abort();

    assert!(recorded.is_ok(), "router never handled the valid event");
}
