//! Consumes the progress the pipeline driver reports.
//!
//! The driver runs steps and tasks; this side keeps the run, its executions
//! and reports in step with what the driver says happened. Step boundaries
//! are where checkpoints are taken.

use crate::app::checkpoint::{build_checkpoint, created_event};
use crate::app::compensation::CompensationStack;
use crate::app::AppContext;
use crate::domain::{
    BuiltWorkExecution, PipelineEvent, ReportId, RunEvent, RunStatus, TaskExecutionId,
    WorkExecution, WorkExecutionFactory, WorkExecutionId, WorkSpace, WorkflowError,
    WorkflowResult, WorkflowRun, WorkflowRunId,
};
use crate::ports::{run_in_unit_of_work, EventPublisher};
use crate::structured_logger::StructuredLogger;
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub struct ProgressService {
    ctx: AppContext,
}

impl ProgressService {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub async fn handle(&self, event: PipelineEvent) -> WorkflowResult<()> {
        debug!(?event, "pipeline event");
        let retry = &self.ctx.retry;
        match &event {
            PipelineEvent::WorkExecutionStarted { run_id, sequence } => {
                retry
                    .run("start work execution", || {
                        self.start_work_execution(*run_id, *sequence)
                    })
                    .await
                    .map(drop)
            }
            PipelineEvent::TaskAwaitingInput {
                run_id,
                work_execution_id,
                ..
            } => {
                retry
                    .run("await input", || {
                        self.await_input(*run_id, *work_execution_id)
                    })
                    .await
            }
            PipelineEvent::QueryResponded {
                run_id,
                work_execution_id,
                task_execution_id,
            } => {
                retry
                    .run("query responded", || {
                        self.query_responded(*run_id, *work_execution_id, *task_execution_id)
                    })
                    .await
            }
            PipelineEvent::TaskFailed {
                run_id,
                work_execution_id,
                task_execution_id,
                reason,
            } => {
                retry
                    .run("task failed", || {
                        self.task_failed(*run_id, *work_execution_id, *task_execution_id, reason)
                    })
                    .await
            }
            PipelineEvent::WorkExecutionCompleted {
                run_id,
                work_execution_id,
            } => {
                retry
                    .run("complete work execution", || {
                        self.complete_work_execution(*run_id, *work_execution_id)
                    })
                    .await
            }
            PipelineEvent::ReportCompleted {
                report_id,
                file_path,
                content,
            } => {
                retry
                    .run("report completed", || {
                        self.update_report(*report_id, ReportUpdate::Completed(file_path, content))
                    })
                    .await
            }
            PipelineEvent::ReportFailed { report_id, reason } => {
                retry
                    .run("report failed", || {
                        self.update_report(*report_id, ReportUpdate::Failed(reason))
                    })
                    .await
            }
        }
    }

    /// Creates the execution for the step at the run's current index.
    pub async fn start_work_execution(
        &self,
        run_id: WorkflowRunId,
        sequence: u32,
    ) -> WorkflowResult<WorkExecution> {
        let repos = &self.ctx.repos;
        let mut run = repos.runs.get(run_id).await?;
        if run.status() != RunStatus::Running {
            return Err(WorkflowError::InvalidStateTransition {
                from: run.status(),
                to: RunStatus::Running,
            });
        }
        let config = run
            .current_work_node()
            .cloned()
            .ok_or_else(|| WorkflowError::not_found("work node", run.current_work_index()))?;
        if config.sequence() != sequence {
            return Err(WorkflowError::InvalidExecutionTransition {
                message: format!(
                    "step {} is not current; step {} is",
                    sequence,
                    config.sequence()
                ),
            });
        }

        // A step that restarts right after a restore was already captured.
        let mut checkpoint = if run.take_restored_marker() {
            None
        } else {
            Some(build_checkpoint(&self.ctx, &run).await?)
        };

        let BuiltWorkExecution {
            mut execution,
            mut reports,
        } = WorkExecutionFactory::build(&run, &config)?;

        let trees: Vec<_> = repos
            .work_trees
            .find_by_workflow_run_id(run_id)
            .await?
            .into_iter()
            .filter(|t| config.git_refs().iter().any(|r| &r.git_id == t.git_id()))
            .collect();
        let mut space = repos.spaces.get_for_run(run_id).await?;
        let work_space = space.add_work_space(&execution, &trees)?.clone();

        let mut undo = CompensationStack::new();
        if let Err(err) = self.materialize(&work_space, &mut undo).await {
            undo.unwind().await;
            return Err(err);
        }

        let persisted = run_in_unit_of_work(self.ctx.uow.as_ref(), async {
            if let Some(checkpoint) = checkpoint.as_mut() {
                repos.checkpoints.save(checkpoint).await?;
            }
            repos.executions.save(&mut execution).await?;
            for report in reports.iter_mut() {
                repos.reports.save(report).await?;
            }
            repos.spaces.save(&mut space).await?;
            run.record_work_execution(execution.id())?;
            repos.runs.save(&mut run).await
        })
        .await;
        if let Err(err) = persisted {
            undo.unwind().await;
            return Err(err);
        }
        undo.clear();

        info!(
            run_id = %run_id,
            sequence,
            work_execution_id = %execution.id(),
            "work execution started"
        );
        let mut events = Vec::new();
        if let Some(checkpoint) = &checkpoint {
            events.push(created_event(checkpoint));
        }
        events.extend(run.take_events());
        self.ctx.publish(events).await?;
        Ok(execution)
    }

    /// Creates the work space directory and its links.
    async fn materialize(
        &self,
        work_space: &WorkSpace,
        undo: &mut CompensationStack,
    ) -> WorkflowResult<()> {
        let fs = self.ctx.fs.clone();
        fs.create_dir_all(&work_space.path).await?;
        let dir = work_space.path.clone();
        undo.push(format!("remove {}", dir.display()), move || {
            async move { fs.remove_dir_all(&dir).await }.boxed()
        });
        for link in &work_space.links {
            self.ctx.fs.create_symlink(&link.target, &link.link).await?;
        }
        Ok(())
    }

    async fn await_input(
        &self,
        run_id: WorkflowRunId,
        work_execution_id: WorkExecutionId,
    ) -> WorkflowResult<()> {
        let mut run = self.ctx.repos.runs.get(run_id).await?;
        ensure_current_execution(&run, work_execution_id)?;
        run.await_input()?;
        self.ctx.repos.runs.save(&mut run).await?;
        self.ctx.publish(run.take_events()).await
    }

    async fn query_responded(
        &self,
        run_id: WorkflowRunId,
        work_execution_id: WorkExecutionId,
        task_execution_id: TaskExecutionId,
    ) -> WorkflowResult<()> {
        let repos = &self.ctx.repos;
        let mut run = repos.runs.get(run_id).await?;
        let mut execution = load_execution(&self.ctx, run_id, work_execution_id).await?;
        execution.complete_task(task_execution_id)?;
        if run.status() == RunStatus::Awaiting {
            run.answer_query()?;
        }

        run_in_unit_of_work(self.ctx.uow.as_ref(), async {
            repos.executions.save(&mut execution).await?;
            if !run.pending_events().is_empty() {
                repos.runs.save(&mut run).await?;
            }
            Ok(())
        })
        .await?;
        self.ctx.publish(run.take_events()).await
    }

    async fn task_failed(
        &self,
        run_id: WorkflowRunId,
        work_execution_id: WorkExecutionId,
        task_execution_id: TaskExecutionId,
        reason: &str,
    ) -> WorkflowResult<()> {
        let mut execution = load_execution(&self.ctx, run_id, work_execution_id).await?;
        execution.fail_task(task_execution_id, reason)?;
        self.ctx.repos.executions.save(&mut execution).await?;
        warn!(
            run_id = %run_id,
            work_execution_id = %work_execution_id,
            task_execution_id = %task_execution_id,
            reason,
            "task failed"
        );
        Ok(())
    }

    async fn complete_work_execution(
        &self,
        run_id: WorkflowRunId,
        work_execution_id: WorkExecutionId,
    ) -> WorkflowResult<()> {
        let repos = &self.ctx.repos;
        let mut run = repos.runs.get(run_id).await?;
        ensure_current_execution(&run, work_execution_id)?;
        let mut execution = load_execution(&self.ctx, run_id, work_execution_id).await?;
        execution.mark_completed()?;
        run.advance_work()?;

        run_in_unit_of_work(self.ctx.uow.as_ref(), async {
            repos.executions.save(&mut execution).await?;
            repos.runs.save(&mut run).await
        })
        .await?;
        info!(
            run_id = %run_id,
            work_execution_id = %work_execution_id,
            status = %run.status(),
            "work execution completed"
        );
        self.ctx.publish(run.take_events()).await
    }

    async fn update_report(&self, report_id: ReportId, update: ReportUpdate<'_>) -> WorkflowResult<()> {
        let mut report = self.ctx.repos.reports.get(report_id).await?;
        match update {
            ReportUpdate::Completed(file_path, content) => {
                report.complete(file_path.clone(), content.clone())?
            }
            ReportUpdate::Failed(reason) => report.fail(reason.as_str())?,
        }
        self.ctx.repos.reports.save(&mut report).await
    }
}

enum ReportUpdate<'a> {
    Completed(&'a Option<String>, &'a Option<String>),
    Failed(&'a String),
}

async fn load_execution(
    ctx: &AppContext,
    run_id: WorkflowRunId,
    work_execution_id: WorkExecutionId,
) -> WorkflowResult<WorkExecution> {
    let execution = ctx.repos.executions.get(work_execution_id).await?;
    if execution.workflow_run_id() != run_id {
        return Err(WorkflowError::not_found("work execution", work_execution_id));
    }
    Ok(execution)
}

/// Fails unless `work_execution_id` is the execution of the run's current step.
fn ensure_current_execution(
    run: &WorkflowRun,
    work_execution_id: WorkExecutionId,
) -> WorkflowResult<()> {
    match run.work_execution_ids().get(run.current_work_index()) {
        Some(id) if *id == work_execution_id => Ok(()),
        _ => Err(WorkflowError::InvalidExecutionTransition {
            message: format!(
                "work execution {} is not running for step {}",
                work_execution_id,
                run.current_work_index()
            ),
        }),
    }
}

/// Feeds pipeline events from the bus into a [`ProgressService`].
pub struct PipelineEventRouter {
    service: Arc<ProgressService>,
    receiver: broadcast::Receiver<RunEvent>,
    journal: Option<Arc<StructuredLogger>>,
}

impl PipelineEventRouter {
    /// Subscribes immediately; events published before this call are missed.
    pub fn new(
        service: Arc<ProgressService>,
        events: &dyn EventPublisher,
        journal: Option<Arc<StructuredLogger>>,
    ) -> Self {
        Self {
            service,
            receiver: events.subscribe(),
            journal,
        }
    }

    /// Routes until the bus closes. A failing event is logged and skipped.
    pub async fn run(mut self) {
        loop {
            match self.receiver.recv().await {
                Ok(RunEvent::Pipeline(event)) => {
                    if let Err(err) = self.service.handle(event.clone()).await {
                        warn!(?event, error = %err, code = err.code(), "pipeline event rejected");
                        if let Some(journal) = &self.journal {
                            journal.log_rejected_pipeline_event(&event, &err.to_string());
                        }
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "pipeline router lagged behind the event bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("pipeline router stopped");
    }
}

#[cfg(test)]
#[path = "tests/progress_tests.rs"]
mod tests;
