//! Per-step and per-task progress tracking.
//!
//! A [`WorkExecution`] is created from a [`WorkNodeConfig`] when the pipeline
//! driver is about to execute that step, with one [`TaskExecution`] per
//! configured task.

use crate::domain::errors::{WorkflowError, WorkflowResult};
use crate::domain::report::Report;
use crate::domain::run::WorkflowRun;
use crate::domain::types::{
    ReportId, TaskExecutionId, TimestampUtc, WorkExecutionId, WorkflowId, WorkflowRunId,
};
use crate::domain::work_config::WorkNodeConfig;
use serde::{Deserialize, Serialize};

/// Why a task stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExecution {
    id: TaskExecutionId,
    order: u32,
    query: String,
    report_id: Option<ReportId>,
    outcome: Option<TaskOutcome>,
}

impl TaskExecution {
    pub fn id(&self) -> TaskExecutionId {
        self.id
    }

    pub fn order(&self) -> u32 {
        self.order
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn report_id(&self) -> Option<ReportId> {
        self.report_id
    }

    pub fn outcome(&self) -> Option<&TaskOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    fn finish(&mut self, outcome: TaskOutcome) -> WorkflowResult<()> {
        if let Some(existing) = &self.outcome {
            return Err(WorkflowError::InvalidExecutionTransition {
                message: format!(
                    "task {} is already terminal ({:?}), cannot become {:?}",
                    self.id, existing, outcome
                ),
            });
        }
        self.outcome = Some(outcome);
        Ok(())
    }

    /// Clears the terminal state so the task can run again.
    pub fn reset(&mut self) {
        self.outcome = None;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkExecution {
    id: WorkExecutionId,
    workflow_run_id: WorkflowRunId,
    source_workflow_id: WorkflowId,
    work_node_sequence: u32,
    model: String,
    tasks: Vec<TaskExecution>,
    current_task_index: usize,
    is_completed: bool,
    is_cancelled: bool,
    created_at: TimestampUtc,
    version: u64,
}

impl WorkExecution {
    pub fn id(&self) -> WorkExecutionId {
        self.id
    }

    pub fn workflow_run_id(&self) -> WorkflowRunId {
        self.workflow_run_id
    }

    pub fn source_workflow_id(&self) -> &WorkflowId {
        &self.source_workflow_id
    }

    pub fn work_node_sequence(&self) -> u32 {
        self.work_node_sequence
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn tasks(&self) -> &[TaskExecution] {
        &self.tasks
    }

    pub fn current_task_index(&self) -> usize {
        self.current_task_index
    }

    pub fn current_task(&self) -> Option<&TaskExecution> {
        self.tasks.get(self.current_task_index)
    }

    pub fn is_completed(&self) -> bool {
        self.is_completed
    }

    pub fn is_cancelled(&self) -> bool {
        self.is_cancelled
    }

    pub fn created_at(&self) -> TimestampUtc {
        self.created_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn ensure_open(&self) -> WorkflowResult<()> {
        if self.is_completed || self.is_cancelled {
            return Err(WorkflowError::InvalidExecutionTransition {
                message: format!("work execution {} is already finished", self.id),
            });
        }
        Ok(())
    }

    fn task_mut(&mut self, task_id: TaskExecutionId) -> WorkflowResult<&mut TaskExecution> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| WorkflowError::not_found("task execution", task_id))
    }

    fn refresh_current_task(&mut self) {
        self.current_task_index = self
            .tasks
            .iter()
            .position(|t| !t.is_terminal())
            .unwrap_or(self.tasks.len());
    }

    pub fn complete_task(&mut self, task_id: TaskExecutionId) -> WorkflowResult<()> {
        self.ensure_open()?;
        self.task_mut(task_id)?.finish(TaskOutcome::Completed)?;
        self.refresh_current_task();
        Ok(())
    }

    pub fn fail_task(&mut self, task_id: TaskExecutionId, reason: impl Into<String>) -> WorkflowResult<()> {
        self.ensure_open()?;
        self.task_mut(task_id)?
            .finish(TaskOutcome::Failed(reason.into()))?;
        self.refresh_current_task();
        Ok(())
    }

    pub fn all_tasks_terminal(&self) -> bool {
        self.tasks.iter().all(TaskExecution::is_terminal)
    }

    pub fn mark_completed(&mut self) -> WorkflowResult<()> {
        self.ensure_open()?;
        self.is_completed = true;
        Ok(())
    }

    /// Cancels the execution; open tasks are cancelled with it.
    pub fn cancel(&mut self) {
        if self.is_cancelled || self.is_completed {
            return;
        }
        self.is_cancelled = true;
        for task in self.tasks.iter_mut().filter(|t| !t.is_terminal()) {
            task.outcome = Some(TaskOutcome::Cancelled);
        }
    }

    /// Resets every task from `from_task_index` on so the step can be re-run.
    pub fn rewind(&mut self, from_task_index: usize) -> WorkflowResult<()> {
        if self.is_cancelled {
            return Err(WorkflowError::InvalidExecutionTransition {
                message: format!("work execution {} is cancelled", self.id),
            });
        }
        if from_task_index >= self.tasks.len() {
            return Err(WorkflowError::not_found("task index", from_task_index));
        }
        for task in self.tasks.iter_mut().skip(from_task_index) {
            task.reset();
        }
        self.is_completed = false;
        self.refresh_current_task();
        Ok(())
    }
}

/// A freshly built execution and the pending reports its tasks will produce.
#[derive(Debug, Clone)]
pub struct BuiltWorkExecution {
    pub execution: WorkExecution,
    pub reports: Vec<Report>,
}

/// Builds work executions from step configuration. Pure: nothing is persisted.
pub struct WorkExecutionFactory;

impl WorkExecutionFactory {
    pub fn build(run: &WorkflowRun, config: &WorkNodeConfig) -> WorkflowResult<BuiltWorkExecution> {
        let execution_id = WorkExecutionId::new();
        let mut tasks = Vec::with_capacity(config.tasks().len());
        let mut reports = Vec::new();

        for task_config in config.tasks() {
            let task_id = TaskExecutionId::new();
            let report_id = match task_config.report_outline() {
                Some(outline) => {
                    let report =
                        Report::pending(task_id, execution_id, run.id(), outline.clone())?;
                    let id = report.id();
                    reports.push(report);
                    Some(id)
                }
                None => None,
            };
            tasks.push(TaskExecution {
                id: task_id,
                order: task_config.order(),
                query: task_config.query().to_string(),
                report_id,
                outcome: None,
            });
        }

        Ok(BuiltWorkExecution {
            execution: WorkExecution {
                id: execution_id,
                workflow_run_id: run.id(),
                source_workflow_id: run.source_workflow_id().clone(),
                work_node_sequence: config.sequence(),
                model: config.model().to_string(),
                tasks,
                current_task_index: 0,
                is_completed: false,
                is_cancelled: false,
                created_at: TimestampUtc::now(),
                version: 0,
            },
            reports,
        })
    }
}

#[cfg(test)]
#[path = "tests/execution_tests.rs"]
mod tests;
