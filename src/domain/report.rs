//! Reports produced by tasks that carry an outline.

use crate::domain::errors::{WorkflowError, WorkflowResult};
use crate::domain::types::{ReportId, TaskExecutionId, WorkExecutionId, WorkflowRunId};
use crate::domain::work_config::ReportOutline;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    id: ReportId,
    task_execution_id: TaskExecutionId,
    work_execution_id: WorkExecutionId,
    workflow_run_id: WorkflowRunId,
    outline: ReportOutline,
    status: ReportStatus,
    file_path: Option<String>,
    content: Option<String>,
    failure_reason: Option<String>,
    version: u64,
}

impl Report {
    /// Creates a pending report with a fresh id.
    pub fn pending(
        task_execution_id: TaskExecutionId,
        work_execution_id: WorkExecutionId,
        workflow_run_id: WorkflowRunId,
        outline: ReportOutline,
    ) -> WorkflowResult<Self> {
        // Re-validate: outlines can arrive through deserialization.
        let outline = ReportOutline::new(outline.sections().to_vec())?;
        Ok(Self {
            id: ReportId::new(),
            task_execution_id,
            work_execution_id,
            workflow_run_id,
            outline,
            status: ReportStatus::Pending,
            file_path: None,
            content: None,
            failure_reason: None,
            version: 0,
        })
    }

    pub fn id(&self) -> ReportId {
        self.id
    }

    pub fn task_execution_id(&self) -> TaskExecutionId {
        self.task_execution_id
    }

    pub fn work_execution_id(&self) -> WorkExecutionId {
        self.work_execution_id
    }

    pub fn workflow_run_id(&self) -> WorkflowRunId {
        self.workflow_run_id
    }

    pub fn outline(&self) -> &ReportOutline {
        &self.outline
    }

    pub fn status(&self) -> ReportStatus {
        self.status
    }

    pub fn file_path(&self) -> Option<&str> {
        self.file_path.as_deref()
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn ensure_pending(&self) -> WorkflowResult<()> {
        if self.status != ReportStatus::Pending {
            return Err(WorkflowError::InvalidExecutionTransition {
                message: format!("report {} is already {:?}", self.id, self.status),
            });
        }
        Ok(())
    }

    /// Completes the report; at least one of file path or content is required.
    pub fn complete(
        &mut self,
        file_path: Option<String>,
        content: Option<String>,
    ) -> WorkflowResult<()> {
        self.ensure_pending()?;
        let file_path = file_path.filter(|p| !p.trim().is_empty());
        if file_path.is_none() && content.is_none() {
            return Err(WorkflowError::InvalidConfig {
                message: format!("report {} completed without file or content", self.id),
            });
        }
        self.file_path = file_path;
        self.content = content;
        self.status = ReportStatus::Completed;
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> WorkflowResult<()> {
        self.ensure_pending()?;
        self.failure_reason = Some(reason.into());
        self.status = ReportStatus::Failed;
        Ok(())
    }

    /// Back to PENDING when its task is rewound.
    pub fn reopen(&mut self) {
        self.status = ReportStatus::Pending;
        self.file_path = None;
        self.content = None;
        self.failure_reason = None;
    }
}
