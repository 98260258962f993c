//! Domain events.
//!
//! [`RunEvent`] covers both facts emitted by the aggregates (run started,
//! checkpoint created, ...) and the progress reports the external pipeline
//! driver publishes ([`PipelineEvent`]). Aggregates only buffer events; they
//! are published by the use case after a successful save.

use crate::domain::types::{
    CheckpointId, GitId, McpServerId, ReportId, TaskExecutionId, WorkExecutionId, WorkflowId,
    WorkflowRunId,
};
use cqrs_es::DomainEvent;
use serde::{Deserialize, Serialize};

/// Events published on the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEvent {
    RunCreated {
        run_id: WorkflowRunId,
        source_workflow_id: WorkflowId,
    },
    RunStarted {
        run_id: WorkflowRunId,
    },
    RunPaused {
        run_id: WorkflowRunId,
        at_work_index: usize,
    },
    RunResumed {
        run_id: WorkflowRunId,
    },
    RunAwaitingInput {
        run_id: WorkflowRunId,
    },
    RunCancelled {
        run_id: WorkflowRunId,
        at_work_index: usize,
        reason: String,
    },
    RunCompleted {
        run_id: WorkflowRunId,
    },
    RunDeleted {
        run_id: WorkflowRunId,
    },
    WorkNodeAdded {
        run_id: WorkflowRunId,
        sequence: u32,
    },
    WorkNodeRemoved {
        run_id: WorkflowRunId,
        sequence: u32,
    },
    WorkExecutionRecorded {
        run_id: WorkflowRunId,
        work_execution_id: WorkExecutionId,
        sequence: u32,
    },
    WorkAdvanced {
        run_id: WorkflowRunId,
        current_work_index: usize,
    },
    CheckpointCreated {
        run_id: WorkflowRunId,
        checkpoint_id: CheckpointId,
        work_sequence: usize,
    },
    CheckpointRestored {
        run_id: WorkflowRunId,
        checkpoint_id: CheckpointId,
        work_sequence: usize,
    },
    GitRefInvalidated {
        run_id: WorkflowRunId,
        git_id: GitId,
    },
    McpServerRefInvalidated {
        run_id: WorkflowRunId,
        server_id: McpServerId,
    },
    /// Progress reported by the external pipeline driver.
    Pipeline(PipelineEvent),
}

/// Progress reports from the pipeline driver, consumed by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineEvent {
    WorkExecutionStarted {
        run_id: WorkflowRunId,
        sequence: u32,
    },
    TaskAwaitingInput {
        run_id: WorkflowRunId,
        work_execution_id: WorkExecutionId,
        task_execution_id: TaskExecutionId,
    },
    QueryResponded {
        run_id: WorkflowRunId,
        work_execution_id: WorkExecutionId,
        task_execution_id: TaskExecutionId,
    },
    TaskFailed {
        run_id: WorkflowRunId,
        work_execution_id: WorkExecutionId,
        task_execution_id: TaskExecutionId,
        reason: String,
    },
    WorkExecutionCompleted {
        run_id: WorkflowRunId,
        work_execution_id: WorkExecutionId,
    },
    ReportCompleted {
        report_id: ReportId,
        file_path: Option<String>,
        content: Option<String>,
    },
    ReportFailed {
        report_id: ReportId,
        reason: String,
    },
}

impl RunEvent {
    /// The run this event concerns, when it concerns one.
    pub fn run_id(&self) -> Option<WorkflowRunId> {
        match self {
            Self::RunCreated { run_id, .. }
            | Self::RunStarted { run_id }
            | Self::RunPaused { run_id, .. }
            | Self::RunResumed { run_id }
            | Self::RunAwaitingInput { run_id }
            | Self::RunCancelled { run_id, .. }
            | Self::RunCompleted { run_id }
            | Self::RunDeleted { run_id }
            | Self::WorkNodeAdded { run_id, .. }
            | Self::WorkNodeRemoved { run_id, .. }
            | Self::WorkExecutionRecorded { run_id, .. }
            | Self::WorkAdvanced { run_id, .. }
            | Self::CheckpointCreated { run_id, .. }
            | Self::CheckpointRestored { run_id, .. }
            | Self::GitRefInvalidated { run_id, .. }
            | Self::McpServerRefInvalidated { run_id, .. } => Some(*run_id),
            Self::Pipeline(event) => event.run_id(),
        }
    }
}

impl PipelineEvent {
    pub fn run_id(&self) -> Option<WorkflowRunId> {
        match self {
            Self::WorkExecutionStarted { run_id, .. }
            | Self::TaskAwaitingInput { run_id, .. }
            | Self::QueryResponded { run_id, .. }
            | Self::TaskFailed { run_id, .. }
            | Self::WorkExecutionCompleted { run_id, .. } => Some(*run_id),
            Self::ReportCompleted { .. } | Self::ReportFailed { .. } => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::WorkExecutionStarted { .. } => "WorkExecutionStarted",
            Self::TaskAwaitingInput { .. } => "TaskAwaitingInput",
            Self::QueryResponded { .. } => "QueryResponded",
            Self::TaskFailed { .. } => "TaskFailed",
            Self::WorkExecutionCompleted { .. } => "WorkExecutionCompleted",
            Self::ReportCompleted { .. } => "ReportCompleted",
            Self::ReportFailed { .. } => "ReportFailed",
        }
    }
}

impl DomainEvent for RunEvent {
    fn event_type(&self) -> String {
        let name = match self {
            Self::RunCreated { .. } => "RunCreated",
            Self::RunStarted { .. } => "RunStarted",
            Self::RunPaused { .. } => "RunPaused",
            Self::RunResumed { .. } => "RunResumed",
            Self::RunAwaitingInput { .. } => "RunAwaitingInput",
            Self::RunCancelled { .. } => "RunCancelled",
            Self::RunCompleted { .. } => "RunCompleted",
            Self::RunDeleted { .. } => "RunDeleted",
            Self::WorkNodeAdded { .. } => "WorkNodeAdded",
            Self::WorkNodeRemoved { .. } => "WorkNodeRemoved",
            Self::WorkExecutionRecorded { .. } => "WorkExecutionRecorded",
            Self::WorkAdvanced { .. } => "WorkAdvanced",
            Self::CheckpointCreated { .. } => "CheckpointCreated",
            Self::CheckpointRestored { .. } => "CheckpointRestored",
            Self::GitRefInvalidated { .. } => "GitRefInvalidated",
            Self::McpServerRefInvalidated { .. } => "McpServerRefInvalidated",
            Self::Pipeline(event) => event.name(),
        };
        name.to_string()
    }

    fn event_version(&self) -> String {
        "1".to_string()
    }
}
