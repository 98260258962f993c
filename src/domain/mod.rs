//! Domain model for workflow runs.
//!
//! # Architecture
//!
//! - **Run** (`run.rs`): the aggregate root and its status state machine
//! - **Configuration** (`work_config.rs`): immutable pipeline step configuration
//! - **Executions** (`execution.rs`, `report.rs`): per-step and per-task progress
//! - **Checkpoints** (`checkpoint.rs`): captured position and git commits
//! - **Layout** (`space.rs`): run directories, work trees and symlinks
//! - **Events** (`events.rs`): facts buffered by aggregates and published after save
//!
//! Aggregates never perform I/O and never publish; use cases in
//! [`crate::app`] persist them through the ports and drain their events.

pub mod checkpoint;
pub mod errors;
pub mod events;
pub mod execution;
pub mod ref_pool;
pub mod report;
pub mod run;
pub mod space;
pub mod types;
pub mod work_config;

pub use checkpoint::Checkpoint;
pub use errors::{WorkflowError, WorkflowResult};
pub use events::{PipelineEvent, RunEvent};
pub use execution::{
    BuiltWorkExecution, TaskExecution, TaskOutcome, WorkExecution, WorkExecutionFactory,
};
pub use ref_pool::{GitRef, McpServerRef};
pub use report::{Report, ReportStatus};
pub use run::{NewRun, RunStatus, WorkflowRun};
pub use space::{SymLink, SymLinkKind, WorkSpace, WorkTree, WorkflowSpace};
pub use types::{
    BranchName, CheckpointId, CommitHash, GitId, IssueKey, McpServerId, ReportId,
    TaskExecutionId, TimestampUtc, WorkExecutionId, WorkSpaceId, WorkTreeId, WorkflowId,
    WorkflowRunId, WorkflowSpaceId,
};
pub use work_config::{
    GitRefNodeConfig, McpServerRefNodeConfig, ReportOutline, ReportSection, TaskNodeConfig,
    WorkNodeConfig,
};
