//! Use cases.
//!
//! Every service holds an [`AppContext`] and follows the same shape: load
//! the aggregates, mutate them through their methods, persist inside a unit
//! of work, then publish the events the aggregates buffered. Commands that
//! race on the same run are retried per [`RetryPolicy`].

pub mod checkpoint;
pub mod compensation;
pub mod create_run;
pub mod invalidation;
pub mod lifecycle;
pub mod progress;
pub mod queries;
pub mod recovery;
pub mod retry;

pub use checkpoint::CheckpointService;
pub use compensation::CompensationStack;
pub use create_run::CreateRunService;
pub use invalidation::InvalidationService;
pub use lifecycle::RunLifecycleService;
pub use progress::{PipelineEventRouter, ProgressService};
pub use queries::{FileNode, QueryService, RunSummary};
pub use recovery::RecoveryService;
pub use retry::RetryPolicy;

use crate::domain::{RunEvent, WorkflowResult};
use crate::ports::{
    CheckpointRepository, EventPublisher, FileSystem, GitService, ReportRepository, UnitOfWork,
    WorkExecutionRepository, WorkTreeRepository, WorkflowRunRepository, WorkflowSpaceRepository,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Repositories for every aggregate.
#[derive(Clone)]
pub struct Repositories {
    pub runs: Arc<dyn WorkflowRunRepository>,
    pub executions: Arc<dyn WorkExecutionRepository>,
    pub reports: Arc<dyn ReportRepository>,
    pub checkpoints: Arc<dyn CheckpointRepository>,
    pub work_trees: Arc<dyn WorkTreeRepository>,
    pub spaces: Arc<dyn WorkflowSpaceRepository>,
}

/// Where run directories and git work trees are placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub trees_root: PathBuf,
    pub spaces_root: PathBuf,
}

/// Ports and settings shared by every use case.
#[derive(Clone)]
pub struct AppContext {
    pub repos: Repositories,
    pub fs: Arc<dyn FileSystem>,
    pub git: Arc<dyn GitService>,
    pub events: Arc<dyn EventPublisher>,
    pub uow: Arc<dyn UnitOfWork>,
    pub layout: Layout,
    pub retry: RetryPolicy,
}

impl AppContext {
    /// Publishes events drained from aggregates after a successful save.
    pub(crate) async fn publish(&self, events: Vec<RunEvent>) -> WorkflowResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        self.events.publish_all(events).await
    }
}
