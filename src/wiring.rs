//! Assembles adapters into an [`Engine`].
//!
//! Two assemblies exist: [`in_memory`] for tests and dry runs, and
//! [`file_backed`] for the CLI. Both register every store with the snapshot
//! unit of work.

use crate::app::{
    AppContext, CheckpointService, CreateRunService, InvalidationService, Layout,
    PipelineEventRouter, ProgressService, QueryService, RecoveryService, Repositories,
    RetryPolicy, RunLifecycleService,
};
use crate::config::EngineConfig;
use crate::domain::{
    Checkpoint, NewRun, Report, WorkExecution, WorkTree, WorkflowResult, WorkflowRun,
    WorkflowRunId, WorkflowSpace,
};
use crate::infra::{
    BroadcastPublisher, FileStore, GitCli, LocalFileSystem, MemoryFileSystem, MemoryGitService,
    MemoryStore, SnapshotUnitOfWork,
};
use crate::paths::RunflowPaths;
use crate::ports::Snapshotable;
use crate::structured_logger::StructuredLogger;
use std::sync::Arc;
use tracing::info;

/// Concrete in-memory adapters, kept for inspection in tests.
pub struct MemoryAdapters {
    pub runs: Arc<MemoryStore<WorkflowRun>>,
    pub executions: Arc<MemoryStore<WorkExecution>>,
    pub reports: Arc<MemoryStore<Report>>,
    pub checkpoints: Arc<MemoryStore<Checkpoint>>,
    pub work_trees: Arc<MemoryStore<WorkTree>>,
    pub spaces: Arc<MemoryStore<WorkflowSpace>>,
    pub fs: Arc<MemoryFileSystem>,
    pub git: Arc<MemoryGitService>,
    pub events: Arc<BroadcastPublisher>,
}

pub fn in_memory(layout: Layout, retry: RetryPolicy) -> (AppContext, MemoryAdapters) {
    let adapters = MemoryAdapters {
        runs: Arc::new(MemoryStore::new()),
        executions: Arc::new(MemoryStore::new()),
        reports: Arc::new(MemoryStore::new()),
        checkpoints: Arc::new(MemoryStore::new()),
        work_trees: Arc::new(MemoryStore::new()),
        spaces: Arc::new(MemoryStore::new()),
        fs: Arc::new(MemoryFileSystem::new()),
        git: Arc::new(MemoryGitService::new()),
        events: Arc::new(BroadcastPublisher::default()),
    };
    let stores: Vec<Arc<dyn Snapshotable>> = vec![
        adapters.runs.clone(),
        adapters.executions.clone(),
        adapters.reports.clone(),
        adapters.checkpoints.clone(),
        adapters.work_trees.clone(),
        adapters.spaces.clone(),
    ];
    let ctx = AppContext {
        repos: Repositories {
            runs: adapters.runs.clone(),
            executions: adapters.executions.clone(),
            reports: adapters.reports.clone(),
            checkpoints: adapters.checkpoints.clone(),
            work_trees: adapters.work_trees.clone(),
            spaces: adapters.spaces.clone(),
        },
        fs: adapters.fs.clone(),
        git: adapters.git.clone(),
        events: adapters.events.clone(),
        uow: Arc::new(SnapshotUnitOfWork::new(stores)),
        layout,
        retry,
    };
    (ctx, adapters)
}

/// JSON files under `paths.runs`, the local filesystem and the git CLI.
pub fn file_backed(
    paths: &RunflowPaths,
    retry: RetryPolicy,
    journal: Option<Arc<StructuredLogger>>,
) -> WorkflowResult<AppContext> {
    let runs = Arc::new(FileStore::<WorkflowRun>::open(&paths.runs)?);
    let executions = Arc::new(FileStore::<WorkExecution>::open(&paths.runs)?);
    let reports = Arc::new(FileStore::<Report>::open(&paths.runs)?);
    let checkpoints = Arc::new(FileStore::<Checkpoint>::open(&paths.runs)?);
    let work_trees = Arc::new(FileStore::<WorkTree>::open(&paths.runs)?);
    let spaces = Arc::new(FileStore::<WorkflowSpace>::open(&paths.runs)?);
    let stores: Vec<Arc<dyn Snapshotable>> = vec![
        runs.clone(),
        executions.clone(),
        reports.clone(),
        checkpoints.clone(),
        work_trees.clone(),
        spaces.clone(),
    ];
    Ok(AppContext {
        repos: Repositories {
            runs,
            executions,
            reports,
            checkpoints,
            work_trees,
            spaces,
        },
        fs: Arc::new(LocalFileSystem),
        git: Arc::new(GitCli::new(&paths.repos)),
        events: Arc::new(BroadcastPublisher::new(journal)),
        uow: Arc::new(SnapshotUnitOfWork::new(stores)),
        layout: Layout {
            trees_root: paths.trees.clone(),
            spaces_root: paths.spaces.clone(),
        },
        retry,
    })
}

/// What the startup hooks did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
    pub recovered: Vec<WorkflowRunId>,
    pub seeded: Option<WorkflowRunId>,
}

/// Every use case over one [`AppContext`].
pub struct Engine {
    pub ctx: AppContext,
    pub create_run: CreateRunService,
    pub lifecycle: RunLifecycleService,
    pub progress: Arc<ProgressService>,
    pub checkpoints: CheckpointService,
    pub recovery: RecoveryService,
    pub invalidation: InvalidationService,
    pub queries: QueryService,
}

impl Engine {
    pub fn new(ctx: AppContext, config: &EngineConfig) -> Self {
        Self {
            create_run: CreateRunService::new(ctx.clone()),
            lifecycle: RunLifecycleService::new(ctx.clone()),
            progress: Arc::new(ProgressService::new(ctx.clone())),
            checkpoints: CheckpointService::new(ctx.clone()),
            recovery: RecoveryService::new(ctx.clone()),
            invalidation: InvalidationService::new(ctx.clone()),
            queries: QueryService::new(
                ctx.clone(),
                config.max_file_bytes,
                config.excluded_dirs.clone(),
            ),
            ctx,
        }
    }

    /// Startup hooks: pause orphaned runs, then create the seed run when
    /// one is given and no run exists yet.
    pub async fn startup(&self, seed: Option<NewRun>) -> WorkflowResult<StartupReport> {
        let recovered = self.recovery.recover_orphans().await?;
        let mut seeded = None;
        if let Some(seed) = seed {
            if self.ctx.repos.runs.find_all().await?.is_empty() {
                let run = self.create_run.create(seed).await?;
                info!(run_id = %run.id(), "seed run created");
                seeded = Some(run.id());
            }
        }
        Ok(StartupReport { recovered, seeded })
    }

    /// A router feeding pipeline events from this engine's bus into its
    /// progress service. Subscribes immediately.
    pub fn router(&self, journal: Option<Arc<StructuredLogger>>) -> PipelineEventRouter {
        PipelineEventRouter::new(self.progress.clone(), self.ctx.events.as_ref(), journal)
    }
}

#[cfg(test)]
#[path = "tests/wiring_tests.rs"]
mod tests;
