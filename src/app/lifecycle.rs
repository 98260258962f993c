//! Run commands: start, pause, resume, cancel, pipeline edits, rewind and
//! deletion.

use crate::app::compensation::CompensationStack;
use crate::app::AppContext;
use crate::domain::{
    GitId, RunStatus, WorkExecution, WorkExecutionId, WorkNodeConfig, WorkTree, WorkflowError,
    WorkflowResult, WorkflowRun, WorkflowRunId,
};
use crate::ports::run_in_unit_of_work;
use futures::FutureExt;
use tracing::{info, warn};

const DEFAULT_BASE_BRANCH: &str = "main";

pub struct RunLifecycleService {
    ctx: AppContext,
}

impl RunLifecycleService {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Starts the run and checks out one work tree per valid git ref.
    /// Work trees already created are removed again when a later step fails.
    pub async fn start(&self, run_id: WorkflowRunId) -> WorkflowResult<WorkflowRun> {
        self.ctx
            .retry
            .run("start run", || self.start_once(run_id))
            .await
    }

    async fn start_once(&self, run_id: WorkflowRunId) -> WorkflowResult<WorkflowRun> {
        let repos = &self.ctx.repos;
        let mut run = repos.runs.get(run_id).await?;
        run.start()?;

        let existing = repos.work_trees.find_by_workflow_run_id(run_id).await?;
        let mut undo = CompensationStack::new();
        let mut trees = Vec::new();
        for entry in run.git_ref_pool() {
            if !entry.valid {
                warn!(run_id = %run_id, git_id = %entry.git_id, "skipping invalid git ref");
                continue;
            }
            if existing.iter().any(|t| t.git_id() == &entry.git_id) {
                continue;
            }
            let base = base_branch_for(&run, &entry.git_id);
            let tree = WorkTree::plan(&run, entry.git_id.clone(), &base, &self.ctx.layout.trees_root);
            if let Err(err) = self.provision(&tree, &mut undo).await {
                undo.unwind().await;
                return Err(err);
            }
            trees.push(tree);
        }

        let persisted = run_in_unit_of_work(self.ctx.uow.as_ref(), async {
            for tree in trees.iter_mut() {
                repos.work_trees.save(tree).await?;
            }
            repos.runs.save(&mut run).await
        })
        .await;
        if let Err(err) = persisted {
            undo.unwind().await;
            return Err(err);
        }
        undo.clear();

        info!(run_id = %run_id, work_trees = trees.len(), "run started");
        self.ctx.publish(run.take_events()).await?;
        Ok(run)
    }

    async fn provision(&self, tree: &WorkTree, undo: &mut CompensationStack) -> WorkflowResult<()> {
        self.ctx
            .git
            .create_worktree(tree.git_id(), tree.path(), tree.branch(), tree.base_branch())
            .await?;
        let git = self.ctx.git.clone();
        let (git_id, path, branch) = (
            tree.git_id().clone(),
            tree.path().to_path_buf(),
            tree.branch().clone(),
        );
        undo.push(format!("remove work tree {}", path.display()), move || {
            async move {
                git.remove_worktree(&git_id, &path).await?;
                git.delete_branch(&git_id, &branch).await
            }
            .boxed()
        });
        Ok(())
    }

    pub async fn pause(&self, run_id: WorkflowRunId) -> WorkflowResult<WorkflowRun> {
        self.ctx
            .retry
            .run("pause run", || self.mutate(run_id, "run paused", WorkflowRun::pause))
            .await
    }

    pub async fn resume(&self, run_id: WorkflowRunId) -> WorkflowResult<WorkflowRun> {
        self.ctx
            .retry
            .run("resume run", || self.mutate(run_id, "run resumed", WorkflowRun::resume))
            .await
    }

    async fn mutate(
        &self,
        run_id: WorkflowRunId,
        message: &'static str,
        apply: fn(&mut WorkflowRun) -> WorkflowResult<()>,
    ) -> WorkflowResult<WorkflowRun> {
        let mut run = self.ctx.repos.runs.get(run_id).await?;
        apply(&mut run)?;
        self.ctx.repos.runs.save(&mut run).await?;
        info!(run_id = %run_id, status = %run.status(), "{}", message);
        self.ctx.publish(run.take_events()).await?;
        Ok(run)
    }

    /// Cancels the run together with its unfinished executions.
    pub async fn cancel(&self, run_id: WorkflowRunId, reason: &str) -> WorkflowResult<WorkflowRun> {
        self.ctx
            .retry
            .run("cancel run", || self.cancel_once(run_id, reason))
            .await
    }

    async fn cancel_once(&self, run_id: WorkflowRunId, reason: &str) -> WorkflowResult<WorkflowRun> {
        let repos = &self.ctx.repos;
        let mut run = repos.runs.get(run_id).await?;
        run.cancel(reason)?;
        let mut open: Vec<WorkExecution> = repos
            .executions
            .find_by_workflow_run_id(run_id)
            .await?
            .into_iter()
            .filter(|e| !e.is_completed() && !e.is_cancelled())
            .collect();
        for execution in open.iter_mut() {
            execution.cancel();
        }

        run_in_unit_of_work(self.ctx.uow.as_ref(), async {
            for execution in open.iter_mut() {
                repos.executions.save(execution).await?;
            }
            repos.runs.save(&mut run).await
        })
        .await?;
        info!(run_id = %run_id, reason, cancelled_executions = open.len(), "run cancelled");
        self.ctx.publish(run.take_events()).await?;
        Ok(run)
    }

    /// Appends a step. Returns the sequence the run assigned.
    pub async fn add_work_node(
        &self,
        run_id: WorkflowRunId,
        config: WorkNodeConfig,
    ) -> WorkflowResult<u32> {
        self.ctx
            .retry
            .run("add work node", || async {
                let mut run = self.ctx.repos.runs.get(run_id).await?;
                let sequence = run.add_work_node_config(config.clone())?;
                self.ctx.repos.runs.save(&mut run).await?;
                self.ctx.publish(run.take_events()).await?;
                Ok(sequence)
            })
            .await
    }

    /// Removes a step that has not started.
    pub async fn remove_work_node(
        &self,
        run_id: WorkflowRunId,
        sequence: u32,
    ) -> WorkflowResult<WorkNodeConfig> {
        self.ctx
            .retry
            .run("remove work node", || async {
                let mut run = self.ctx.repos.runs.get(run_id).await?;
                let removed = run.remove_work_node_config(sequence)?;
                self.ctx.repos.runs.save(&mut run).await?;
                self.ctx.publish(run.take_events()).await?;
                Ok(removed)
            })
            .await
    }

    /// Re-opens the tasks of the current step's execution from
    /// `from_task_index` on, together with their reports.
    pub async fn rewind_work_execution(
        &self,
        run_id: WorkflowRunId,
        work_execution_id: WorkExecutionId,
        from_task_index: usize,
    ) -> WorkflowResult<WorkExecution> {
        let repos = &self.ctx.repos;
        let run = repos.runs.get(run_id).await?;
        if run.is_terminal() {
            return Err(WorkflowError::InvalidStateTransition {
                from: run.status(),
                to: run.status(),
            });
        }
        if run.work_execution_ids().get(run.current_work_index()) != Some(&work_execution_id) {
            return Err(WorkflowError::InvalidExecutionTransition {
                message: format!(
                    "work execution {} is not the current step's execution",
                    work_execution_id
                ),
            });
        }

        let mut execution = repos.executions.get(work_execution_id).await?;
        execution.rewind(from_task_index)?;
        let mut reports = Vec::new();
        for task in execution.tasks().iter().skip(from_task_index) {
            if let Some(report_id) = task.report_id() {
                let mut report = repos.reports.get(report_id).await?;
                report.reopen();
                reports.push(report);
            }
        }

        run_in_unit_of_work(self.ctx.uow.as_ref(), async {
            repos.executions.save(&mut execution).await?;
            for report in reports.iter_mut() {
                repos.reports.save(report).await?;
            }
            Ok(())
        })
        .await?;
        info!(
            run_id = %run_id,
            work_execution_id = %work_execution_id,
            from_task_index,
            "work execution rewound"
        );
        Ok(execution)
    }

    /// Deletes the run and everything it owns. Records go first inside one
    /// unit of work; work trees, branches and the run directory are removed
    /// afterwards and failures there are only logged.
    pub async fn delete_run(&self, run_id: WorkflowRunId) -> WorkflowResult<()> {
        let repos = &self.ctx.repos;
        let mut run = repos.runs.get(run_id).await?;
        if matches!(run.status(), RunStatus::Running | RunStatus::Awaiting) {
            return Err(WorkflowError::InvalidStateTransition {
                from: run.status(),
                to: run.status(),
            });
        }
        let trees = repos.work_trees.find_by_workflow_run_id(run_id).await?;
        let space = repos.spaces.find_by_workflow_run_id(run_id).await?;

        run_in_unit_of_work(self.ctx.uow.as_ref(), async {
            let executions = repos
                .executions
                .delete_by_workflow_run_id_from_sequence(run_id, 0)
                .await?;
            let ids: Vec<WorkExecutionId> = executions.iter().map(WorkExecution::id).collect();
            repos.reports.delete_by_work_execution_ids(&ids).await?;
            repos.checkpoints.delete_by_workflow_run_id(run_id).await?;
            for tree in &trees {
                repos.work_trees.delete(tree.id()).await?;
            }
            if let Some(space) = &space {
                repos.spaces.delete(space.id()).await?;
            }
            repos.runs.delete(run_id).await?;
            Ok(())
        })
        .await?;

        let mut cleanup = CompensationStack::new();
        if let Some(space) = space {
            let fs = self.ctx.fs.clone();
            let root = space.root().to_path_buf();
            cleanup.push(format!("remove {}", root.display()), move || {
                async move { fs.remove_dir_all(&root).await }.boxed()
            });
        }
        for tree in trees {
            let git = self.ctx.git.clone();
            cleanup.push(format!("remove work tree {}", tree.path().display()), move || {
                async move {
                    git.remove_worktree(tree.git_id(), tree.path()).await?;
                    git.delete_branch(tree.git_id(), tree.branch()).await
                }
                .boxed()
            });
        }
        let failed = cleanup.unwind().await;

        info!(run_id = %run_id, cleanup_failures = failed.len(), "run deleted");
        run.mark_deleted();
        self.ctx.publish(run.take_events()).await
    }
}

/// The branch the first step referencing `git_id` wants its tree to start from.
fn base_branch_for(run: &WorkflowRun, git_id: &GitId) -> String {
    run.work_node_configs()
        .iter()
        .flat_map(WorkNodeConfig::git_refs)
        .find(|r| &r.git_id == git_id)
        .map_or_else(|| DEFAULT_BASE_BRANCH.to_string(), |r| r.base_branch.clone())
}

#[cfg(test)]
#[path = "tests/lifecycle_tests.rs"]
mod tests;
