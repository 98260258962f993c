//! Checkpoint capture and restore.
//!
//! Restore resets git first and fails fast: when any work tree cannot be
//! reset nothing in the stores has been touched yet. The store mutations then
//! run in one unit of work.

use crate::app::AppContext;
use crate::domain::{
    Checkpoint, CheckpointId, CommitHash, GitId, RunEvent, WorkExecution, WorkExecutionId,
    WorkflowError, WorkflowResult, WorkflowRun, WorkflowRunId,
};
use crate::ports::run_in_unit_of_work;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

struct Restored {
    run: WorkflowRun,
    removed: Vec<WorkExecution>,
    stale_dirs: Vec<PathBuf>,
}

pub struct CheckpointService {
    ctx: AppContext,
}

impl CheckpointService {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Captures the run's position and the HEAD of each of its work trees.
    /// Refused while a step is in progress.
    pub async fn capture(&self, run_id: WorkflowRunId) -> WorkflowResult<Checkpoint> {
        let run = self.ctx.repos.runs.get(run_id).await?;
        if run.work_execution_ids().len() > run.current_work_index() {
            return Err(WorkflowError::CheckpointInvalid {
                checkpoint_id: format!("run {run_id}"),
                reason: format!("step {} is in progress", run.current_work_index()),
            });
        }
        let mut checkpoint = build_checkpoint(&self.ctx, &run).await?;
        self.ctx.repos.checkpoints.save(&mut checkpoint).await?;
        info!(
            run_id = %run_id,
            checkpoint_id = %checkpoint.id(),
            work_sequence = checkpoint.work_sequence(),
            "checkpoint captured"
        );
        self.ctx.publish(vec![created_event(&checkpoint)]).await?;
        Ok(checkpoint)
    }

    /// Rolls the run back to `checkpoint_id` and leaves it PAUSED.
    pub async fn restore(
        &self,
        run_id: WorkflowRunId,
        checkpoint_id: CheckpointId,
    ) -> WorkflowResult<WorkflowRun> {
        let checkpoint = self
            .ctx
            .repos
            .checkpoints
            .find_by_id(checkpoint_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("checkpoint", checkpoint_id))?;
        checkpoint.ensure_belongs_to(run_id)?;

        let run = self.ctx.repos.runs.get(run_id).await?;
        if run.is_terminal() {
            return Err(WorkflowError::CheckpointInvalid {
                checkpoint_id: checkpoint_id.to_string(),
                reason: format!("run is {}", run.status()),
            });
        }

        self.reset_work_trees(&checkpoint).await?;

        let Restored {
            mut run,
            removed,
            stale_dirs,
        } = self
            .ctx
            .retry
            .run("restore checkpoint", || self.restore_records(run_id, &checkpoint))
            .await?;

        for dir in &stale_dirs {
            if let Err(err) = self.ctx.fs.remove_dir_all(dir).await {
                warn!(path = %dir.display(), error = %err, "stale work space left on disk");
            }
        }

        info!(
            run_id = %run_id,
            checkpoint_id = %checkpoint_id,
            work_sequence = checkpoint.work_sequence(),
            removed_executions = removed.len(),
            "checkpoint restored"
        );
        let mut events = run.take_events();
        events.push(RunEvent::CheckpointRestored {
            run_id,
            checkpoint_id,
            work_sequence: checkpoint.work_sequence(),
        });
        self.ctx.publish(events).await?;
        Ok(run)
    }

    async fn reset_work_trees(&self, checkpoint: &Checkpoint) -> WorkflowResult<()> {
        let run_id = checkpoint.workflow_run_id();
        for (git_id, commit) in checkpoint.commit_hashes() {
            let tree = self
                .ctx
                .repos
                .work_trees
                .find_by_run_and_git(run_id, git_id)
                .await?
                .ok_or_else(|| WorkflowError::CheckpointInvalid {
                    checkpoint_id: checkpoint.id().to_string(),
                    reason: format!("run has no work tree for {}", git_id),
                })?;
            self.ctx.git.reset_hard(tree.path(), commit).await?;
        }
        Ok(())
    }

    async fn restore_records(
        &self,
        run_id: WorkflowRunId,
        checkpoint: &Checkpoint,
    ) -> WorkflowResult<Restored> {
        let repos = &self.ctx.repos;
        run_in_unit_of_work(self.ctx.uow.as_ref(), async {
            let mut run = repos.runs.get(run_id).await?;
            let work_sequence = checkpoint.work_sequence();

            // Steps at positions >= work_sequence carry the sequences from
            // the one at that position up.
            let from_sequence = run
                .work_node_configs()
                .get(work_sequence)
                .map_or(u32::MAX as usize, |c| c.sequence() as usize);
            let removed = repos
                .executions
                .delete_by_workflow_run_id_from_sequence(run_id, from_sequence)
                .await?;
            let removed_ids: Vec<WorkExecutionId> = removed.iter().map(WorkExecution::id).collect();
            repos.reports.delete_by_work_execution_ids(&removed_ids).await?;

            let mut stale_dirs = Vec::new();
            if let Some(mut space) = repos.spaces.find_by_workflow_run_id(run_id).await? {
                let dropped = space.remove_work_spaces(&removed_ids);
                if !dropped.is_empty() {
                    repos.spaces.save(&mut space).await?;
                    stale_dirs.extend(dropped.into_iter().map(|ws| ws.path));
                }
            }

            let retained: Vec<WorkExecutionId> = repos
                .executions
                .find_by_workflow_run_id(run_id)
                .await?
                .iter()
                .map(WorkExecution::id)
                .collect();
            run.restore_to(work_sequence, &retained)?;
            repos.runs.save(&mut run).await?;
            Ok(Restored {
                run,
                removed,
                stale_dirs,
            })
        })
        .await
    }
}

/// Reads the commit of every work tree the run owns for a valid git ref.
/// Invalid refs and refs without a work tree are skipped.
pub(crate) async fn build_checkpoint(
    ctx: &AppContext,
    run: &WorkflowRun,
) -> WorkflowResult<Checkpoint> {
    let trees = ctx
        .repos
        .work_trees
        .find_by_workflow_run_id(run.id())
        .await?;
    let mut commits: BTreeMap<GitId, CommitHash> = BTreeMap::new();
    for entry in run.git_ref_pool() {
        if !entry.valid {
            warn!(run_id = %run.id(), git_id = %entry.git_id, "skipping invalid git ref");
            continue;
        }
        let Some(tree) = trees.iter().find(|t| t.git_id() == &entry.git_id) else {
            warn!(run_id = %run.id(), git_id = %entry.git_id, "git ref has no work tree");
            continue;
        };
        let commit = ctx.git.current_commit(tree.path()).await?;
        commits.insert(entry.git_id.clone(), commit);
    }
    Ok(Checkpoint::capture(run, commits))
}

pub(crate) fn created_event(checkpoint: &Checkpoint) -> RunEvent {
    RunEvent::CheckpointCreated {
        run_id: checkpoint.workflow_run_id(),
        checkpoint_id: checkpoint.id(),
        work_sequence: checkpoint.work_sequence(),
    }
}

#[cfg(test)]
#[path = "tests/checkpoint_tests.rs"]
mod tests;
