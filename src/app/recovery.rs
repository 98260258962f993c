//! Startup sweep for runs left RUNNING by a previous process.
//!
//! Nothing drives a RUNNING run after a restart, so each one is paused and
//! waits for an operator to resume it.

use crate::app::AppContext;
use crate::domain::{RunStatus, WorkflowResult, WorkflowRun, WorkflowRunId};
use tracing::{info, warn};

pub struct RecoveryService {
    ctx: AppContext,
}

impl RecoveryService {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Pauses every RUNNING run. A run that cannot be paused is logged and
    /// left as it is. Returns the ids of the paused runs.
    pub async fn recover_orphans(&self) -> WorkflowResult<Vec<WorkflowRunId>> {
        let orphans = self.ctx.repos.runs.find_by_status(RunStatus::Running).await?;
        let mut recovered = Vec::with_capacity(orphans.len());
        for orphan in orphans {
            let run_id = orphan.id();
            match self
                .ctx
                .retry
                .run("recover orphan", || self.pause_orphan(run_id))
                .await
            {
                Ok(true) => recovered.push(run_id),
                Ok(false) => {}
                Err(err) => warn!(run_id = %run_id, error = %err, "could not pause orphaned run"),
            }
        }
        if !recovered.is_empty() {
            info!(count = recovered.len(), "paused orphaned runs");
        }
        Ok(recovered)
    }

    /// Returns false when the run left RUNNING since the sweep listed it.
    async fn pause_orphan(&self, run_id: WorkflowRunId) -> WorkflowResult<bool> {
        let mut run: WorkflowRun = self.ctx.repos.runs.get(run_id).await?;
        if run.status() != RunStatus::Running {
            return Ok(false);
        }
        run.pause()?;
        self.ctx.repos.runs.save(&mut run).await?;
        info!(run_id = %run_id, at_work_index = run.current_work_index(), "orphaned run paused");
        self.ctx.publish(run.take_events()).await?;
        Ok(true)
    }
}

#[cfg(test)]
#[path = "tests/recovery_tests.rs"]
mod tests;
