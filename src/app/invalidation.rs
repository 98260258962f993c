//! Reacts to deletion of the git repositories and MCP servers runs refer to.

use crate::app::AppContext;
use crate::domain::{GitId, McpServerId, WorkflowResult, WorkflowRun, WorkflowRunId};
use tracing::info;

pub struct InvalidationService {
    ctx: AppContext,
}

impl InvalidationService {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Flags `git_id` invalid in every run that references it. Returns the
    /// runs that changed.
    pub async fn git_deleted(&self, git_id: &GitId) -> WorkflowResult<Vec<WorkflowRunId>> {
        let changed = self
            .invalidate("git ref deleted", |run| run.invalidate_git_ref(git_id))
            .await?;
        info!(git_id = %git_id, runs = changed.len(), "git ref invalidated");
        Ok(changed)
    }

    pub async fn mcp_server_deleted(
        &self,
        server_id: &McpServerId,
    ) -> WorkflowResult<Vec<WorkflowRunId>> {
        let changed = self
            .invalidate("mcp server deleted", |run| run.invalidate_mcp_server_ref(server_id))
            .await?;
        info!(server_id = %server_id, runs = changed.len(), "mcp server ref invalidated");
        Ok(changed)
    }

    async fn invalidate<F>(&self, operation: &str, apply: F) -> WorkflowResult<Vec<WorkflowRunId>>
    where
        F: Fn(&mut WorkflowRun) -> bool + Send + Sync,
    {
        let mut changed = Vec::new();
        for run in self.ctx.repos.runs.find_all().await? {
            let run_id = run.id();
            let touched = self
                .ctx
                .retry
                .run(operation, || async {
                    let mut run = self.ctx.repos.runs.get(run_id).await?;
                    if !apply(&mut run) {
                        return Ok(false);
                    }
                    self.ctx.repos.runs.save(&mut run).await?;
                    self.ctx.publish(run.take_events()).await?;
                    Ok(true)
                })
                .await?;
            if touched {
                changed.push(run_id);
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
#[path = "tests/invalidation_tests.rs"]
mod tests;
