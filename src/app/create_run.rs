//! Run creation: the run record, its directory layout and the space record
//! are written together, and the directories are removed again on failure.

use crate::app::compensation::CompensationStack;
use crate::app::AppContext;
use crate::domain::{NewRun, WorkflowResult, WorkflowRun, WorkflowSpace};
use crate::ports::run_in_unit_of_work;
use futures::FutureExt;
use tracing::info;

/// Creates runs together with their run directory.
pub struct CreateRunService {
    ctx: AppContext,
}

impl CreateRunService {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub async fn create(&self, new_run: NewRun) -> WorkflowResult<WorkflowRun> {
        let mut run = WorkflowRun::create(new_run)?;
        let mut space = WorkflowSpace::for_run(run.id(), &self.ctx.layout.spaces_root);

        let mut undo = CompensationStack::new();
        let fs = self.ctx.fs.clone();
        let created = async {
            fs.create_dir_all(&space.reports_dir()).await?;
            let root = space.root().to_path_buf();
            let fs_undo = fs.clone();
            undo.push(format!("remove {}", root.display()), move || {
                async move { fs_undo.remove_dir_all(&root).await }.boxed()
            });
            fs.create_dir_all(&space.works_dir()).await?;

            let repos = &self.ctx.repos;
            run_in_unit_of_work(self.ctx.uow.as_ref(), async {
                repos.spaces.save(&mut space).await?;
                repos.runs.save(&mut run).await
            })
            .await
        }
        .await;
        if let Err(err) = created {
            undo.unwind().await;
            return Err(err);
        }
        undo.clear();

        info!(
            run_id = %run.id(),
            workflow_id = %run.source_workflow_id(),
            steps = run.work_node_configs().len(),
            "run created"
        );
        self.ctx.publish(run.take_events()).await?;
        Ok(run)
    }
}

#[cfg(test)]
#[path = "tests/create_run_tests.rs"]
mod tests;
