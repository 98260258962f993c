//! Fixtures shared by unit tests.

use crate::app::{Layout, RetryPolicy};
use crate::config::EngineConfig;
use crate::domain::{
    GitId, GitRefNodeConfig, IssueKey, McpServerId, McpServerRefNodeConfig, NewRun,
    PipelineEvent, ReportOutline, ReportSection, RunEvent, TaskNodeConfig, WorkExecution,
    WorkNodeConfig, WorkflowId, WorkflowRun, WorkflowRunId,
};
use crate::wiring::{in_memory, Engine, MemoryAdapters};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub fn outline() -> ReportOutline {
    ReportOutline::new(vec![ReportSection {
        title: "Findings".to_string(),
        description: "What was found".to_string(),
    }])
    .unwrap()
}

pub fn task(order: u32) -> TaskNodeConfig {
    TaskNodeConfig::new(order, format!("query {}", order), None).unwrap()
}

pub fn report_task(order: u32) -> TaskNodeConfig {
    TaskNodeConfig::new(order, format!("report query {}", order), Some(outline())).unwrap()
}

pub fn git_ref(git_id: &str) -> GitRefNodeConfig {
    GitRefNodeConfig {
        git_id: GitId::from(git_id),
        base_branch: "main".to_string(),
    }
}

pub fn mcp_ref(server_id: &str) -> McpServerRefNodeConfig {
    McpServerRefNodeConfig {
        server_id: McpServerId::from(server_id),
        env: BTreeMap::new(),
    }
}

/// A step with one plain task and one report task.
pub fn node(git_ids: &[&str], pause_after: bool) -> WorkNodeConfig {
    WorkNodeConfig::new(
        0,
        "model-a",
        vec![task(1), report_task(2)],
        git_ids.iter().map(|id| git_ref(id)).collect(),
        Vec::new(),
        pause_after,
    )
    .unwrap()
}

pub fn new_run(work_nodes: Vec<WorkNodeConfig>) -> NewRun {
    NewRun {
        source_workflow_id: WorkflowId::from("wf-review"),
        issue_key: IssueKey::from("PROJ-42"),
        seed_values: BTreeMap::from([("ticket".to_string(), "PROJ-42".to_string())]),
        git_ids: Vec::new(),
        mcp_server_ids: Vec::new(),
        work_nodes,
    }
}

/// An INITIALIZED run with `steps` steps, each referencing repository `g1`.
pub fn run_with_steps(steps: usize) -> WorkflowRun {
    let nodes = (0..steps).map(|_| node(&["g1"], false)).collect();
    WorkflowRun::create(new_run(nodes)).unwrap()
}

/// A RUNNING run with `steps` steps and its creation events drained.
pub fn running_run(steps: usize) -> WorkflowRun {
    let mut run = run_with_steps(steps);
    run.start().unwrap();
    run.take_events();
    run
}

/// Layout used by in-memory engines in tests.
pub fn layout() -> Layout {
    Layout {
        trees_root: PathBuf::from("/work/trees"),
        spaces_root: PathBuf::from("/work/spaces"),
    }
}

/// An in-memory engine and direct handles to its adapters.
pub struct TestApp {
    pub engine: Engine,
    pub mem: MemoryAdapters,
}

pub fn test_app() -> TestApp {
    let retry = RetryPolicy {
        max_retries: 2,
        backoff_ms: 0,
    };
    let (ctx, mem) = in_memory(layout(), retry);
    TestApp {
        engine: Engine::new(ctx, &EngineConfig::default()),
        mem,
    }
}

impl TestApp {
    /// Creates a run with `steps` steps, each referencing repository `g1`.
    pub async fn create_run(&self, steps: usize) -> WorkflowRun {
        let nodes = (0..steps).map(|_| node(&["g1"], false)).collect();
        self.engine.create_run.create(new_run(nodes)).await.unwrap()
    }

    /// Creates and starts a run with `steps` steps.
    pub async fn started_run(&self, steps: usize) -> WorkflowRun {
        let run = self.create_run(steps).await;
        self.engine.lifecycle.start(run.id()).await.unwrap()
    }

    pub async fn stored_run(&self, run_id: WorkflowRunId) -> WorkflowRun {
        self.engine.ctx.repos.runs.get(run_id).await.unwrap()
    }

    /// Reports that the driver started the run's current step.
    pub async fn start_step(&self, run_id: WorkflowRunId) -> WorkExecution {
        let run = self.stored_run(run_id).await;
        let sequence = run.current_work_node().unwrap().sequence();
        self.engine
            .progress
            .start_work_execution(run_id, sequence)
            .await
            .unwrap()
    }

    /// Answers every task of `execution` and reports the step finished.
    pub async fn finish_step(&self, run_id: WorkflowRunId, execution: &WorkExecution) {
        for task in execution.tasks() {
            self.engine
                .progress
                .handle(PipelineEvent::QueryResponded {
                    run_id,
                    work_execution_id: execution.id(),
                    task_execution_id: task.id(),
                })
                .await
                .unwrap();
        }
        self.engine
            .progress
            .handle(PipelineEvent::WorkExecutionCompleted {
                run_id,
                work_execution_id: execution.id(),
            })
            .await
            .unwrap();
    }

    /// Path of the run's work tree for `git_id`.
    pub fn tree_path(&self, run_id: WorkflowRunId, git_id: &str) -> PathBuf {
        layout().trees_root.join(run_id.to_string()).join(git_id)
    }

    pub fn published(&self) -> Vec<RunEvent> {
        self.mem.events.history()
    }
}
