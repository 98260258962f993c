//! Point-in-time capture of a run's progress and git state.
//!
//! Checkpoints are append-only. Restoring to one mutates the run and its
//! executions, never the checkpoint.

use crate::domain::errors::{WorkflowError, WorkflowResult};
use crate::domain::run::WorkflowRun;
use crate::domain::types::{
    CheckpointId, CommitHash, GitId, TimestampUtc, WorkExecutionId, WorkflowId, WorkflowRunId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    id: CheckpointId,
    workflow_run_id: WorkflowRunId,
    source_workflow_id: WorkflowId,
    work_execution_id: Option<WorkExecutionId>,
    work_sequence: usize,
    commit_hashes: BTreeMap<GitId, CommitHash>,
    created_at: TimestampUtc,
    version: u64,
}

impl Checkpoint {
    /// Captures the run's current position together with the given commits.
    pub fn capture(run: &WorkflowRun, commit_hashes: BTreeMap<GitId, CommitHash>) -> Self {
        Self {
            id: CheckpointId::new(),
            workflow_run_id: run.id(),
            source_workflow_id: run.source_workflow_id().clone(),
            work_execution_id: run.work_execution_ids().last().copied(),
            work_sequence: run.current_work_index(),
            commit_hashes,
            created_at: TimestampUtc::now(),
            version: 0,
        }
    }

    pub fn id(&self) -> CheckpointId {
        self.id
    }

    pub fn workflow_run_id(&self) -> WorkflowRunId {
        self.workflow_run_id
    }

    pub fn source_workflow_id(&self) -> &WorkflowId {
        &self.source_workflow_id
    }

    pub fn work_execution_id(&self) -> Option<WorkExecutionId> {
        self.work_execution_id
    }

    pub fn work_sequence(&self) -> usize {
        self.work_sequence
    }

    pub fn commit_hashes(&self) -> &BTreeMap<GitId, CommitHash> {
        &self.commit_hashes
    }

    pub fn created_at(&self) -> TimestampUtc {
        self.created_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Fails unless the checkpoint was captured for `run_id`.
    pub fn ensure_belongs_to(&self, run_id: WorkflowRunId) -> WorkflowResult<()> {
        if self.workflow_run_id != run_id {
            return Err(WorkflowError::CheckpointInvalid {
                checkpoint_id: self.id.to_string(),
                reason: format!(
                    "captured for run {}, not run {}",
                    self.workflow_run_id, run_id
                ),
            });
        }
        Ok(())
    }
}
