//! The workflow run aggregate.
//!
//! A [`WorkflowRun`] owns the run's ordered pipeline configuration, its ref
//! pools and its lifecycle status. Mutating methods validate against the
//! state machine and append domain events to an internal buffer which the
//! caller drains after a successful save.

use crate::domain::errors::{WorkflowError, WorkflowResult};
use crate::domain::events::RunEvent;
use crate::domain::ref_pool::{git_pool, mcp_pool, GitRef, McpServerRef};
use crate::domain::types::{
    GitId, IssueKey, McpServerId, TimestampUtc, WorkExecutionId, WorkflowId, WorkflowRunId,
};
use crate::domain::work_config::WorkNodeConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Initialized,
    Running,
    Paused,
    Awaiting,
    Completed,
    Cancelled,
}

impl RunStatus {
    pub const ALL: [RunStatus; 6] = [
        RunStatus::Initialized,
        RunStatus::Running,
        RunStatus::Paused,
        RunStatus::Awaiting,
        RunStatus::Completed,
        RunStatus::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Initialized => "INITIALIZED",
            RunStatus::Running => "RUNNING",
            RunStatus::Paused => "PAUSED",
            RunStatus::Awaiting => "AWAITING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Cancelled => "CANCELLED",
        }
    }

    /// The transition table. Anything not listed is illegal.
    pub fn can_transition_to(&self, to: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, to),
            (Initialized, Running)
                | (Running, Paused)
                | (Running, Awaiting)
                | (Paused, Running)
                | (Awaiting, Running)
                | (Running, Completed)
                | (Initialized | Running | Paused | Awaiting, Cancelled)
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for [`WorkflowRun::create`].
#[derive(Debug, Clone)]
pub struct NewRun {
    pub source_workflow_id: WorkflowId,
    pub issue_key: IssueKey,
    pub seed_values: BTreeMap<String, String>,
    pub git_ids: Vec<GitId>,
    pub mcp_server_ids: Vec<McpServerId>,
    pub work_nodes: Vec<WorkNodeConfig>,
}

/// Workflow run aggregate root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    id: WorkflowRunId,
    source_workflow_id: WorkflowId,
    issue_key: IssueKey,
    seed_values: BTreeMap<String, String>,
    status: RunStatus,
    ordered_work_node_configs: Vec<WorkNodeConfig>,
    ordered_work_execution_ids: Vec<WorkExecutionId>,
    current_work_index: usize,
    cancelled_at_work_index: Option<usize>,
    cancellation_reason: Option<String>,
    git_ref_pool: Vec<GitRef>,
    mcp_server_ref_pool: Vec<McpServerRef>,
    restored_to_checkpoint: bool,
    created_at: TimestampUtc,
    updated_at: TimestampUtc,
    version: u64,
    #[serde(skip)]
    pending_events: Vec<RunEvent>,
}

impl WorkflowRun {
    /// Creates a run in INITIALIZED status. Work node sequences are assigned
    /// densely from 0; the git pool also picks up every repository the work
    /// nodes reference.
    pub fn create(new_run: NewRun) -> WorkflowResult<Self> {
        let NewRun {
            source_workflow_id,
            issue_key,
            seed_values,
            git_ids,
            mcp_server_ids,
            work_nodes,
        } = new_run;

        if issue_key.as_str().trim().is_empty() {
            return Err(WorkflowError::InvalidConfig {
                message: "issue key must not be empty".to_string(),
            });
        }

        let node_git_ids = work_nodes
            .iter()
            .flat_map(|n| n.git_refs().iter().map(|r| r.git_id.clone()));
        let node_mcp_ids = work_nodes
            .iter()
            .flat_map(|n| n.mcp_server_refs().iter().map(|r| r.server_id.clone()));
        let git_ref_pool = git_pool(git_ids.into_iter().chain(node_git_ids));
        let mcp_server_ref_pool = mcp_pool(mcp_server_ids.into_iter().chain(node_mcp_ids));

        let ordered_work_node_configs = work_nodes
            .into_iter()
            .enumerate()
            .map(|(i, node)| node.with_sequence(i as u32))
            .collect();

        let now = TimestampUtc::now();
        let id = WorkflowRunId::new();
        Ok(Self {
            id,
            source_workflow_id: source_workflow_id.clone(),
            issue_key,
            seed_values,
            status: RunStatus::Initialized,
            ordered_work_node_configs,
            ordered_work_execution_ids: Vec::new(),
            current_work_index: 0,
            cancelled_at_work_index: None,
            cancellation_reason: None,
            git_ref_pool,
            mcp_server_ref_pool,
            restored_to_checkpoint: false,
            created_at: now,
            updated_at: now,
            version: 0,
            pending_events: vec![RunEvent::RunCreated {
                run_id: id,
                source_workflow_id,
            }],
        })
    }

    // ========== Public Getters ==========

    pub fn id(&self) -> WorkflowRunId {
        self.id
    }

    pub fn source_workflow_id(&self) -> &WorkflowId {
        &self.source_workflow_id
    }

    pub fn issue_key(&self) -> &IssueKey {
        &self.issue_key
    }

    pub fn seed_values(&self) -> &BTreeMap<String, String> {
        &self.seed_values
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn work_node_configs(&self) -> &[WorkNodeConfig] {
        &self.ordered_work_node_configs
    }

    pub fn work_execution_ids(&self) -> &[WorkExecutionId] {
        &self.ordered_work_execution_ids
    }

    pub fn current_work_index(&self) -> usize {
        self.current_work_index
    }

    /// The step currently executing or about to execute.
    pub fn current_work_node(&self) -> Option<&WorkNodeConfig> {
        self.ordered_work_node_configs.get(self.current_work_index)
    }

    pub fn cancelled_at_work_index(&self) -> Option<usize> {
        self.cancelled_at_work_index
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn git_ref_pool(&self) -> &[GitRef] {
        &self.git_ref_pool
    }

    pub fn mcp_server_ref_pool(&self) -> &[McpServerRef] {
        &self.mcp_server_ref_pool
    }

    pub fn restored_to_checkpoint(&self) -> bool {
        self.restored_to_checkpoint
    }

    pub fn created_at(&self) -> TimestampUtc {
        self.created_at
    }

    pub fn updated_at(&self) -> TimestampUtc {
        self.updated_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Only RUNNING runs can be paused; used by orphan recovery.
    pub fn can_pause(&self) -> bool {
        self.status == RunStatus::Running
    }

    // ========== Events ==========

    pub fn pending_events(&self) -> &[RunEvent] {
        &self.pending_events
    }

    /// Drains the buffered events. Call after the run has been persisted.
    pub fn take_events(&mut self) -> Vec<RunEvent> {
        std::mem::take(&mut self.pending_events)
    }

    fn record(&mut self, event: RunEvent) {
        self.updated_at = TimestampUtc::now();
        self.pending_events.push(event);
    }

    // ========== State machine ==========

    fn transition(&mut self, expected_from: &[RunStatus], to: RunStatus) -> WorkflowResult<()> {
        let from = self.status;
        if !expected_from.contains(&from) || !from.can_transition_to(to) {
            return Err(WorkflowError::InvalidStateTransition { from, to });
        }
        self.status = to;
        Ok(())
    }

    pub fn start(&mut self) -> WorkflowResult<()> {
        self.transition(&[RunStatus::Initialized], RunStatus::Running)?;
        self.record(RunEvent::RunStarted { run_id: self.id });
        Ok(())
    }

    pub fn pause(&mut self) -> WorkflowResult<()> {
        self.transition(&[RunStatus::Running], RunStatus::Paused)?;
        self.record(RunEvent::RunPaused {
            run_id: self.id,
            at_work_index: self.current_work_index,
        });
        Ok(())
    }

    pub fn resume(&mut self) -> WorkflowResult<()> {
        self.transition(&[RunStatus::Paused], RunStatus::Running)?;
        self.record(RunEvent::RunResumed { run_id: self.id });
        Ok(())
    }

    /// A task needs external input before the pipeline can continue.
    pub fn await_input(&mut self) -> WorkflowResult<()> {
        self.transition(&[RunStatus::Running], RunStatus::Awaiting)?;
        self.record(RunEvent::RunAwaitingInput { run_id: self.id });
        Ok(())
    }

    /// The pending query was answered.
    pub fn answer_query(&mut self) -> WorkflowResult<()> {
        self.transition(&[RunStatus::Awaiting], RunStatus::Running)?;
        self.record(RunEvent::RunResumed { run_id: self.id });
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>) -> WorkflowResult<()> {
        self.transition(
            &[
                RunStatus::Initialized,
                RunStatus::Running,
                RunStatus::Paused,
                RunStatus::Awaiting,
            ],
            RunStatus::Cancelled,
        )?;
        let reason = reason.into();
        self.cancelled_at_work_index = Some(self.current_work_index);
        self.cancellation_reason = Some(reason.clone());
        self.record(RunEvent::RunCancelled {
            run_id: self.id,
            at_work_index: self.current_work_index,
            reason,
        });
        Ok(())
    }

    fn complete(&mut self) -> WorkflowResult<()> {
        self.transition(&[RunStatus::Running], RunStatus::Completed)?;
        self.record(RunEvent::RunCompleted { run_id: self.id });
        Ok(())
    }

    // ========== Pipeline mutation ==========

    /// Appends a step, assigning the next sequence regardless of the one the
    /// config carries. Returns the assigned sequence.
    pub fn add_work_node_config(&mut self, config: WorkNodeConfig) -> WorkflowResult<u32> {
        if self.is_terminal() {
            return Err(WorkflowError::InvalidStateTransition {
                from: self.status,
                to: self.status,
            });
        }
        let sequence = self
            .ordered_work_node_configs
            .iter()
            .map(WorkNodeConfig::sequence)
            .max()
            .map_or(0, |max| max + 1);

        for git_ref in config.git_refs() {
            if !self.git_ref_pool.iter().any(|r| r.git_id == git_ref.git_id) {
                self.git_ref_pool.push(GitRef::new(git_ref.git_id.clone()));
            }
        }
        for mcp_ref in config.mcp_server_refs() {
            if !self
                .mcp_server_ref_pool
                .iter()
                .any(|r| r.server_id == mcp_ref.server_id)
            {
                self.mcp_server_ref_pool
                    .push(McpServerRef::new(mcp_ref.server_id.clone()));
            }
        }

        self.ordered_work_node_configs
            .push(config.with_sequence(sequence));
        self.record(RunEvent::WorkNodeAdded {
            run_id: self.id,
            sequence,
        });
        Ok(sequence)
    }

    /// Removes a step that has not started yet.
    pub fn remove_work_node_config(&mut self, sequence: u32) -> WorkflowResult<WorkNodeConfig> {
        let position = self
            .ordered_work_node_configs
            .iter()
            .position(|c| c.sequence() == sequence)
            .ok_or_else(|| WorkflowError::not_found("work node", sequence))?;

        if self.is_terminal() {
            return Err(WorkflowError::InvalidStateTransition {
                from: self.status,
                to: self.status,
            });
        }

        // Positions never exceed sequences, so this also refuses every
        // sequence at or below the current index.
        if position <= self.current_work_index {
            return Err(WorkflowError::WorkNodeLocked {
                sequence,
                current_index: self.current_work_index,
            });
        }

        let removed = self.ordered_work_node_configs.remove(position);
        self.record(RunEvent::WorkNodeRemoved {
            run_id: self.id,
            sequence,
        });
        Ok(removed)
    }

    /// Records the execution created for the current step.
    pub fn record_work_execution(
        &mut self,
        work_execution_id: WorkExecutionId,
    ) -> WorkflowResult<()> {
        if self.status != RunStatus::Running {
            return Err(WorkflowError::InvalidStateTransition {
                from: self.status,
                to: RunStatus::Running,
            });
        }
        let sequence = self
            .current_work_node()
            .map(WorkNodeConfig::sequence)
            .ok_or_else(|| WorkflowError::not_found("work node", self.current_work_index))?;
        if self.ordered_work_execution_ids.len() > self.current_work_index {
            return Err(WorkflowError::InvalidExecutionTransition {
                message: format!(
                    "work index {} already has an execution",
                    self.current_work_index
                ),
            });
        }
        self.ordered_work_execution_ids.push(work_execution_id);
        self.record(RunEvent::WorkExecutionRecorded {
            run_id: self.id,
            work_execution_id,
            sequence,
        });
        Ok(())
    }

    /// Moves past the finished step. Completes the run after the last step
    /// and pauses it when the finished step asked for a pause.
    pub fn advance_work(&mut self) -> WorkflowResult<()> {
        if self.status != RunStatus::Running {
            return Err(WorkflowError::InvalidStateTransition {
                from: self.status,
                to: RunStatus::Running,
            });
        }
        let finished = self
            .current_work_node()
            .cloned()
            .ok_or_else(|| WorkflowError::not_found("work node", self.current_work_index))?;

        self.current_work_index += 1;
        self.record(RunEvent::WorkAdvanced {
            run_id: self.id,
            current_work_index: self.current_work_index,
        });

        if self.current_work_index >= self.ordered_work_node_configs.len() {
            self.complete()
        } else if finished.pause_after() {
            self.pause()
        } else {
            Ok(())
        }
    }

    /// Rewinds the run to a checkpoint. Keeps only the execution ids the
    /// caller retained and leaves the run PAUSED for operator review. This is
    /// the only way into PAUSED from INITIALIZED or AWAITING.
    pub fn restore_to(
        &mut self,
        work_sequence: usize,
        retained_execution_ids: &[WorkExecutionId],
    ) -> WorkflowResult<()> {
        let restorable = matches!(
            self.status,
            RunStatus::Initialized | RunStatus::Running | RunStatus::Paused | RunStatus::Awaiting
        );
        if !restorable {
            return Err(WorkflowError::InvalidStateTransition {
                from: self.status,
                to: RunStatus::Paused,
            });
        }
        if work_sequence > self.ordered_work_node_configs.len() {
            return Err(WorkflowError::InvalidConfig {
                message: format!(
                    "work index {} exceeds {} configured steps",
                    work_sequence,
                    self.ordered_work_node_configs.len()
                ),
            });
        }

        self.ordered_work_execution_ids
            .retain(|id| retained_execution_ids.contains(id));
        self.ordered_work_execution_ids.truncate(work_sequence);
        self.current_work_index = work_sequence;
        self.restored_to_checkpoint = true;
        if self.status != RunStatus::Paused {
            self.status = RunStatus::Paused;
            self.record(RunEvent::RunPaused {
                run_id: self.id,
                at_work_index: work_sequence,
            });
        }
        Ok(())
    }

    /// Consumes the restore marker; returns whether it was set.
    pub fn take_restored_marker(&mut self) -> bool {
        std::mem::replace(&mut self.restored_to_checkpoint, false)
    }

    // ========== Ref pools ==========

    /// Flags a git reference invalid. Returns true when something changed.
    pub fn invalidate_git_ref(&mut self, git_id: &GitId) -> bool {
        let mut changed = false;
        for entry in self.git_ref_pool.iter_mut() {
            if &entry.git_id == git_id && entry.valid {
                entry.valid = false;
                changed = true;
            }
        }
        if changed {
            self.record(RunEvent::GitRefInvalidated {
                run_id: self.id,
                git_id: git_id.clone(),
            });
        }
        changed
    }

    /// Flags an MCP server reference invalid. Returns true when something changed.
    pub fn invalidate_mcp_server_ref(&mut self, server_id: &McpServerId) -> bool {
        let mut changed = false;
        for entry in self.mcp_server_ref_pool.iter_mut() {
            if &entry.server_id == server_id && entry.valid {
                entry.valid = false;
                changed = true;
            }
        }
        if changed {
            self.record(RunEvent::McpServerRefInvalidated {
                run_id: self.id,
                server_id: server_id.clone(),
            });
        }
        changed
    }

    pub fn ensure_git_ref_usable(&self, git_id: &GitId) -> WorkflowResult<()> {
        match self.git_ref_pool.iter().find(|r| &r.git_id == git_id) {
            Some(entry) if entry.valid => Ok(()),
            Some(_) => Err(WorkflowError::InvalidReference {
                id: git_id.to_string(),
            }),
            None => Err(WorkflowError::not_found("git reference", git_id)),
        }
    }

    pub fn ensure_mcp_server_ref_usable(&self, server_id: &McpServerId) -> WorkflowResult<()> {
        match self
            .mcp_server_ref_pool
            .iter()
            .find(|r| &r.server_id == server_id)
        {
            Some(entry) if entry.valid => Ok(()),
            Some(_) => Err(WorkflowError::InvalidReference {
                id: server_id.to_string(),
            }),
            None => Err(WorkflowError::not_found("mcp server reference", server_id)),
        }
    }

    /// Records that the run is being deleted; published after removal.
    pub fn mark_deleted(&mut self) {
        self.record(RunEvent::RunDeleted { run_id: self.id });
    }
}

#[cfg(test)]
#[path = "tests/run_tests.rs"]
mod tests;
