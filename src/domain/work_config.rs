//! Immutable pipeline step configuration.
//!
//! A [`WorkNodeConfig`] describes one step of a run's pipeline: which model
//! drives it, the ordered tasks it performs, and the git/MCP references it
//! needs. All constructors validate their input; a config that exists is
//! well-formed.

use crate::domain::errors::{WorkflowError, WorkflowResult};
use crate::domain::types::{GitId, McpServerId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// One section of a report outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSection {
    pub title: String,
    pub description: String,
}

/// Ordered, non-empty list of report sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportOutline {
    sections: Vec<ReportSection>,
}

impl ReportOutline {
    pub fn new(sections: Vec<ReportSection>) -> WorkflowResult<Self> {
        if sections.is_empty() {
            return Err(WorkflowError::InvalidConfig {
                message: "report outline needs at least one section".to_string(),
            });
        }
        if let Some(pos) = sections.iter().position(|s| s.title.trim().is_empty()) {
            return Err(WorkflowError::InvalidConfig {
                message: format!("report outline section {} has an empty title", pos),
            });
        }
        Ok(Self { sections })
    }

    pub fn sections(&self) -> &[ReportSection] {
        &self.sections
    }
}

/// One query-producing task within a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskNodeConfig {
    order: u32,
    query: String,
    report_outline: Option<ReportOutline>,
}

impl TaskNodeConfig {
    pub fn new(
        order: u32,
        query: impl Into<String>,
        report_outline: Option<ReportOutline>,
    ) -> WorkflowResult<Self> {
        let query = query.into();
        if query.trim().is_empty() {
            return Err(WorkflowError::InvalidConfig {
                message: format!("task {} has an empty query", order),
            });
        }
        Ok(Self {
            order,
            query,
            report_outline,
        })
    }

    pub fn order(&self) -> u32 {
        self.order
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn report_outline(&self) -> Option<&ReportOutline> {
        self.report_outline.as_ref()
    }
}

/// Git repository a step works against, and the branch its tree starts from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitRefNodeConfig {
    pub git_id: GitId,
    pub base_branch: String,
}

/// MCP server a step exposes to the agent, with environment overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerRefNodeConfig {
    pub server_id: McpServerId,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Configuration of one pipeline step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkNodeConfig {
    sequence: u32,
    model: String,
    tasks: Vec<TaskNodeConfig>,
    git_refs: Vec<GitRefNodeConfig>,
    mcp_server_refs: Vec<McpServerRefNodeConfig>,
    pause_after: bool,
}

impl WorkNodeConfig {
    /// Builds a step config. Tasks are sorted by order; duplicated orders are
    /// rejected. The sequence is provisional until the run assigns one.
    pub fn new(
        sequence: u32,
        model: impl Into<String>,
        mut tasks: Vec<TaskNodeConfig>,
        git_refs: Vec<GitRefNodeConfig>,
        mcp_server_refs: Vec<McpServerRefNodeConfig>,
        pause_after: bool,
    ) -> WorkflowResult<Self> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(WorkflowError::InvalidConfig {
                message: "work node model must not be empty".to_string(),
            });
        }
        if tasks.is_empty() {
            return Err(WorkflowError::InvalidConfig {
                message: "work node needs at least one task".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for task in &tasks {
            if !seen.insert(task.order()) {
                return Err(WorkflowError::InvalidConfig {
                    message: format!("duplicate task order {}", task.order()),
                });
            }
        }
        tasks.sort_by_key(TaskNodeConfig::order);

        Ok(Self {
            sequence,
            model,
            tasks,
            git_refs,
            mcp_server_refs,
            pause_after,
        })
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn tasks(&self) -> &[TaskNodeConfig] {
        &self.tasks
    }

    pub fn git_refs(&self) -> &[GitRefNodeConfig] {
        &self.git_refs
    }

    pub fn mcp_server_refs(&self) -> &[McpServerRefNodeConfig] {
        &self.mcp_server_refs
    }

    pub fn pause_after(&self) -> bool {
        self.pause_after
    }

    /// Returns a copy carrying the given sequence. Only the run assigns sequences.
    pub(crate) fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }
}

#[cfg(test)]
#[path = "tests/work_config_tests.rs"]
mod tests;
