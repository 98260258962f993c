//! Engine configuration and workflow definitions, both read from YAML.

use crate::app::queries::DEFAULT_MAX_FILE_BYTES;
use crate::app::RetryPolicy;
use crate::domain::{
    GitId, GitRefNodeConfig, IssueKey, McpServerId, McpServerRefNodeConfig, NewRun,
    ReportOutline, ReportSection, TaskNodeConfig, WorkNodeConfig, WorkflowId, WorkflowResult,
};
use crate::paths::RunflowPaths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Engine settings. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root for all engine directories. Default: `~/.runflow`
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Where run directories are created. Default: `<data_dir>/spaces`
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    /// `tracing` filter used when `RUNFLOW_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Largest file the query side will return. Default: 1 MiB
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Directory names hidden from run directory trees.
    #[serde(default = "default_excluded_dirs")]
    pub excluded_dirs: Vec<String>,

    /// Journal every published event to `logs/events.jsonl`.
    #[serde(default = "default_true")]
    pub journal: bool,

    /// Workflow definition used to create a first run when none exist.
    #[serde(default)]
    pub seed_workflow: Option<PathBuf>,
}

fn default_log_filter() -> String {
    "runflow=info".to_string()
}

fn default_max_file_bytes() -> u64 {
    DEFAULT_MAX_FILE_BYTES
}

fn default_excluded_dirs() -> Vec<String> {
    [".git", "node_modules", "target"]
        .iter()
        .map(|d| d.to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            workspace_root: None,
            log_filter: default_log_filter(),
            retry: RetryPolicy::default(),
            max_file_bytes: default_max_file_bytes(),
            excluded_dirs: default_excluded_dirs(),
            journal: default_true(),
            seed_workflow: None,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file as YAML: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `explicit` when given (it must exist), otherwise `default_path`
    /// when it exists, otherwise the defaults.
    pub fn load_or_default(explicit: Option<&Path>, default_path: &Path) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None if default_path.exists() => Self::load(default_path),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_file_bytes == 0 {
            anyhow::bail!("max_file_bytes must be greater than zero");
        }
        if self.log_filter.trim().is_empty() {
            anyhow::bail!("log_filter must not be empty");
        }
        Ok(())
    }

    /// Directory layout: `data_dir` (or `home`) with the workspace override.
    pub fn paths(&self, home: &Path) -> RunflowPaths {
        let root = self.data_dir.as_deref().unwrap_or(home);
        let mut paths = RunflowPaths::under(root);
        if let Some(spaces) = &self.workspace_root {
            paths.spaces = spaces.clone();
        }
        paths
    }
}

/// A task as written in a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub order: u32,
    pub query: String,
    /// Report sections; the task produces a report when present.
    #[serde(default)]
    pub report: Option<Vec<ReportSection>>,
}

/// A step as written in a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkNodeDefinition {
    pub model: String,
    pub tasks: Vec<TaskDefinition>,
    #[serde(default)]
    pub git_refs: Vec<GitRefNodeConfig>,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerRefNodeConfig>,
    #[serde(default)]
    pub pause_after: bool,
}

impl WorkNodeDefinition {
    pub fn to_config(&self) -> WorkflowResult<WorkNodeConfig> {
        let tasks = self
            .tasks
            .iter()
            .map(|task| {
                let outline = task.report.clone().map(ReportOutline::new).transpose()?;
                TaskNodeConfig::new(task.order, task.query.clone(), outline)
            })
            .collect::<WorkflowResult<Vec<_>>>()?;
        WorkNodeConfig::new(
            0,
            self.model.clone(),
            tasks,
            self.git_refs.clone(),
            self.mcp_servers.clone(),
            self.pause_after,
        )
    }
}

/// A workflow: the ordered steps every run created from it starts with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    /// Repositories the run needs beyond the ones its steps name.
    #[serde(default)]
    pub git_refs: Vec<GitId>,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerId>,
    pub work_nodes: Vec<WorkNodeDefinition>,
}

impl WorkflowDefinition {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid workflow definition: {}", path.display()))
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        let definition: Self =
            serde_yaml::from_str(yaml).context("Failed to parse workflow definition as YAML")?;
        definition.work_node_configs()?;
        Ok(definition)
    }

    pub fn work_node_configs(&self) -> WorkflowResult<Vec<WorkNodeConfig>> {
        self.work_nodes
            .iter()
            .map(WorkNodeDefinition::to_config)
            .collect()
    }

    /// Input for creating a run of this workflow.
    pub fn new_run(
        &self,
        issue_key: IssueKey,
        seed_values: BTreeMap<String, String>,
    ) -> WorkflowResult<NewRun> {
        Ok(NewRun {
            source_workflow_id: self.id.clone(),
            issue_key,
            seed_values,
            git_ids: self.git_refs.clone(),
            mcp_server_ids: self.mcp_servers.clone(),
            work_nodes: self.work_node_configs()?,
        })
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
