//! Run-scoped filesystem layout.
//!
//! These types describe where a run's directories, work trees and symlinks
//! live. They perform no I/O; the use cases apply them through the
//! [`FileSystem`](crate::ports::FileSystem) and
//! [`GitService`](crate::ports::GitService) ports.
//!
//! Layout under the spaces root:
//!
//! ```text
//! <spaces>/<run-id>/
//!     reports/
//!     works/<seq>-<exec-short>/
//!         trees/<git-id>  -> <trees>/<run-id>/<git-id>
//!         reports         -> <spaces>/<run-id>/reports
//! ```

use crate::domain::errors::{WorkflowError, WorkflowResult};
use crate::domain::execution::WorkExecution;
use crate::domain::types::{
    BranchName, GitId, WorkExecutionId, WorkSpaceId, WorkTreeId, WorkflowRunId, WorkflowSpaceId,
};
use crate::domain::run::WorkflowRun;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A git working tree checked out for one (run, repository) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkTree {
    id: WorkTreeId,
    git_id: GitId,
    workflow_run_id: WorkflowRunId,
    path: PathBuf,
    branch: BranchName,
    base_branch: String,
    version: u64,
}

impl WorkTree {
    /// Plans the work tree a run uses for `git_id`.
    pub fn plan(run: &WorkflowRun, git_id: GitId, base_branch: &str, trees_root: &Path) -> Self {
        let label = format!("{}-{}", run.issue_key(), git_id);
        Self {
            id: WorkTreeId::new(),
            path: trees_root
                .join(run.id().to_string())
                .join(git_id.as_str()),
            branch: BranchName::for_run(&label, &run.id()),
            base_branch: base_branch.to_string(),
            git_id,
            workflow_run_id: run.id(),
            version: 0,
        }
    }

    pub fn id(&self) -> WorkTreeId {
        self.id
    }

    pub fn git_id(&self) -> &GitId {
        &self.git_id
    }

    pub fn workflow_run_id(&self) -> WorkflowRunId {
        self.workflow_run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn branch(&self) -> &BranchName {
        &self.branch
    }

    pub fn base_branch(&self) -> &str {
        &self.base_branch
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymLinkKind {
    WorkTree,
    Reports,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymLink {
    pub link: PathBuf,
    pub target: PathBuf,
    pub kind: SymLinkKind,
}

/// Directory for one work execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSpace {
    pub id: WorkSpaceId,
    pub work_execution_id: WorkExecutionId,
    pub path: PathBuf,
    pub links: Vec<SymLink>,
}

/// Top-level directory of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSpace {
    id: WorkflowSpaceId,
    workflow_run_id: WorkflowRunId,
    root: PathBuf,
    work_spaces: Vec<WorkSpace>,
    version: u64,
}

impl WorkflowSpace {
    pub fn for_run(run_id: WorkflowRunId, spaces_root: &Path) -> Self {
        Self {
            id: WorkflowSpaceId::new(),
            workflow_run_id: run_id,
            root: spaces_root.join(run_id.to_string()),
            work_spaces: Vec::new(),
            version: 0,
        }
    }

    pub fn id(&self) -> WorkflowSpaceId {
        self.id
    }

    pub fn workflow_run_id(&self) -> WorkflowRunId {
        self.workflow_run_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    pub fn works_dir(&self) -> PathBuf {
        self.root.join("works")
    }

    pub fn work_spaces(&self) -> &[WorkSpace] {
        &self.work_spaces
    }

    pub fn work_space_for(&self, work_execution_id: WorkExecutionId) -> Option<&WorkSpace> {
        self.work_spaces
            .iter()
            .find(|ws| ws.work_execution_id == work_execution_id)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Adds the work space for an execution, linking every work tree and the
    /// shared reports directory into it.
    pub fn add_work_space(
        &mut self,
        execution: &WorkExecution,
        work_trees: &[WorkTree],
    ) -> WorkflowResult<&WorkSpace> {
        if execution.workflow_run_id() != self.workflow_run_id {
            return Err(WorkflowError::InvalidConfig {
                message: format!(
                    "work execution {} belongs to another run",
                    execution.id()
                ),
            });
        }
        if self.work_space_for(execution.id()).is_some() {
            return Err(WorkflowError::InvalidConfig {
                message: format!("work space for {} already exists", execution.id()),
            });
        }

        let path = self.works_dir().join(format!(
            "{:03}-{}",
            execution.work_node_sequence(),
            execution.id().short()
        ));
        let mut links: Vec<SymLink> = work_trees
            .iter()
            .map(|tree| SymLink {
                link: path.join("trees").join(tree.git_id().as_str()),
                target: tree.path().to_path_buf(),
                kind: SymLinkKind::WorkTree,
            })
            .collect();
        links.push(SymLink {
            link: path.join("reports"),
            target: self.reports_dir(),
            kind: SymLinkKind::Reports,
        });

        self.work_spaces.push(WorkSpace {
            id: WorkSpaceId::new(),
            work_execution_id: execution.id(),
            path,
            links,
        });
        let last = self.work_spaces.len() - 1;
        Ok(&self.work_spaces[last])
    }

    /// Removes and returns the work spaces of the given executions.
    pub fn remove_work_spaces(&mut self, execution_ids: &[WorkExecutionId]) -> Vec<WorkSpace> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.work_spaces)
            .into_iter()
            .partition(|ws| execution_ids.contains(&ws.work_execution_id));
        self.work_spaces = kept;
        removed
    }
}

#[cfg(test)]
#[path = "tests/space_tests.rs"]
mod tests;
