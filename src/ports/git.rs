use crate::domain::{BranchName, CommitHash, GitId, WorkflowResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub hash: CommitHash,
    pub subject: String,
}

/// Git operations on the repositories a run references.
///
/// Repositories are addressed by [`GitId`]; the adapter decides where the
/// main checkout lives. Work tree operations take the tree's own path.
#[async_trait]
pub trait GitService: Send + Sync {
    /// Clones `url` as the main checkout for `git_id` and returns its path.
    async fn clone_repo(&self, git_id: &GitId, url: &str) -> WorkflowResult<PathBuf>;

    /// Adds a work tree at `path` on a new `branch` started from `base_branch`.
    async fn create_worktree(
        &self,
        git_id: &GitId,
        path: &Path,
        branch: &BranchName,
        base_branch: &str,
    ) -> WorkflowResult<()>;

    async fn remove_worktree(&self, git_id: &GitId, path: &Path) -> WorkflowResult<()>;

    async fn current_commit(&self, worktree: &Path) -> WorkflowResult<CommitHash>;

    /// Hard-resets the work tree to `commit`.
    async fn reset_hard(&self, worktree: &Path, commit: &CommitHash) -> WorkflowResult<()>;

    async fn branch_exists(&self, git_id: &GitId, branch: &BranchName) -> WorkflowResult<bool>;

    async fn delete_branch(&self, git_id: &GitId, branch: &BranchName) -> WorkflowResult<()>;

    /// Uncommitted changes in the work tree, as a unified diff.
    async fn diff(&self, worktree: &Path) -> WorkflowResult<String>;

    /// Newest first.
    async fn log(&self, worktree: &Path, limit: usize) -> WorkflowResult<Vec<CommitSummary>>;

    /// Merges `branch` into the branch checked out in `worktree`.
    async fn merge(&self, worktree: &Path, branch: &BranchName) -> WorkflowResult<()>;
}
