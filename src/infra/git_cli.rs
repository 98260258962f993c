//! [`GitService`] backed by the `git` command line.
//!
//! Main checkouts live under `<repos_root>/<git-id>`; work trees are added
//! from there with a new branch per (run, repository).

use crate::domain::{BranchName, CommitHash, GitId, WorkflowError, WorkflowResult};
use crate::ports::{CommitSummary, GitService};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

pub struct GitCli {
    repos_root: PathBuf,
}

fn git_err(operation: &str, message: impl std::fmt::Display) -> WorkflowError {
    WorkflowError::infra(format!("git {}", operation), message)
}

impl GitCli {
    pub fn new(repos_root: impl Into<PathBuf>) -> Self {
        Self {
            repos_root: repos_root.into(),
        }
    }

    fn repo_path(&self, git_id: &GitId) -> PathBuf {
        self.repos_root.join(git_id.as_str())
    }

    /// Runs git in `dir` and returns trimmed stdout, failing on a non-zero exit.
    async fn run(&self, dir: &Path, operation: &str, args: &[&str]) -> WorkflowResult<String> {
        debug!(dir = %dir.display(), ?args, "git");
        let output = Command::new("git")
            .current_dir(dir)
            .args(args)
            .output()
            .await
            .map_err(|e| git_err(operation, format!("failed to run git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(git_err(operation, stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl GitService for GitCli {
    async fn clone_repo(&self, git_id: &GitId, url: &str) -> WorkflowResult<PathBuf> {
        let dest = self.repo_path(git_id);
        if dest.join(".git").exists() {
            return Ok(dest);
        }
        tokio::fs::create_dir_all(&self.repos_root)
            .await
            .map_err(|e| git_err("clone", e))?;
        let dest_arg = dest.to_string_lossy().into_owned();
        self.run(&self.repos_root, "clone", &["clone", url, &dest_arg])
            .await?;
        Ok(dest)
    }

    async fn create_worktree(
        &self,
        git_id: &GitId,
        path: &Path,
        branch: &BranchName,
        base_branch: &str,
    ) -> WorkflowResult<()> {
        let repo = self.repo_path(git_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| git_err("worktree add", e))?;
        }
        let path_arg = path.to_string_lossy().into_owned();
        self.run(
            &repo,
            "worktree add",
            &["worktree", "add", "-b", branch.as_str(), &path_arg, base_branch],
        )
        .await?;
        Ok(())
    }

    async fn remove_worktree(&self, git_id: &GitId, path: &Path) -> WorkflowResult<()> {
        let path_arg = path.to_string_lossy().into_owned();
        self.run(
            &self.repo_path(git_id),
            "worktree remove",
            &["worktree", "remove", "--force", &path_arg],
        )
        .await?;
        Ok(())
    }

    async fn current_commit(&self, worktree: &Path) -> WorkflowResult<CommitHash> {
        let head = self.run(worktree, "rev-parse", &["rev-parse", "HEAD"]).await?;
        CommitHash::parse(&head)
    }

    async fn reset_hard(&self, worktree: &Path, commit: &CommitHash) -> WorkflowResult<()> {
        self.run(worktree, "reset", &["reset", "--hard", commit.as_str()])
            .await?;
        // Untracked files written after the checkpoint would survive a reset.
        self.run(worktree, "clean", &["clean", "-fd"]).await?;
        Ok(())
    }

    async fn branch_exists(&self, git_id: &GitId, branch: &BranchName) -> WorkflowResult<bool> {
        let reference = format!("refs/heads/{}", branch);
        let output = Command::new("git")
            .current_dir(self.repo_path(git_id))
            .args(["show-ref", "--verify", "--quiet", &reference])
            .output()
            .await
            .map_err(|e| git_err("show-ref", e))?;
        Ok(output.status.success())
    }

    async fn delete_branch(&self, git_id: &GitId, branch: &BranchName) -> WorkflowResult<()> {
        self.run(
            &self.repo_path(git_id),
            "branch -D",
            &["branch", "-D", branch.as_str()],
        )
        .await?;
        Ok(())
    }

    async fn diff(&self, worktree: &Path) -> WorkflowResult<String> {
        self.run(worktree, "diff", &["diff", "HEAD"]).await
    }

    async fn log(&self, worktree: &Path, limit: usize) -> WorkflowResult<Vec<CommitSummary>> {
        let count = format!("-{}", limit);
        let out = self
            .run(worktree, "log", &["log", &count, "--format=%H %s"])
            .await?;
        out.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                let (hash, subject) = line.split_once(' ').unwrap_or((line, ""));
                Ok(CommitSummary {
                    hash: CommitHash::parse(hash)?,
                    subject: subject.to_string(),
                })
            })
            .collect()
    }

    async fn merge(&self, worktree: &Path, branch: &BranchName) -> WorkflowResult<()> {
        self.run(worktree, "merge", &["merge", "--no-edit", branch.as_str()])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/git_cli_tests.rs"]
mod tests;
