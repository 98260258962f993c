//! In-process [`GitService`] used by tests and dry runs.
//!
//! Tracks one commit per work tree and the branches of each repository.
//! Failures can be injected per work tree to exercise fail-fast paths.

use crate::domain::{BranchName, CommitHash, GitId, WorkflowError, WorkflowResult};
use crate::ports::{CommitSummary, GitService};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct State {
    repos: BTreeMap<GitId, PathBuf>,
    branches: BTreeMap<GitId, BTreeSet<String>>,
    worktrees: BTreeMap<PathBuf, (GitId, BranchName)>,
    commits: BTreeMap<PathBuf, CommitHash>,
    failing_resets: HashSet<PathBuf>,
    failing_creates: HashSet<GitId>,
}

#[derive(Default)]
pub struct MemoryGitService {
    state: Mutex<State>,
}

fn git_err(operation: &str, message: impl std::fmt::Display) -> WorkflowError {
    WorkflowError::infra(format!("git {}", operation), message)
}

fn initial_commit() -> WorkflowResult<CommitHash> {
    CommitHash::parse(&"0".repeat(40))
}

impl MemoryGitService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> WorkflowResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| git_err("state", "lock poisoned"))
    }

    /// Moves the work tree's HEAD, as if someone committed in it.
    pub fn set_commit(&self, worktree: &Path, commit: CommitHash) -> WorkflowResult<()> {
        self.lock()?.commits.insert(worktree.to_path_buf(), commit);
        Ok(())
    }

    /// Makes every later reset of `worktree` fail.
    pub fn fail_resets_for(&self, worktree: &Path) -> WorkflowResult<()> {
        self.lock()?.failing_resets.insert(worktree.to_path_buf());
        Ok(())
    }

    /// Makes every later work tree creation for `git_id` fail.
    pub fn fail_creates_for(&self, git_id: &GitId) -> WorkflowResult<()> {
        self.lock()?.failing_creates.insert(git_id.clone());
        Ok(())
    }

    /// Paths of the work trees that currently exist.
    pub fn worktrees(&self) -> Vec<PathBuf> {
        self.lock()
            .map(|state| state.worktrees.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl GitService for MemoryGitService {
    async fn clone_repo(&self, git_id: &GitId, url: &str) -> WorkflowResult<PathBuf> {
        if url.trim().is_empty() {
            return Err(git_err("clone", "empty url"));
        }
        let path = PathBuf::from("/memory/repos").join(git_id.as_str());
        self.lock()?.repos.insert(git_id.clone(), path.clone());
        Ok(path)
    }

    async fn create_worktree(
        &self,
        git_id: &GitId,
        path: &Path,
        branch: &BranchName,
        _base_branch: &str,
    ) -> WorkflowResult<()> {
        let mut state = self.lock()?;
        if state.failing_creates.contains(git_id) {
            return Err(git_err("worktree add", format!("injected failure for {}", git_id)));
        }
        if state.worktrees.contains_key(path) {
            return Err(git_err("worktree add", format!("{} already exists", path.display())));
        }
        let branches = state.branches.entry(git_id.clone()).or_default();
        if !branches.insert(branch.as_str().to_string()) {
            return Err(git_err("worktree add", format!("branch {} already exists", branch)));
        }
        state
            .worktrees
            .insert(path.to_path_buf(), (git_id.clone(), branch.clone()));
        if !state.commits.contains_key(path) {
            state.commits.insert(path.to_path_buf(), initial_commit()?);
        }
        Ok(())
    }

    async fn remove_worktree(&self, _git_id: &GitId, path: &Path) -> WorkflowResult<()> {
        let mut state = self.lock()?;
        if state.worktrees.remove(path).is_none() {
            return Err(git_err("worktree remove", format!("{} is not a work tree", path.display())));
        }
        state.commits.remove(path);
        Ok(())
    }

    async fn current_commit(&self, worktree: &Path) -> WorkflowResult<CommitHash> {
        self.lock()?
            .commits
            .get(worktree)
            .cloned()
            .ok_or_else(|| git_err("rev-parse", format!("{} has no HEAD", worktree.display())))
    }

    async fn reset_hard(&self, worktree: &Path, commit: &CommitHash) -> WorkflowResult<()> {
        let mut state = self.lock()?;
        if state.failing_resets.contains(worktree) {
            return Err(git_err("reset", format!("injected failure for {}", worktree.display())));
        }
        if !state.commits.contains_key(worktree) {
            return Err(git_err("reset", format!("{} is not a work tree", worktree.display())));
        }
        state.commits.insert(worktree.to_path_buf(), commit.clone());
        Ok(())
    }

    async fn branch_exists(&self, git_id: &GitId, branch: &BranchName) -> WorkflowResult<bool> {
        Ok(self
            .lock()?
            .branches
            .get(git_id)
            .is_some_and(|b| b.contains(branch.as_str())))
    }

    async fn delete_branch(&self, git_id: &GitId, branch: &BranchName) -> WorkflowResult<()> {
        let mut state = self.lock()?;
        let checked_out = state.worktrees.values().any(|(g, b)| g == git_id && b == branch);
        if checked_out {
            return Err(git_err("branch -D", format!("{} is checked out", branch)));
        }
        if let Some(branches) = state.branches.get_mut(git_id) {
            branches.remove(branch.as_str());
        }
        Ok(())
    }

    async fn diff(&self, worktree: &Path) -> WorkflowResult<String> {
        self.current_commit(worktree).await?;
        Ok(String::new())
    }

    async fn log(&self, worktree: &Path, limit: usize) -> WorkflowResult<Vec<CommitSummary>> {
        let head = self.current_commit(worktree).await?;
        Ok(std::iter::once(CommitSummary {
            hash: head,
            subject: "HEAD".to_string(),
        })
        .take(limit)
        .collect())
    }

    async fn merge(&self, worktree: &Path, branch: &BranchName) -> WorkflowResult<()> {
        let state = self.lock()?;
        let (git_id, _) = state
            .worktrees
            .get(worktree)
            .ok_or_else(|| git_err("merge", format!("{} is not a work tree", worktree.display())))?;
        let known = state
            .branches
            .get(git_id)
            .is_some_and(|b| b.contains(branch.as_str()));
        if !known {
            return Err(git_err("merge", format!("unknown branch {}", branch)));
        }
        Ok(())
    }
}
