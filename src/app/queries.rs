//! Read models: run summaries, checkpoint listings, report content and the
//! run directory tree.

use crate::app::AppContext;
use crate::domain::{
    Checkpoint, Report, ReportId, ReportStatus, WorkflowError, WorkflowResult, WorkflowRun,
    WorkflowRunId,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

pub const DEFAULT_MAX_FILE_BYTES: u64 = 1024 * 1024;

const MAX_TREE_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    /// Run count per status name.
    pub by_status: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Dir,
    File,
    Link,
}

/// One entry of the run directory tree. Links are listed, never followed;
/// excluded directories are left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileNode {
    pub name: String,
    /// Relative to the run directory.
    pub path: PathBuf,
    pub kind: FileKind,
    pub size: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileNode>,
}

pub struct QueryService {
    ctx: AppContext,
    max_file_bytes: u64,
    excluded_dirs: Vec<String>,
}

impl QueryService {
    pub fn new(ctx: AppContext, max_file_bytes: u64, excluded_dirs: Vec<String>) -> Self {
        Self {
            ctx,
            max_file_bytes,
            excluded_dirs,
        }
    }

    pub async fn runs(&self) -> WorkflowResult<Vec<WorkflowRun>> {
        self.ctx.repos.runs.find_all().await
    }

    pub async fn run(&self, run_id: WorkflowRunId) -> WorkflowResult<WorkflowRun> {
        self.ctx.repos.runs.get(run_id).await
    }

    pub async fn summary(&self) -> WorkflowResult<RunSummary> {
        let runs = self.ctx.repos.runs.find_all().await?;
        let mut by_status = BTreeMap::new();
        for run in &runs {
            *by_status.entry(run.status().to_string()).or_insert(0) += 1;
        }
        Ok(RunSummary {
            total: runs.len(),
            by_status,
        })
    }

    /// Oldest first.
    pub async fn checkpoints(&self, run_id: WorkflowRunId) -> WorkflowResult<Vec<Checkpoint>> {
        if !self.ctx.repos.runs.exists(run_id).await? {
            return Err(WorkflowError::not_found("workflow_run", run_id));
        }
        self.ctx.repos.checkpoints.find_by_workflow_run_id(run_id).await
    }

    pub async fn reports(&self, run_id: WorkflowRunId) -> WorkflowResult<Vec<Report>> {
        self.ctx.repos.reports.find_by_workflow_run_id(run_id).await
    }

    /// Content of a completed report. The file wins when it can be read;
    /// otherwise the inline content is returned.
    pub async fn report_content(&self, report_id: ReportId) -> WorkflowResult<String> {
        let report = self.ctx.repos.reports.get(report_id).await?;
        if report.status() != ReportStatus::Completed {
            return Err(WorkflowError::InvalidExecutionTransition {
                message: format!("report {} is not completed", report_id),
            });
        }
        if let Some(file_path) = report.file_path() {
            let space = self
                .ctx
                .repos
                .spaces
                .find_by_workflow_run_id(report.workflow_run_id())
                .await?;
            let path = match space {
                Some(space) if Path::new(file_path).is_relative() => space.root().join(file_path),
                _ => PathBuf::from(file_path),
            };
            match self.read_capped(&path).await {
                Ok(text) => return Ok(text),
                Err(err @ WorkflowError::FileTooLarge { .. }) => return Err(err),
                Err(err) => {
                    tracing::debug!(path = %path.display(), error = %err, "report file unreadable")
                }
            }
        }
        report
            .content()
            .map(str::to_string)
            .ok_or_else(|| WorkflowError::not_found("report content", report_id))
    }

    /// The run directory, or the sub-directory `relative` of it, as a tree.
    pub async fn workspace_tree(
        &self,
        run_id: WorkflowRunId,
        relative: Option<&str>,
    ) -> WorkflowResult<Vec<FileNode>> {
        let space = self.ctx.repos.spaces.get_for_run(run_id).await?;
        let rel = match relative {
            Some(rel) => checked_relative(rel)?,
            None => PathBuf::new(),
        };
        self.walk(space.root().join(&rel), rel, 0).await
    }

    /// Reads one file of the run directory.
    pub async fn read_workspace_file(
        &self,
        run_id: WorkflowRunId,
        relative: &str,
    ) -> WorkflowResult<String> {
        let space = self.ctx.repos.spaces.get_for_run(run_id).await?;
        let rel = checked_relative(relative)?;
        if rel.as_os_str().is_empty() {
            return Err(WorkflowError::PathRejected {
                path: relative.to_string(),
            });
        }
        self.read_capped(&space.root().join(rel)).await
    }

    async fn read_capped(&self, path: &Path) -> WorkflowResult<String> {
        if let Some(stat) = self.ctx.fs.stat(path).await? {
            self.check_size(path, stat.len)?;
        }
        let bytes = self.ctx.fs.read_file(path).await?;
        self.check_size(path, bytes.len() as u64)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn check_size(&self, path: &Path, size: u64) -> WorkflowResult<()> {
        if size > self.max_file_bytes {
            return Err(WorkflowError::FileTooLarge {
                path: path.display().to_string(),
                size,
                limit: self.max_file_bytes,
            });
        }
        Ok(())
    }

    fn walk(
        &self,
        dir: PathBuf,
        rel: PathBuf,
        depth: usize,
    ) -> BoxFuture<'_, WorkflowResult<Vec<FileNode>>> {
        async move {
            let mut nodes = Vec::new();
            for entry in self.ctx.fs.list_dir(&dir).await? {
                let path = rel.join(&entry.name);
                let kind = if entry.stat.is_symlink {
                    FileKind::Link
                } else if entry.stat.is_dir {
                    FileKind::Dir
                } else {
                    FileKind::File
                };
                if kind != FileKind::File && self.excluded_dirs.iter().any(|d| d == &entry.name) {
                    continue;
                }
                let children = if kind == FileKind::Dir && depth + 1 < MAX_TREE_DEPTH {
                    self.walk(entry.path.clone(), path.clone(), depth + 1).await?
                } else {
                    Vec::new()
                };
                nodes.push(FileNode {
                    name: entry.name,
                    path,
                    kind,
                    size: entry.stat.len,
                    children,
                });
            }
            Ok(nodes)
        }
        .boxed()
    }
}

/// Accepts only plain relative paths that stay inside the run directory.
fn checked_relative(relative: &str) -> WorkflowResult<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(WorkflowError::PathRejected {
                    path: relative.to_string(),
                })
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
#[path = "tests/queries_tests.rs"]
mod tests;
