//! Home-based storage paths under `~/.runflow/`:
//! - `config.yaml` - Engine configuration
//! - `runs/` - Entity store (one directory per aggregate kind)
//! - `spaces/` - Run directories
//! - `trees/` - Git work trees
//! - `repos/` - Git repositories work trees are created from
//! - `logs/` - Event journal

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const RUNFLOW_DIR: &str = ".runflow";

/// Returns `~/.runflow/`, creating it when missing.
pub fn runflow_home_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory for runflow storage")?;
    let dir = home.join(RUNFLOW_DIR);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create runflow directory: {}", dir.display()))?;
    Ok(dir)
}

/// Returns `~/.runflow/config.yaml`. The file itself may not exist.
pub fn config_path() -> Result<PathBuf> {
    Ok(runflow_home_dir()?.join("config.yaml"))
}

/// Every directory the engine writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunflowPaths {
    pub runs: PathBuf,
    pub spaces: PathBuf,
    pub trees: PathBuf,
    pub repos: PathBuf,
    pub logs: PathBuf,
}

impl RunflowPaths {
    /// Lays the directories out under `root` without creating them.
    pub fn under(root: &Path) -> Self {
        Self {
            runs: root.join("runs"),
            spaces: root.join("spaces"),
            trees: root.join("trees"),
            repos: root.join("repos"),
            logs: root.join("logs"),
        }
    }

    /// `~/.runflow/` layout.
    pub fn home() -> Result<Self> {
        Ok(Self::under(&runflow_home_dir()?))
    }

    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.runs, &self.spaces, &self.trees, &self.repos, &self.logs] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/paths_tests.rs"]
mod tests;
