//! Run-local pools of external references.
//!
//! When the external Git or MCP-server record behind an entry is deleted, the
//! entry is flagged invalid rather than removed so historical configs stay
//! inspectable. Invalid entries are never repaired automatically.

use crate::domain::types::{GitId, McpServerId};
use serde::{Deserialize, Serialize};

/// A git repository referenced by the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitRef {
    pub git_id: GitId,
    pub valid: bool,
}

impl GitRef {
    pub fn new(git_id: GitId) -> Self {
        Self { git_id, valid: true }
    }
}

/// An MCP server referenced by the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerRef {
    pub server_id: McpServerId,
    pub valid: bool,
}

impl McpServerRef {
    pub fn new(server_id: McpServerId) -> Self {
        Self {
            server_id,
            valid: true,
        }
    }
}

/// Deduplicates git ids while keeping first-seen order.
pub fn git_pool<I: IntoIterator<Item = GitId>>(ids: I) -> Vec<GitRef> {
    let mut pool: Vec<GitRef> = Vec::new();
    for id in ids {
        if !pool.iter().any(|r| r.git_id == id) {
            pool.push(GitRef::new(id));
        }
    }
    pool
}

/// Deduplicates MCP server ids while keeping first-seen order.
pub fn mcp_pool<I: IntoIterator<Item = McpServerId>>(ids: I) -> Vec<McpServerRef> {
    let mut pool: Vec<McpServerRef> = Vec::new();
    for id in ids {
        if !pool.iter().any(|r| r.server_id == id) {
            pool.push(McpServerRef::new(id));
        }
    }
    pool
}
