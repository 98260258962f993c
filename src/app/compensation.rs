//! Undo log for multi-step side effects.
//!
//! Each side-effecting step pushes the action that undoes it. When a later
//! step fails the caller unwinds the stack: actions run newest first, and a
//! failing action is logged without stopping the rest.

use crate::domain::WorkflowResult;
use futures::future::BoxFuture;
use tracing::{debug, warn};

type Compensation = Box<dyn FnOnce() -> BoxFuture<'static, WorkflowResult<()>> + Send>;

#[derive(Default)]
pub struct CompensationStack {
    actions: Vec<(String, Compensation)>,
}

impl CompensationStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&mut self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> BoxFuture<'static, WorkflowResult<()>> + Send + 'static,
    {
        self.actions.push((label.into(), Box::new(action)));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Forgets every action; call once the whole operation succeeded.
    pub fn clear(&mut self) {
        self.actions.clear();
    }

    /// Runs every action in reverse push order. Returns the labels of the
    /// actions that failed.
    pub async fn unwind(&mut self) -> Vec<String> {
        let mut failed = Vec::new();
        while let Some((label, action)) = self.actions.pop() {
            match action().await {
                Ok(()) => debug!(compensation = %label, "compensated"),
                Err(err) => {
                    warn!(compensation = %label, error = %err, "compensation failed");
                    failed.push(label);
                }
            }
        }
        failed
    }
}

#[cfg(test)]
#[path = "tests/compensation_tests.rs"]
mod tests;
