//! Structured JSONL journal of domain events.
//!
//! Each line carries a monotonic sequence number, a microsecond timestamp,
//! the run the entry belongs to (when any), the emitting component and the
//! serialized event. The journal is append-only and meant for audit and
//! offline reconstruction; nothing in the engine reads it back.

use crate::domain::{PipelineEvent, RunEvent};
use anyhow::Context;
use chrono::Utc;
use cqrs_es::DomainEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct StructuredLogger {
    seq: AtomicU64,
    log_file: Mutex<File>,
    log_path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub ts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub component: String,
    pub event_type: String,
    pub event: Value,
}

impl StructuredLogger {
    /// Opens `<logs_dir>/events.jsonl` for appending.
    pub fn new(logs_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(logs_dir)
            .with_context(|| format!("creating logs dir {}", logs_dir.display()))?;
        let log_path = logs_dir.join("events.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("opening journal {}", log_path.display()))?;

        Ok(Self {
            seq: AtomicU64::new(0),
            log_file: Mutex::new(file),
            log_path,
        })
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Appends one entry. Write failures are dropped; the journal never
    /// fails the operation being journaled.
    pub fn log(&self, component: &str, run_id: Option<String>, event_type: &str, event: impl Serialize) {
        let entry = LogEntry {
            seq: self.next_seq(),
            ts: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            run_id,
            component: component.to_string(),
            event_type: event_type.to_string(),
            event: serde_json::to_value(event).unwrap_or(Value::Null),
        };

        if let Ok(mut file) = self.log_file.lock() {
            if let Ok(line) = serde_json::to_string(&entry) {
                let _ = writeln!(file, "{}", line);
                let _ = file.flush();
            }
        }
    }

    pub fn log_run_event(&self, event: &RunEvent) {
        let component = match event {
            RunEvent::Pipeline(_) => "Pipeline",
            RunEvent::CheckpointCreated { .. } | RunEvent::CheckpointRestored { .. } => "Checkpoint",
            _ => "Run",
        };
        self.log(
            component,
            event.run_id().map(|id| id.to_string()),
            &event.event_type(),
            event,
        );
    }

    /// Journals a pipeline event that failed to apply.
    pub fn log_rejected_pipeline_event(&self, event: &PipelineEvent, reason: &str) {
        self.log(
            "Pipeline",
            event.run_id().map(|id| id.to_string()),
            "PipelineEventRejected",
            serde_json::json!({ "event": event, "reason": reason }),
        );
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

#[cfg(test)]
#[path = "tests/structured_logger_tests.rs"]
mod tests;
