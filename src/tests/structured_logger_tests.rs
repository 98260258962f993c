use super::*;
use crate::domain::{WorkflowId, WorkflowRunId};
use tempfile::TempDir;

fn create_test_logger() -> (StructuredLogger, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let logger = StructuredLogger::new(temp_dir.path()).expect("Failed to create logger");
    (logger, temp_dir)
}

fn read_entries(dir: &TempDir) -> Vec<LogEntry> {
    let content = std::fs::read_to_string(dir.path().join("events.jsonl"))
        .expect("Failed to read log file");
    content
        .lines()
        .map(|line| serde_json::from_str(line).expect("Failed to parse log entry"))
        .collect()
}

#[test]
fn run_events_are_journaled_with_type_and_run_id() {
    let (logger, temp_dir) = create_test_logger();
    let run_id = WorkflowRunId::new();

    logger.log_run_event(&RunEvent::RunCreated {
        run_id,
        source_workflow_id: WorkflowId::from("wf"),
    });
    logger.log_run_event(&RunEvent::CheckpointCreated {
        run_id,
        checkpoint_id: crate::domain::CheckpointId::new(),
        work_sequence: 2,
    });

    let entries = read_entries(&temp_dir);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].event_type, "RunCreated");
    assert_eq!(entries[0].component, "Run");
    assert_eq!(entries[0].run_id, Some(run_id.to_string()));
    assert_eq!(entries[1].component, "Checkpoint");
    assert_eq!(entries[1].event["checkpoint_created"]["work_sequence"], 2);
}

#[test]
fn sequence_numbers_are_monotonic() {
    let (logger, temp_dir) = create_test_logger();

    for i in 0..10 {
        logger.log("Test", None, "Iteration", serde_json::json!({"iteration": i}));
    }

    let seqs: Vec<u64> = read_entries(&temp_dir).iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (1..=10).collect::<Vec<u64>>());
}

#[test]
fn rejected_pipeline_events_keep_the_reason() {
    let (logger, temp_dir) = create_test_logger();
    let event = PipelineEvent::ReportFailed {
        report_id: crate::domain::ReportId::new(),
        reason: "timeout".to_string(),
    };

    logger.log_rejected_pipeline_event(&event, "report not found");

    let entries = read_entries(&temp_dir);
    assert_eq!(entries[0].event_type, "PipelineEventRejected");
    assert!(entries[0].run_id.is_none());
    assert_eq!(entries[0].event["reason"], "report not found");
}

#[test]
fn reopening_appends_to_the_same_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    {
        let logger = StructuredLogger::new(temp_dir.path()).unwrap();
        logger.log("Test", None, "First", serde_json::json!({}));
    }
    let logger = StructuredLogger::new(temp_dir.path()).unwrap();
    logger.log("Test", None, "Second", serde_json::json!({}));

    assert_eq!(read_entries(&temp_dir).len(), 2);
    assert!(logger.path().ends_with("events.jsonl"));
}
