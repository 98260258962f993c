use super::*;
use crate::domain::WorkflowError;
use futures::FutureExt;
use std::sync::{Arc, Mutex};

fn recording(
    log: &Arc<Mutex<Vec<&'static str>>>,
    name: &'static str,
    fail: bool,
) -> impl FnOnce() -> BoxFuture<'static, WorkflowResult<()>> + Send + 'static {
    let log = log.clone();
    move || {
        async move {
            log.lock().unwrap().push(name);
            if fail {
                Err(WorkflowError::infra("undo", name))
            } else {
                Ok(())
            }
        }
        .boxed()
    }
}

#[tokio::test]
async fn unwind_runs_actions_newest_first() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut stack = CompensationStack::new();
    stack.push("A", recording(&log, "A", false));
    stack.push("B", recording(&log, "B", false));
    stack.push("C", recording(&log, "C", false));

    let failed = stack.unwind().await;

    assert!(failed.is_empty());
    assert_eq!(*log.lock().unwrap(), vec!["C", "B", "A"]);
    assert!(stack.is_empty());
}

#[tokio::test]
async fn failing_action_does_not_stop_older_ones() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut stack = CompensationStack::new();
    stack.push("A", recording(&log, "A", false));
    stack.push("B", recording(&log, "B", true));
    stack.push("C", recording(&log, "C", false));

    let failed = stack.unwind().await;

    assert_eq!(failed, vec!["B".to_string()]);
    assert_eq!(*log.lock().unwrap(), vec!["C", "B", "A"]);
}

#[tokio::test]
async fn cleared_stack_runs_nothing() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut stack = CompensationStack::new();
    stack.push("A", recording(&log, "A", false));
    assert_eq!(stack.len(), 1);

    stack.clear();
    stack.unwind().await;

    assert!(log.lock().unwrap().is_empty());
}
