use super::*;

#[test]
fn commit_hash_accepts_forty_hex_chars_and_lowercases() {
    let hash = CommitHash::parse("ABCDEF0123456789abcdef0123456789ABCDEF01").unwrap();
    assert_eq!(hash.as_str(), "abcdef0123456789abcdef0123456789abcdef01");
}

#[test]
fn commit_hash_rejects_short_and_non_hex_values() {
    assert!(CommitHash::parse("abc123").is_err());
    assert!(CommitHash::parse(&"g".repeat(40)).is_err());
    assert!(CommitHash::parse(&"a".repeat(41)).is_err());
}

#[test]
fn commit_hash_deserialization_validates() {
    let ok: Result<CommitHash, _> = serde_json::from_str(&format!("\"{}\"", "b".repeat(40)));
    assert!(ok.is_ok());
    let bad: Result<CommitHash, _> = serde_json::from_str("\"nothex\"");
    assert!(bad.is_err());
}

#[test]
fn branch_name_rejects_git_ref_violations() {
    for bad in ["", "/lead", "trail/", "a..b", "has space", "x.lock", "-dash", "a~1", "@"] {
        assert!(BranchName::parse(bad).is_err(), "{bad:?} should be rejected");
    }
    assert!(BranchName::parse("feature/PROJ-1-fix").is_ok());
}

#[test]
fn branch_for_run_sanitizes_label_and_appends_run_short_id() {
    let run_id = WorkflowRunId::new();
    let branch = BranchName::for_run("PROJ 12/api:v2", &run_id);
    assert_eq!(
        branch.as_str(),
        format!("runflow/PROJ-12-api-v2-{}", run_id.short())
    );
    assert!(BranchName::parse(branch.as_str()).is_ok());
}

#[test]
fn branch_for_run_falls_back_when_label_has_no_usable_chars() {
    let run_id = WorkflowRunId::new();
    let branch = BranchName::for_run("///", &run_id);
    assert_eq!(branch.as_str(), format!("runflow/run-{}", run_id.short()));
}

#[test]
fn uuid_ids_round_trip_through_strings() {
    let id = CheckpointId::new();
    assert_eq!(CheckpointId::from_string(&id.to_string()).unwrap(), id);
    assert_eq!(id.short().len(), 8);
    assert!(WorkflowRunId::from_string("not-a-uuid").is_err());
}

#[test]
fn timestamps_order_chronologically() {
    let earlier = TimestampUtc::now();
    let later = TimestampUtc(earlier.0 + chrono::Duration::seconds(1));
    assert!(earlier < later);
    assert!(later.to_rfc3339().contains('T'));
}
