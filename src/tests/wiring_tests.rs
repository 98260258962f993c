use super::*;
use crate::domain::RunStatus;
use crate::testing::{layout, new_run, node, test_app};
use tempfile::tempdir;

#[tokio::test]
async fn startup_seeds_only_an_empty_store() {
    let app = test_app();

    let first = app
        .engine
        .startup(Some(new_run(vec![node(&["g1"], false)])))
        .await
        .unwrap();
    let seeded = first.seeded.unwrap();
    assert!(first.recovered.is_empty());

    let second = app
        .engine
        .startup(Some(new_run(vec![node(&["g1"], false)])))
        .await
        .unwrap();
    assert_eq!(second, StartupReport::default());
    let runs = app.engine.queries.runs().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].id(), seeded);
}

#[tokio::test]
async fn startup_pauses_orphans_before_seeding() {
    let app = test_app();
    let run = app.started_run(1).await;

    let report = app.engine.startup(None).await.unwrap();

    assert_eq!(report.recovered, vec![run.id()]);
    assert_eq!(report.seeded, None);
    assert_eq!(app.stored_run(run.id()).await.status(), RunStatus::Paused);
}

#[tokio::test]
async fn in_memory_context_uses_given_layout() {
    let (ctx, _mem) = in_memory(layout(), RetryPolicy::default());
    assert_eq!(ctx.layout.trees_root, layout().trees_root);
    assert_eq!(ctx.retry, RetryPolicy::default());
}

#[tokio::test]
async fn file_backed_runs_survive_a_new_context() {
    let dir = tempdir().unwrap();
    let paths = RunflowPaths::under(dir.path());
    paths.ensure().unwrap();
    let journal = Arc::new(StructuredLogger::new(&paths.logs).unwrap());
    let config = EngineConfig::default();

    let ctx = file_backed(&paths, RetryPolicy::default(), Some(journal.clone())).unwrap();
    let engine = Engine::new(ctx, &config);
    let run = engine
        .create_run
        .create(new_run(vec![node(&["g1"], false)]))
        .await
        .unwrap();
    let space = engine.ctx.repos.spaces.get_for_run(run.id()).await.unwrap();
    assert!(space.root().starts_with(&paths.spaces));
    assert!(space.reports_dir().is_dir());
    drop(engine);

    let reopened = Engine::new(
        file_backed(&paths, RetryPolicy::default(), None).unwrap(),
        &config,
    );
    let stored = reopened.queries.run(run.id()).await.unwrap();
    assert_eq!(stored.status(), RunStatus::Initialized);
    assert_eq!(stored.version(), run.version());
    assert_eq!(stored.work_node_configs().len(), 1);

    let journaled = std::fs::read_to_string(journal.path()).unwrap();
    assert!(journaled.contains("RunCreated"));
}
