use super::*;
use crate::domain::WorkExecutionFactory;
use crate::testing::running_run;

#[test]
fn work_tree_plan_is_scoped_to_run_and_repository() {
    let run = running_run(1);
    let tree = WorkTree::plan(&run, GitId::from("api"), "main", Path::new("/data/trees"));

    assert_eq!(
        tree.path(),
        Path::new("/data/trees").join(run.id().to_string()).join("api")
    );
    assert!(tree.branch().as_str().starts_with("runflow/PROJ-42-api-"));
    assert_eq!(tree.base_branch(), "main");
}

#[test]
fn work_space_links_every_tree_and_the_reports_dir() {
    let run = running_run(1);
    let config = run.current_work_node().cloned().unwrap();
    let execution = WorkExecutionFactory::build(&run, &config).unwrap().execution;
    let trees = vec![
        WorkTree::plan(&run, GitId::from("api"), "main", Path::new("/t")),
        WorkTree::plan(&run, GitId::from("web"), "main", Path::new("/t")),
    ];
    let mut space = WorkflowSpace::for_run(run.id(), Path::new("/s"));

    let ws = space.add_work_space(&execution, &trees).unwrap().clone();

    assert_eq!(
        ws.path,
        space
            .works_dir()
            .join(format!("000-{}", execution.id().short()))
    );
    assert_eq!(ws.links.len(), 3);
    assert_eq!(ws.links[0].link, ws.path.join("trees").join("api"));
    assert_eq!(ws.links[0].target, trees[0].path());
    assert_eq!(ws.links[2].kind, SymLinkKind::Reports);
    assert_eq!(ws.links[2].target, space.reports_dir());

    assert!(space.add_work_space(&execution, &trees).is_err());
}

#[test]
fn work_space_for_foreign_execution_is_rejected() {
    let run = running_run(1);
    let other = running_run(1);
    let config = other.current_work_node().cloned().unwrap();
    let execution = WorkExecutionFactory::build(&other, &config).unwrap().execution;
    let mut space = WorkflowSpace::for_run(run.id(), Path::new("/s"));
    assert!(space.add_work_space(&execution, &[]).is_err());
}

#[test]
fn remove_work_spaces_returns_only_matching_entries() {
    let run = running_run(1);
    let config = run.current_work_node().cloned().unwrap();
    let a = WorkExecutionFactory::build(&run, &config).unwrap().execution;
    let b = WorkExecutionFactory::build(&run, &config).unwrap().execution;
    let mut space = WorkflowSpace::for_run(run.id(), Path::new("/s"));
    space.add_work_space(&a, &[]).unwrap();
    space.add_work_space(&b, &[]).unwrap();

    let removed = space.remove_work_spaces(&[b.id()]);

    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].work_execution_id, b.id());
    assert!(space.work_space_for(a.id()).is_some());
    assert!(space.work_space_for(b.id()).is_none());
}
