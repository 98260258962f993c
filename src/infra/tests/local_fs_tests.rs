use super::*;
use tempfile::tempdir;

#[tokio::test]
async fn write_creates_parents_and_reads_back() {
    let dir = tempdir().unwrap();
    let fs = LocalFileSystem;
    let path = dir.path().join("a/b/report.md");

    fs.write_file(&path, b"# Findings").await.unwrap();

    assert_eq!(fs.read_to_string(&path).await.unwrap(), "# Findings");
    let stat = fs.stat(&path).await.unwrap().unwrap();
    assert_eq!(stat.len, 10);
    assert!(!stat.is_dir);
}

#[tokio::test]
async fn missing_file_read_is_not_found_and_removal_is_quiet() {
    let dir = tempdir().unwrap();
    let fs = LocalFileSystem;
    let path = dir.path().join("missing.txt");

    assert_eq!(fs.read_file(&path).await.unwrap_err().code(), "not_found");
    fs.remove_file(&path).await.unwrap();
    fs.remove_dir_all(&dir.path().join("nope")).await.unwrap();
    assert!(!fs.exists(&path).await.unwrap());
}

#[cfg(unix)]
#[tokio::test]
async fn symlinks_are_reported_without_following() {
    let dir = tempdir().unwrap();
    let fs = LocalFileSystem;
    let target = dir.path().join("tree");
    fs.create_dir_all(&target).await.unwrap();
    let link = dir.path().join("ws/trees/g1");

    fs.create_symlink(&target, &link).await.unwrap();

    let stat = fs.stat(&link).await.unwrap().unwrap();
    assert!(stat.is_symlink);
    let entries = fs.list_dir(&dir.path().join("ws/trees")).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "g1");
    fs.remove_symlink(&link).await.unwrap();
    assert!(fs.exists(&target).await.unwrap());
    assert!(!fs.exists(&link).await.unwrap());
}

#[tokio::test]
async fn list_dir_is_sorted_by_name() {
    let dir = tempdir().unwrap();
    let fs = LocalFileSystem;
    for name in ["c.txt", "a.txt", "b.txt"] {
        fs.write_file(&dir.path().join(name), b"x").await.unwrap();
    }
    let names: Vec<String> = fs
        .list_dir(dir.path())
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
}

#[tokio::test]
async fn copy_and_rename_move_contents() {
    let dir = tempdir().unwrap();
    let fs = LocalFileSystem;
    let original = dir.path().join("one.txt");
    fs.write_file(&original, b"data").await.unwrap();

    fs.copy(&original, &dir.path().join("two.txt")).await.unwrap();
    fs.rename(&original, &dir.path().join("three.txt")).await.unwrap();

    assert!(!fs.exists(&original).await.unwrap());
    assert_eq!(fs.read_file(&dir.path().join("two.txt")).await.unwrap(), b"data");
    assert_eq!(fs.read_file(&dir.path().join("three.txt")).await.unwrap(), b"data");
}
