use std::path::{Path, PathBuf};
use std::process::Command;

const MAX_LINES: usize = 750;

const CHECKED_EXTENSIONS: &[&str] = &["rs", "md", "yaml", "toml"];

const EXCLUDED_DIRS: &[&str] = &["target", ".git", "examples"];

const SKIP_PATTERNS: &[&str] = &["Skipping test", "skipping test", "Test skipped", "test skipped"];

struct Violation {
    path: PathBuf,
    line: Option<usize>,
    detail: String,
}

fn main() {
    println!("cargo:rerun-if-env-changed=RUNFLOW_GIT_SHA");
    println!("cargo:rustc-env=RUNFLOW_GIT_SHA={}", build_revision());

    let root = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR must be set"));
    let mut files = Vec::new();
    walk_directory(&root, &mut files);
    for file in &files {
        println!("cargo:rerun-if-changed={}", file.display());
    }
    let sources: Vec<&PathBuf> = files
        .iter()
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("rs") && !p.ends_with("build.rs"))
        .collect();

    report(
        &format!("FILE LINE LIMIT EXCEEDED (max {} lines)", MAX_LINES),
        "Split these files into smaller modules.",
        line_limit_violations(&root, &files),
    );
    report(
        "#[allow(dead_code)] IS NOT ALLOWED",
        "Delete unused code, or gate test-only code behind #[cfg(test)].",
        line_violations(&root, &sources, |line| {
            let trimmed = line.trim();
            ((trimmed.starts_with("#[allow(") || trimmed.starts_with("#![allow("))
                && trimmed.contains("dead_code"))
            .then(|| trimmed.to_string())
        }),
    );
    report(
        "SILENT TEST SKIPS ARE NOT ALLOWED",
        "If a test can't run, it should FAIL, not silently pass.",
        line_violations(&root, &sources, |line| {
            SKIP_PATTERNS
                .iter()
                .find(|p| line.contains(*p))
                .map(|p| format!("contains skip pattern: {}", p))
        }),
    );
    report(
        "UNREFERENCED TEST FILES",
        "Attach each tests/*_tests.rs file with #[path = \"tests/<file>\"] in its module.",
        orphaned_test_files(&root, &sources),
    );
}

/// Commit the binary is built from; `RUNFLOW_GIT_SHA` wins over git.
fn build_revision() -> String {
    if let Ok(sha) = std::env::var("RUNFLOW_GIT_SHA") {
        return sha;
    }
    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn walk_directory(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if path.is_dir() {
            if !EXCLUDED_DIRS.contains(&name.as_ref()) {
                walk_directory(&path, files);
            }
        } else if name != "Cargo.lock"
            && path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| CHECKED_EXTENSIONS.contains(&ext))
        {
            files.push(path);
        }
    }
}

fn relative(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

fn line_limit_violations(root: &Path, files: &[PathBuf]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for file in files {
        match std::fs::read_to_string(file) {
            Ok(content) => {
                let lines = content.lines().filter(|line| !line.trim().is_empty()).count();
                if lines > MAX_LINES {
                    violations.push(Violation {
                        path: relative(root, file),
                        line: None,
                        detail: format!("{} lines (exceeds by {})", lines, lines - MAX_LINES),
                    });
                }
            }
            Err(e) => println!(
                "cargo:warning=Could not read file {}: {}",
                relative(root, file).display(),
                e
            ),
        }
    }
    violations
}

fn line_violations(
    root: &Path,
    sources: &[&PathBuf],
    check: impl Fn(&str) -> Option<String>,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    for file in sources {
        let Ok(content) = std::fs::read_to_string(file) else {
            continue;
        };
        for (index, line) in content.lines().enumerate() {
            if let Some(detail) = check(line) {
                violations.push(Violation {
                    path: relative(root, file),
                    line: Some(index + 1),
                    detail,
                });
            }
        }
    }
    violations
}

/// `src/<dir>/tests/x_tests.rs` only compiles when a module in `src/<dir>`
/// attaches it with `#[path = "tests/x_tests.rs"]`.
fn orphaned_test_files(root: &Path, sources: &[&PathBuf]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for file in sources {
        let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(tests_dir) = file.parent().filter(|p| p.ends_with("tests")) else {
            continue;
        };
        let Some(module_dir) = tests_dir.parent() else {
            continue;
        };
        if !name.ends_with("_tests.rs") || !module_dir.starts_with(root.join("src")) {
            continue;
        }
        let needle = format!("\"tests/{}\"", name);
        let attached = sources.iter().any(|candidate| {
            candidate.parent() == Some(module_dir)
                && std::fs::read_to_string(candidate).is_ok_and(|c| c.contains(&needle))
        });
        if !attached {
            violations.push(Violation {
                path: relative(root, file),
                line: None,
                detail: "not attached to any module".to_string(),
            });
        }
    }
    violations
}

fn report(title: &str, hint: &str, violations: Vec<Violation>) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n========================================");
    eprintln!("{}", title);
    eprintln!("========================================");
    for violation in &violations {
        match violation.line {
            Some(line) => eprintln!("  {}:{} {}", violation.path.display(), line, violation.detail),
            None => eprintln!("  {} - {}", violation.path.display(), violation.detail),
        }
    }
    eprintln!("\n{}\n", hint);
    panic!("Build failed: {} ({} occurrence(s))", title, violations.len());
}
