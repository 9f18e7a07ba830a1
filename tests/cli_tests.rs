//! CLI integration tests for the reviewflow binary
//!
//! These tests run the compiled binary against files in temporary
//! directories.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command instance for the reviewflow binary
#[allow(deprecated)]
fn reviewflow_cmd() -> Command {
    let mut cmd = Command::cargo_bin("reviewflow").expect("Failed to find reviewflow binary");
    cmd.env_remove("RUST_LOG").env("NO_COLOR", "1");
    cmd
}

fn write_file(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(&path, content).expect("Failed to write file");
    path.display().to_string()
}

// ============================================================================
// --help / --version
// ============================================================================

#[test]
fn test_help_lists_commands() {
    reviewflow_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("classify"));
}

#[test]
fn test_version_flag() {
    reviewflow_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_run_requires_targets() {
    reviewflow_cmd().arg("run").assert().failure();
}

// ============================================================================
// run
// ============================================================================

#[test]
fn test_run_clean_files_succeeds() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let a = write_file(dir.path(), "a.rs", "fn a() {}\n");
    let b = write_file(dir.path(), "b.rs", "fn b() {}\nfn c() {}\n");

    reviewflow_cmd()
        .args(["run", &a, &b])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("2 successful"))
        .stdout(predicate::str::contains("[SEQUENTIAL]"));
}

#[test]
fn test_run_reports_markers_as_warning() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let a = write_file(dir.path(), "a.rs", "// TODO: split this\nfn a() {}\n");

    reviewflow_cmd()
        .args(["run", &a])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("1 TODO/FIXME marker(s)"))
        .stdout(predicate::str::contains("1 with warnings"));
}

#[test]
fn test_double_verbose_logs_source_locations() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let a = write_file(dir.path(), "a.rs", "fn a() {}\n");

    reviewflow_cmd()
        .args(["-vv", "run", &a])
        .assert()
        .code(0)
        .stderr(predicate::str::contains("running batch"))
        .stderr(predicate::str::contains("runner.rs"));
}

#[test]
fn test_run_missing_file_exits_with_failure() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let a = write_file(dir.path(), "a.rs", "fn a() {}\n");
    let missing = dir.path().join("missing.rs").display().to_string();

    reviewflow_cmd()
        .args(["run", &a, &missing])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("FILE_NOT_FOUND"))
        .stdout(predicate::str::contains("1 failed"));
}

#[test]
fn test_run_json_report() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let a = write_file(dir.path(), "a.rs", "fn a() {}\n");
    let missing = dir.path().join("missing.rs").display().to_string();

    let output = reviewflow_cmd()
        .args(["run", "--json", "--kind", "pr", &a, &missing])
        .output()
        .expect("Failed to run reviewflow");

    assert_eq!(output.status.code(), Some(1));
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(report["mode"], "PARALLEL");
    assert_eq!(report["kind"], "PR");
    assert_eq!(report["results"][0]["status"], "SUCCESS");
    assert_eq!(report["results"][1]["status"], "ERROR");
    assert_eq!(report["results"][1]["error"]["kind"], "FILE_NOT_FOUND");
    assert_eq!(report["stats"]["failed"], 1);
}

#[test]
fn test_run_stop_on_error_skips_rest() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let missing = dir.path().join("missing.rs").display().to_string();
    let b = write_file(dir.path(), "b.rs", "fn b() {}\n");

    let output = reviewflow_cmd()
        .args(["run", "--json", "--stop-on-error", &missing, &b])
        .output()
        .expect("Failed to run reviewflow");

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(report["results"].as_array().map(Vec::len), Some(1));
    assert_eq!(report["skipped"], 1);
}

#[test]
fn test_run_directory_kind_expands_files() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    write_file(dir.path(), "src/a.rs", "fn a() {}\n");
    write_file(dir.path(), "src/nested/b.rs", "fn b() {}\n");

    let output = reviewflow_cmd()
        .args(["run", "--json", "--kind", "directory"])
        .arg(dir.path().join("src"))
        .output()
        .expect("Failed to run reviewflow");

    assert_eq!(output.status.code(), Some(0));
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(report["stats"]["total"], 2);
    assert_eq!(report["mode"], "SEQUENTIAL");
}

#[cfg(unix)]
#[test]
fn test_run_directory_kind_skips_symlink_cycle() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    write_file(dir.path(), "a.rs", "fn a() {}\n");
    std::os::unix::fs::symlink(".", dir.path().join("loop")).expect("Failed to create symlink");

    reviewflow_cmd()
        .args(["run", "--kind", "directory"])
        .arg(dir.path())
        .assert()
        .code(0)
        .stdout(predicate::str::contains("1 targets [SEQUENTIAL]: 1 successful"));
}

#[test]
fn test_run_directory_kind_honors_gitignore() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    write_file(dir.path(), ".gitignore", "target/\n");
    write_file(dir.path(), "src/a.rs", "fn a() {}\n");
    write_file(dir.path(), "target/debug/build.rs", "fn b() {}\n");
    write_file(dir.path(), ".git/HEAD", "ref: refs/heads/main\n");

    let output = reviewflow_cmd()
        .args(["run", "--json", "--kind", "directory"])
        .arg(dir.path())
        .output()
        .expect("Failed to run reviewflow");

    assert_eq!(output.status.code(), Some(0));
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    let targets: Vec<&str> = report["results"]
        .as_array()
        .expect("results should be an array")
        .iter()
        .filter_map(|r| r["target"].as_str())
        .collect();
    assert_eq!(targets.len(), 2);
    assert!(targets.iter().any(|t| t.ends_with(".gitignore")));
    assert!(targets.iter().any(|t| t.ends_with("a.rs")));
}

// ============================================================================
// configuration
// ============================================================================

#[test]
fn test_run_with_config_file() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = write_file(dir.path(), "reviewflow.toml", "[mode]\nforce_parallel = true\n");
    let a = write_file(dir.path(), "a.rs", "fn a() {}\n");

    reviewflow_cmd()
        .args(["run", "--config", &config, &a])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("[PARALLEL]"));
}

#[test]
fn test_force_sequential_wins_over_config() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = write_file(dir.path(), "reviewflow.toml", "[mode]\nforce_parallel = true\n");
    let a = write_file(dir.path(), "a.rs", "fn a() {}\n");

    reviewflow_cmd()
        .args(["run", "--force-sequential", "--config", &config, &a])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("[SEQUENTIAL]"));
}

#[test]
fn test_missing_config_exits_with_config_error() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let a = write_file(dir.path(), "a.rs", "fn a() {}\n");

    reviewflow_cmd()
        .args(["run", "--config", "/nonexistent/reviewflow.toml", &a])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("configuration file not found"));
}

#[test]
fn test_invalid_config_exits_with_config_error() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = write_file(dir.path(), "reviewflow.toml", "[executor]\nmax_errors = 0\n");
    let a = write_file(dir.path(), "a.rs", "fn a() {}\n");

    reviewflow_cmd()
        .args(["run", "--config", &config, &a])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid configuration"));
}

#[test]
fn test_environment_overrides_config_file() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = write_file(dir.path(), "reviewflow.toml", "[mode]\nforce_parallel = false\n");
    let a = write_file(dir.path(), "a.rs", "fn a() {}\n");

    reviewflow_cmd()
        .env("REVIEWFLOW__MODE__FORCE_PARALLEL", "true")
        .args(["run", "--config", &config, &a])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("[PARALLEL]"));
}

// ============================================================================
// classify
// ============================================================================

#[test]
fn test_classify_rate_limit() {
    reviewflow_cmd()
        .args(["classify", "HTTP 429 Too Many Requests"])
        .assert()
        .success()
        .stdout(predicate::str::contains("API_RATE_LIMITED"))
        .stdout(predicate::str::contains("retryable: true"))
        .stdout(predicate::str::contains("5 attempts"));
}

#[test]
fn test_classify_non_retryable() {
    reviewflow_cmd()
        .args(["classify", "401 Unauthorized"])
        .assert()
        .success()
        .stdout(predicate::str::contains("AUTHENTICATION_FAILED"))
        .stdout(predicate::str::contains("never retried"));
}
