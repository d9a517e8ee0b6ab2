//! Integration tests for the ccmd binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn ccmd() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("ccmd").unwrap();
    cmd.env_remove("CCMD_CACHE").env_remove("RUST_LOG");
    cmd
}

fn cache_uri(dir: &Path) -> String {
    format!("local://{}", dir.display())
}

#[test]
fn test_version() {
    ccmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("ccmd ").and(predicate::str::contains(env!(
            "CARGO_PKG_VERSION"
        ))));
}

#[test]
fn test_key_prints_sixteen_hex_digits() {
    let work = TempDir::new().unwrap();
    fs::write(work.path().join("a.txt"), "hi").unwrap();

    ccmd()
        .current_dir(work.path())
        .args(["key", "-i", "*.txt", "-c", "true"])
        .assert()
        .success()
        .stdout(predicate::str::is_match("^[0-9a-f]{16}\n$").unwrap());
}

#[test]
fn test_key_is_the_same_from_any_directory() {
    let work = TempDir::new().unwrap();
    fs::write(work.path().join("a.txt"), "hi").unwrap();

    let inside = ccmd()
        .current_dir(work.path())
        .args(["key", "-i", "*.txt"])
        .output()
        .unwrap();
    let outside = ccmd()
        .arg("key")
        .arg("-i")
        .arg("*.txt")
        .arg("--cwd")
        .arg(work.path())
        .output()
        .unwrap();

    assert!(inside.status.success());
    assert_eq!(inside.stdout, outside.stdout);
}

#[cfg(unix)]
#[test]
fn test_run_misses_then_restores() {
    let work = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    fs::write(work.path().join("a.txt"), "hi").unwrap();
    let cache = cache_uri(cache.path());
    let args = [
        "run",
        "-i",
        "**/*.txt",
        "-o",
        "out.txt",
        "-c",
        "cp a.txt out.txt && echo built",
        "--cache",
        cache.as_str(),
    ];

    ccmd()
        .current_dir(work.path())
        .args(args)
        .assert()
        .success()
        .stdout(predicate::str::contains("built"))
        .stderr(predicate::str::contains(" + out.txt"));

    fs::remove_file(work.path().join("out.txt")).unwrap();

    ccmd()
        .current_dir(work.path())
        .args(args)
        .assert()
        .success()
        .stdout(predicate::str::contains("built").not())
        .stderr(predicate::str::contains(" -> out.txt"));

    assert_eq!(
        fs::read_to_string(work.path().join("out.txt")).unwrap(),
        "hi"
    );
}

#[cfg(unix)]
#[test]
fn test_cache_from_environment_and_config_file() {
    let work = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    fs::write(work.path().join("a.txt"), "hi").unwrap();
    fs::write(
        work.path().join("ccmd.toml"),
        "inputs = [\"a.txt\"]\noutputs = [\"out.txt\"]\ncommand = \"cp a.txt out.txt\"\n",
    )
    .unwrap();

    ccmd()
        .current_dir(work.path())
        .env("CCMD_CACHE", cache_uri(cache.path()))
        .arg("run")
        .assert()
        .success();

    assert_eq!(fs::read_dir(cache.path()).unwrap().count(), 1);
}

#[test]
fn test_no_matching_inputs_fails() {
    let work = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();

    ccmd()
        .current_dir(work.path())
        .args(["run", "-i", "*.txt", "-o", "out", "-c", "true", "--cache"])
        .arg(cache_uri(cache.path()))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Did not find any input files"));
}

#[test]
fn test_parent_patterns_are_rejected() {
    let work = TempDir::new().unwrap();

    ccmd()
        .current_dir(work.path())
        .args(["key", "-i", "../*.txt"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--cwd"));
}

#[test]
fn test_unknown_provider_is_rejected_before_running() {
    let work = TempDir::new().unwrap();
    fs::write(work.path().join("a.txt"), "hi").unwrap();

    ccmd()
        .current_dir(work.path())
        .args([
            "run", "-i", "a.txt", "-o", "out.txt", "-c", "touch ran", "--cache", "ftp://x",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unsupported cache provider"));

    assert!(!work.path().join("ran").exists());
}

#[cfg(unix)]
#[test]
fn test_failing_command_exits_non_zero() {
    let work = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    fs::write(work.path().join("a.txt"), "hi").unwrap();

    ccmd()
        .current_dir(work.path())
        .args(["run", "-i", "a.txt", "-o", "out.txt", "-c", "exit 4", "--cache"])
        .arg(cache_uri(cache.path()))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("exit code 4"));

    assert_eq!(fs::read_dir(cache.path()).unwrap().count(), 0);
}
