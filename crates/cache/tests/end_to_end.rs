//! End-to-end runs against a real local cache directory.

#![cfg(unix)]

use ccmd_cache::{
    CacheProvider, Error, LocalProvider, MemorySink, Orchestrator, Outcome, OutputStream,
    Provider, RunConfig,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn scenario_config(dir: &Path) -> RunConfig {
    RunConfig {
        working_dir: dir.to_path_buf(),
        inputs: vec!["**/*.txt".into()],
        command: "cp a.txt out.txt".into(),
        outputs: vec!["*.txt".into()],
        ..RunConfig::default()
    }
}

fn local(dir: &Path) -> Provider {
    Provider::Local(LocalProvider::new(dir))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_run_restores_without_executing() {
    let work = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    fs::write(work.path().join("a.txt"), "hi").unwrap();
    fs::write(work.path().join("b.log"), "ignored by the input pattern").unwrap();

    let orchestrator = Orchestrator::new(vec![local(cache.path())]);
    let config = scenario_config(work.path());

    // First run: miss, the command runs and both text files are stored.
    let first = orchestrator.run(&config).await.unwrap();
    assert!(!first.is_hit());
    assert_eq!(first.input_files, 1);
    match &first.outcome {
        Outcome::Executed { files, .. } => assert_eq!(
            files,
            &vec![work.path().join("a.txt"), work.path().join("out.txt")]
        ),
        other => panic!("expected execution, got {other:?}"),
    }
    assert!(cache.path().join(first.key.to_string()).is_file());

    // Second run: out.txt is gone, the inputs are unchanged.
    fs::remove_file(work.path().join("out.txt")).unwrap();
    let sink = Arc::new(MemorySink::default());
    let second = Orchestrator::new(vec![local(cache.path())])
        .with_sink(sink.clone())
        .run(&config)
        .await
        .unwrap();

    assert!(second.is_hit());
    assert_eq!(second.key, first.key);
    assert_eq!(fs::read_to_string(work.path().join("out.txt")).unwrap(), "hi");
    assert!(sink.stream(OutputStream::Stdout).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_key_ignores_files_outside_the_input_patterns() {
    let work = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    fs::write(work.path().join("a.txt"), "hi").unwrap();
    fs::write(work.path().join("b.log"), "one").unwrap();

    let orchestrator = Orchestrator::new(vec![local(cache.path())]);
    let (files, before) = orchestrator
        .compute_key(&scenario_config(work.path()))
        .unwrap();
    assert_eq!(files.relative_paths().collect::<Vec<_>>(), vec!["a.txt"]);

    fs::write(work.path().join("b.log"), "two").unwrap();
    let (_, after) = orchestrator
        .compute_key(&scenario_config(work.path()))
        .unwrap();
    assert_eq!(before, after);

    fs::write(work.path().join("a.txt"), "changed").unwrap();
    let (_, changed) = orchestrator
        .compute_key(&scenario_config(work.path()))
        .unwrap();
    assert_ne!(before, changed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_read_replica_serves_hits_but_is_never_written() {
    let work = TempDir::new().unwrap();
    let primary = TempDir::new().unwrap();
    let replica = TempDir::new().unwrap();
    fs::write(work.path().join("a.txt"), "hi").unwrap();
    let config = scenario_config(work.path());

    // Seed the replica by running with it as the only provider.
    let seeded = Orchestrator::new(vec![local(replica.path())])
        .run(&config)
        .await
        .unwrap();
    fs::remove_file(work.path().join("out.txt")).unwrap();

    let report = Orchestrator::new(vec![local(primary.path()), local(replica.path())])
        .run(&config)
        .await
        .unwrap();

    match report.outcome {
        Outcome::Restored { provider, .. } => {
            assert_eq!(provider, LocalProvider::new(replica.path()).uri());
        }
        other => panic!("expected restore, got {other:?}"),
    }
    assert_eq!(report.key, seeded.key);
    assert_eq!(fs::read_dir(primary.path()).unwrap().count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unusable_provider_is_skipped_during_lookup_but_fatal_for_store() {
    let work = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    fs::write(work.path().join("a.txt"), "hi").unwrap();
    let not_a_dir = scratch.path().join("file");
    fs::write(&not_a_dir, "").unwrap();

    let err = Orchestrator::new(vec![local(&not_a_dir)])
        .run(&scenario_config(work.path()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Configuration { .. }), "got {err:?}");
    // The command still ran before the store was attempted.
    assert!(work.path().join("out.txt").exists());
}
