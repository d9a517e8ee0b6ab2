//! Subcommand implementations

#![allow(clippy::print_stdout)]

use crate::cli::{CliError, Commands, RunArgs};
use crate::config::{Mode, Settings};
use crate::console::{Console, StdioSink};
use ccmd_cache::{Fingerprint, Orchestrator, Provider};
use std::sync::Arc;

/// Package version reported by `ccmd version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Execute one subcommand.
pub async fn execute(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Run(args) => run(&args).await,
        Commands::Key(args) => {
            println!("{}", key(&args)?);
            Ok(())
        }
        Commands::Version => {
            println!("ccmd {VERSION}");
            Ok(())
        }
    }
}

#[tracing::instrument(name = "run", skip_all)]
async fn run(args: &RunArgs) -> Result<(), CliError> {
    let settings = Settings::resolve(args, Mode::Run)?;
    let providers = settings.providers()?;

    let console = Console::new();
    console.print(&[
        console.setting(
            "Using working directory",
            &settings.run.working_dir.display().to_string(),
        ),
        console.setting("Cache providers", &settings.cache.join(", ")),
    ]);

    let report = Orchestrator::new(providers)
        .with_sink(Arc::new(StdioSink))
        .run(&settings.run)
        .await?;

    tracing::info!(
        key = %report.key,
        hit = report.is_hit(),
        total_ms = report.timings.total().as_millis(),
        "Run finished"
    );
    console.print(&console.summary(&report, &settings.run.working_dir));
    Ok(())
}

/// Resolve settings and compute the cache key without running anything.
///
/// Providers are not contacted, so an unreachable cache does not stop CI
/// from naming its artefacts.
pub fn key(args: &RunArgs) -> Result<Fingerprint, CliError> {
    let settings = Settings::resolve(args, Mode::Key)?;
    let (files, key) = Orchestrator::<Provider>::new(Vec::new()).compute_key(&settings.run)?;
    tracing::info!(key = %key, input_files = files.len(), "Computed cache key");
    Ok(key)
}
