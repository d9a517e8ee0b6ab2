//! ccmd binary entry point

// CLI binary needs to output to stdout/stderr - this is intentional
#![allow(clippy::print_stdout, clippy::print_stderr)]

use ccmd::cli::{self, Cli, EXIT_FAILURE, EXIT_OK, render_error};
use ccmd::commands;
use ccmd::tracing::{TracingConfig, init_tracing};

fn main() {
    // NOTE: eprintln! is used because tracing may be unusable during a panic.
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panicked: {panic_info}");
        eprintln!("Internal error occurred. Run with RUST_LOG=debug for more information.");
    }));

    let cli = cli::parse();

    let tracing_config = TracingConfig {
        format: cli.tracing_format(),
        level: cli.level.into(),
        ..TracingConfig::default()
    };
    if let Err(e) = init_tracing(tracing_config) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    std::process::exit(run_with_tokio(cli));
}

fn run_with_tokio(cli: Cli) -> i32 {
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Fatal error: Failed to create tokio runtime: {e}");
            return EXIT_FAILURE;
        }
    };

    match rt.block_on(commands::execute(cli.command)) {
        Ok(()) => EXIT_OK,
        Err(err) => {
            tracing::debug!(error = %err, "Command failed");
            render_error(err);
            EXIT_FAILURE
        }
    }
}
