//! Memoised shell commands for ccmd
//!
//! This crate is the engine behind `ccmd run`:
//! - Glob-based discovery of input and output files
//! - Deterministic 64-bit cache keys over file paths, contents and the command
//! - Streaming gzip-compressed tar archives of command outputs
//! - Pluggable cache providers (a local directory or an S3 bucket)
//!
//! # Overview
//!
//! An [`Orchestrator`] takes a [`RunConfig`] and either restores the outputs
//! of a previous run from the first provider that has the key, or runs the
//! command and stores its outputs in the first provider:
//!
//! ```no_run
//! # async fn example() -> ccmd_cache::Result<()> {
//! use ccmd_cache::{Orchestrator, Provider, RunConfig};
//!
//! let providers = vec![Provider::from_uri("local://~/.ccmd")?];
//! let config = RunConfig {
//!     working_dir: ".".into(),
//!     inputs: vec!["src/**/*.rs".into(), "Cargo.toml".into()],
//!     command: "cargo build --release".into(),
//!     outputs: vec!["target/release/app".into()],
//!     ..RunConfig::default()
//! };
//! let report = Orchestrator::new(providers).run(&config).await?;
//! println!("{} (hit: {})", report.key, report.is_hit());
//! # Ok(())
//! # }
//! ```
//!
//! # Cache keys
//!
//! Keys are computed from:
//! - The slash-separated path of each input file relative to the working directory
//! - The full byte content of each input file
//! - The command string
//!
//! They do not depend on file timestamps, the host or the walk order.

mod error;

pub mod archive;
pub mod fingerprint;
pub mod matcher;
pub mod orchestrator;
pub mod output;
pub mod pipe;
pub mod provider;
pub mod runner;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use fingerprint::Fingerprint;
pub use matcher::FileSet;
pub use orchestrator::{
    CacheHit, Orchestrator, Outcome, RunConfig, RunReport, Stage, StageTimings, StoreReceipt,
};
pub use output::{MemorySink, NullSink, OutputSink, OutputStream};
pub use provider::{CacheProvider, EntryReader, LocalProvider, Provider, S3Provider};
pub use runner::CommandOutput;
