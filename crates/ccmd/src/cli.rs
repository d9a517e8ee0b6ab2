//! Command line definition, CLI errors and exit codes

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use crate::tracing::{LogLevel, TracingFormat};
use clap::{Args, Parser, Subcommand};
use miette::{Diagnostic, NamedSource, Report, SourceSpan};
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the CLI application
pub const EXIT_OK: i32 = 0;
/// Any failure: bad configuration, failed command, unreachable cache
pub const EXIT_FAILURE: i32 = 1;

/// CLI-specific error types
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Invalid arguments or configuration values
    #[error("Configuration error: {message}")]
    #[diagnostic(code(ccmd::cli::config))]
    Config {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },

    /// The configuration file is not valid TOML or has unknown keys
    #[error("Failed to parse {}: {message}", src.name())]
    #[diagnostic(
        code(ccmd::cli::config_parse),
        help("Valid keys are inputs, outputs, ignore, command, cache and exclude_outputs")
    )]
    ConfigParse {
        /// Parser message
        message: String,
        /// File contents
        #[source_code]
        src: NamedSource<String>,
        /// Location of the problem, when the parser knows it
        #[label("here")]
        span: Option<SourceSpan>,
    },

    /// A failure reported by the cache engine
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] ccmd_cache::Error),
}

impl CliError {
    /// Create a new configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a new configuration error with help text
    #[must_use]
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

/// Render an error to stderr as a miette report.
#[allow(clippy::print_stderr)]
pub fn render_error(err: CliError) {
    let report = Report::new(err);
    eprintln!("{report:?}");
    let _ = io::stderr().flush();
}

/// Top-level command line.
#[derive(Parser, Debug)]
#[command(
    name = "ccmd",
    version,
    about = "Run a command once per distinct set of inputs and restore its outputs from a cache",
    propagate_version = true
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Logging verbosity level.
    #[arg(
        short = 'L',
        long,
        global = true,
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub level: LogLevel,

    /// Log output format.
    #[arg(
        long,
        global = true,
        help = "Log output format",
        default_value = "compact",
        value_enum
    )]
    pub format: TracingFormat,

    /// Emit logs as JSON regardless of format.
    #[arg(long, global = true, help = "Emit logs as JSON regardless of --format")]
    pub json: bool,
}

impl Cli {
    /// Log format after applying `--json`.
    #[must_use]
    pub const fn tracing_format(&self) -> TracingFormat {
        if self.json {
            TracingFormat::Json
        } else {
            self.format
        }
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command, or restore its outputs if the inputs were seen before
    Run(RunArgs),
    /// Print the cache key for the current inputs without running anything
    Key(RunArgs),
    /// Print version information
    Version,
}

/// Options shared by `run` and `key`.
///
/// Every option can also come from `ccmd.toml`. Values given here win.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct RunArgs {
    /// Glob selecting files that determine the cache key
    #[arg(short = 'i', long = "input", value_name = "GLOB")]
    pub inputs: Vec<String>,

    /// Glob selecting files the command produces
    #[arg(short = 'o', long = "output", value_name = "GLOB")]
    pub outputs: Vec<String>,

    /// Shell command to run on a cache miss
    #[arg(short = 'c', long, value_name = "CMD")]
    pub command: Option<String>,

    /// Glob removed from input discovery
    #[arg(long = "ignore", value_name = "GLOB")]
    pub ignore: Vec<String>,

    /// Directory to match patterns against and run the command in
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Cache provider URI, consulted in the order given
    #[arg(
        long = "cache",
        value_name = "URI",
        env = "CCMD_CACHE",
        value_delimiter = ','
    )]
    pub cache: Vec<String>,

    /// Do not treat files matching the output patterns as inputs
    #[arg(long)]
    pub exclude_outputs: bool,

    /// Configuration file (default: ccmd.toml in the working directory)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Parse the process arguments.
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}
