//! ccmd command line interface
//!
//! Wraps [`ccmd_cache`] with argument parsing, `ccmd.toml` configuration,
//! logging and terminal output. The binary in `main.rs` is a thin shell
//! around [`commands::execute`].

pub mod cli;
pub mod commands;
pub mod config;
pub mod console;
pub mod tracing;

pub use cli::{CliError, Cli, Commands, RunArgs};
