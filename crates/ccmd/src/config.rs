//! Layered run configuration
//!
//! Values come from, in order of precedence: command line flags, the
//! `CCMD_CACHE` environment variable (cache providers only), `ccmd.toml`,
//! then built-in defaults. Everything is validated before any file is read
//! for fingerprinting.

use crate::cli::{CliError, RunArgs};
use ccmd_cache::{CacheProvider, Provider, RunConfig};
use miette::{NamedSource, SourceSpan};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// File looked up in the working directory when `--config` is not given.
pub const CONFIG_FILE: &str = "ccmd.toml";

/// Provider used when none is configured anywhere.
pub const DEFAULT_CACHE: &str = "local://~/.ccmd";

/// Contents of `ccmd.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Input globs
    pub inputs: Vec<String>,
    /// Output globs
    pub outputs: Vec<String>,
    /// Globs removed from input discovery
    pub ignore: Vec<String>,
    /// Shell command
    pub command: Option<String>,
    /// Provider URIs
    pub cache: Vec<String>,
    /// Exclude outputs from input discovery
    pub exclude_outputs: Option<bool>,
}

impl FileConfig {
    /// Parse TOML text. `name` labels the source in error reports.
    pub fn parse(text: &str, name: &str) -> Result<Self, CliError> {
        toml::from_str(text).map_err(|e| CliError::ConfigParse {
            message: e.message().to_string(),
            span: e.span().map(SourceSpan::from),
            src: NamedSource::new(name, text.to_string()),
        })
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CliError::config(format!(
                "cannot read configuration file {}: {e}",
                path.display()
            ))
        })?;
        tracing::debug!(path = %path.display(), "Loaded configuration file");
        Self::parse(&text, &path.display().to_string())
    }
}

/// Which subcommand the settings are for; `run` needs more than `key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Full memoised run
    Run,
    /// Key computation only
    Key,
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// What the orchestrator runs
    pub run: RunConfig,
    /// Provider URIs in lookup order
    pub cache: Vec<String>,
}

impl Settings {
    /// Resolve flags, environment and configuration file, then validate.
    pub fn resolve(args: &RunArgs, mode: Mode) -> Result<Self, CliError> {
        let working_dir = working_dir(args.cwd.as_deref())?;

        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => {
                let candidate = working_dir.join(CONFIG_FILE);
                if candidate.is_file() {
                    FileConfig::load(&candidate)?
                } else {
                    FileConfig::default()
                }
            }
        };

        let settings = Self::merge(args, file, working_dir);
        settings.validate(mode)?;
        Ok(settings)
    }

    /// Combine flags with file values. Flags replace file values per key.
    #[must_use]
    pub fn merge(args: &RunArgs, file: FileConfig, working_dir: PathBuf) -> Self {
        fn pick(flag: &[String], file: Vec<String>) -> Vec<String> {
            if flag.is_empty() { file } else { flag.to_vec() }
        }

        let mut cache = pick(&args.cache, file.cache);
        if cache.is_empty() {
            cache.push(DEFAULT_CACHE.to_string());
        }

        Self {
            run: RunConfig {
                working_dir,
                inputs: pick(&args.inputs, file.inputs),
                ignore: pick(&args.ignore, file.ignore),
                command: args.command.clone().or(file.command).unwrap_or_default(),
                outputs: pick(&args.outputs, file.outputs),
                exclude_outputs: args.exclude_outputs || file.exclude_outputs.unwrap_or(false),
            },
            cache,
        }
    }

    /// Check the settings without touching the filesystem.
    pub fn validate(&self, mode: Mode) -> Result<(), CliError> {
        if self.run.inputs.is_empty() {
            return Err(CliError::config_with_help(
                "no input patterns given",
                "Pass --input <GLOB> or set `inputs` in ccmd.toml",
            ));
        }
        if let Some(pattern) = self.run.inputs.iter().find(|p| p.contains("../")) {
            return Err(CliError::config_with_help(
                format!("input pattern '{pattern}' reaches outside the working directory"),
                "Use --cwd to change to the parent directory instead",
            ));
        }
        if mode == Mode::Run {
            if self.run.outputs.is_empty() {
                return Err(CliError::config_with_help(
                    "no output patterns given",
                    "Pass --output <GLOB> or set `outputs` in ccmd.toml",
                ));
            }
            if self.run.command.trim().is_empty() {
                return Err(CliError::config_with_help(
                    "no command given",
                    "Pass --command <CMD> or set `command` in ccmd.toml",
                ));
            }
        }
        Ok(())
    }

    /// Build and validate every configured provider.
    pub fn providers(&self) -> Result<Vec<Provider>, CliError> {
        self.cache
            .iter()
            .map(|uri| {
                let provider = Provider::from_uri(uri)?;
                provider.validate()?;
                tracing::debug!(
                    uri = provider.uri(),
                    kind = provider.friendly_name(),
                    "Configured cache provider"
                );
                Ok(provider)
            })
            .collect()
    }
}

fn working_dir(cwd: Option<&Path>) -> Result<PathBuf, CliError> {
    let dir = match cwd {
        Some(dir) => std::path::absolute(dir),
        None => std::env::current_dir(),
    }
    .map_err(|e| CliError::config(format!("cannot determine working directory: {e}")))?;

    if !dir.is_dir() {
        return Err(CliError::config(format!(
            "working directory {} does not exist or is not a directory",
            dir.display()
        )));
    }
    Ok(dir)
}
