//! Error types for the cache crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(ccmd::cache::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "create")
        operation: String,
    },

    /// Configuration or validation error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(ccmd::cache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// A glob pattern could not be compiled
    #[error("Invalid glob pattern '{pattern}'")]
    #[diagnostic(
        code(ccmd::cache::pattern),
        help("Patterns use glob syntax: '*' stays within one path segment, '**' spans directories")
    )]
    InvalidPattern {
        /// The pattern as given
        pattern: String,
        /// Parser error
        #[source]
        source: globset::Error,
    },

    /// Object storage backend failure
    #[error("{}", match code { Some(code) => format!("S3 API error {code}: {message}"), None => message.clone() })]
    #[diagnostic(code(ccmd::cache::remote))]
    Remote {
        /// Backend error code (e.g. `NoSuchBucket`), absent for transport failures
        code: Option<String>,
        /// Human readable message
        message: String,
    },

    /// Malformed archive or failed extraction
    #[error("Archive error: {message}")]
    #[diagnostic(
        code(ccmd::cache::archive),
        help("The cache entry may be corrupt; remove it from the provider and run again")
    )]
    Archive {
        /// What went wrong
        message: String,
        /// Files written before the failure
        written: Vec<PathBuf>,
        /// Underlying decode or filesystem error
        #[source]
        source: Option<std::io::Error>,
    },

    /// Input discovery matched nothing
    #[error("Did not find any input files matching {patterns:?}")]
    #[diagnostic(
        code(ccmd::cache::no_inputs),
        help("Check the input patterns and the working directory")
    )]
    NoInputFiles {
        /// Patterns that were searched
        patterns: Vec<String>,
    },

    /// Output discovery matched nothing after the command ran
    #[error("Did not find any output files matching {patterns:?}, nothing to save")]
    #[diagnostic(
        code(ccmd::cache::no_outputs),
        help("Check that the command writes the files named by the output patterns")
    )]
    NoOutputFiles {
        /// Patterns that were searched
        patterns: Vec<String>,
    },

    /// The command exited unsuccessfully
    #[error("Command '{command}' failed{}", code.map_or_else(|| " (terminated by signal)".to_string(), |c| format!(" with exit code {c}")))]
    #[diagnostic(code(ccmd::cache::command))]
    CommandFailed {
        /// Command line that was run
        command: String,
        /// Exit code, if the process exited normally
        code: Option<i32>,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create an object storage error
    #[must_use]
    pub fn remote(code: Option<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }

    /// Create an archive error carrying the files already written
    #[must_use]
    pub fn archive(
        message: impl Into<String>,
        written: Vec<PathBuf>,
        source: Option<std::io::Error>,
    ) -> Self {
        Self::Archive {
            message: message.into(),
            written,
            source,
        }
    }

    /// Backend error code, when the error came from object storage
    #[must_use]
    pub fn remote_code(&self) -> Option<&str> {
        match self {
            Self::Remote { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_includes_path() {
        let err = Error::io(
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            "/tmp/cache/abc",
            "open",
        );
        assert_eq!(err.to_string(), "I/O open failed: /tmp/cache/abc");
    }

    #[test]
    fn test_io_error_without_path() {
        let err = Error::io_no_path(std::io::Error::other("boom"), "spawn");
        assert_eq!(err.to_string(), "I/O spawn failed");
    }

    #[test]
    fn test_remote_error_renders_code_and_message() {
        let err = Error::remote(Some("Foo".into()), "bar");
        assert_eq!(err.to_string(), "S3 API error Foo: bar");
        assert_eq!(err.remote_code(), Some("Foo"));

        let err = Error::remote(None, "connection reset");
        assert_eq!(err.to_string(), "connection reset");
        assert_eq!(err.remote_code(), None);
    }

    #[test]
    fn test_command_failed_renders_exit_code() {
        let err = Error::CommandFailed {
            command: "false".into(),
            code: Some(1),
        };
        assert_eq!(err.to_string(), "Command 'false' failed with exit code 1");

        let err = Error::CommandFailed {
            command: "sleep 10".into(),
            code: None,
        };
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn test_archive_error_keeps_written_files() {
        let err = Error::archive("truncated stream", vec![PathBuf::from("/out/a.txt")], None);
        match err {
            Error::Archive { written, .. } => assert_eq!(written, vec![PathBuf::from("/out/a.txt")]),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
