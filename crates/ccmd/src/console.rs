//! Terminal rendering for runs
//!
//! Status lines go to stderr. Stdout carries only what the command itself
//! prints, or the key for `ccmd key`.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use ccmd_cache::{Outcome, OutputSink, OutputStream, RunReport, Stage};
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Most file names listed before the list is summarised.
pub const MAX_LISTED_FILES: usize = 10;

/// Prefix for files restored from the cache.
pub const RESTORED_PREFIX: &str = "->";
/// Prefix for files written to the cache.
pub const STORED_PREFIX: &str = "+";

const DIM: &str = "\x1b[38;2;100;100;100m";
const GREY: &str = "\x1b[38;2;170;170;170m";
const CYAN: &str = "\x1b[36m";
const GREEN: &str = "\x1b[32m";
const RESET: &str = "\x1b[0m";

/// Decimal (SI) byte count: `999 B`, `1.0 kB`, `2.5 MB`.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1000;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    #[allow(clippy::cast_precision_loss)]
    let value = bytes as f64 / div as f64;
    format!("{value:.1} {}B", ['k', 'M', 'G', 'T', 'P', 'E'][exp])
}

/// Milliseconds with two decimals, e.g. `12.34ms`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    #[allow(clippy::cast_precision_loss)]
    let ms = duration.as_micros() as f64 / 1000.0;
    format!("{ms:.2}ms")
}

/// One line per file, capped at `max` with a trailer for the rest.
#[must_use]
pub fn file_list(files: &[String], max: usize, prefix: &str) -> Vec<String> {
    Console::with_colors(false).list(files, max, prefix)
}

fn display_paths(files: &[PathBuf], base: &Path) -> Vec<String> {
    files
        .iter()
        .map(|f| f.strip_prefix(base).unwrap_or(f).display().to_string())
        .collect()
}

fn stages(report: &RunReport, stages: &[Stage]) -> Duration {
    stages
        .iter()
        .filter_map(|stage| report.timings.get(*stage))
        .sum()
}

/// Writes status lines, coloured when stderr is a terminal.
#[derive(Debug, Clone, Copy)]
pub struct Console {
    colors: bool,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    /// Detect colour support from stderr.
    #[must_use]
    pub fn new() -> Self {
        Self {
            colors: io::stderr().is_terminal(),
        }
    }

    /// Force colours on or off.
    #[must_use]
    pub const fn with_colors(colors: bool) -> Self {
        Self { colors }
    }

    fn paint(&self, style: &str, text: &str) -> String {
        if self.colors {
            format!("{style}{text}{RESET}")
        } else {
            text.to_string()
        }
    }

    /// `label: value` with the value highlighted.
    #[must_use]
    pub fn setting(&self, label: &str, value: &str) -> String {
        format!("{label}: {}", self.paint(CYAN, value))
    }

    /// A de-emphasised progress note.
    #[must_use]
    pub fn note(&self, text: &str) -> String {
        self.paint(DIM, text)
    }

    /// File list with the prefix highlighted.
    #[must_use]
    pub fn files(&self, files: &[String], prefix: &str) -> Vec<String> {
        self.list(files, MAX_LISTED_FILES, prefix)
    }

    fn list(&self, files: &[String], max: usize, prefix: &str) -> Vec<String> {
        let mut lines: Vec<String> = files
            .iter()
            .take(max)
            .map(|f| format!(" {} {f}", self.paint(GREEN, prefix)))
            .collect();
        if files.len() > max {
            lines.push(self.paint(
                GREY,
                &format!(" {prefix} … and {} more files", files.len() - max),
            ));
        }
        lines
    }

    /// Lines describing how a run went.
    #[must_use]
    pub fn summary(&self, report: &RunReport, base: &Path) -> Vec<String> {
        let mut lines = vec![
            self.note(&format!(
                "Found {} input files in {}",
                report.input_files,
                format_duration(stages(report, &[Stage::DiscoverInputs]))
            )),
            self.note(&format!(
                "Computed cache key {} in {}",
                report.key,
                format_duration(stages(report, &[Stage::Fingerprint]))
            )),
        ];

        match &report.outcome {
            Outcome::Restored { provider, files } => {
                lines.push(self.note(&format!(
                    "Found in cache {provider}: served in {}",
                    format_duration(stages(report, &[Stage::Lookup, Stage::Extract]))
                )));
                lines.extend(self.files(&display_paths(files, base), RESTORED_PREFIX));
            }
            Outcome::Executed {
                provider,
                files,
                bytes_stored,
                command,
            } => {
                lines.push(self.note(&format!(
                    "Command completed in {}",
                    format_duration(command.duration)
                )));
                lines.push(self.note(&format!(
                    "Stored result ({}) in {provider} in {}",
                    format_bytes(*bytes_stored),
                    format_duration(stages(
                        report,
                        &[Stage::DiscoverOutputs, Stage::Package, Stage::Store]
                    ))
                )));
                lines.extend(self.files(&display_paths(files, base), STORED_PREFIX));
            }
        }
        lines
    }

    /// Print lines to stderr.
    pub fn print(&self, lines: &[String]) {
        for line in lines {
            eprintln!("{line}");
        }
    }
}

/// Forwards command output to this process's stdout and stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioSink;

impl OutputSink for StdioSink {
    fn line(&self, stream: OutputStream, line: &str) {
        match stream {
            OutputStream::Stdout => println!("{line}"),
            OutputStream::Stderr => eprintln!("{line}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccmd_cache::{CommandOutput, Fingerprint};

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("file{i}.txt")).collect()
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(999), "999 B");
        assert_eq!(format_bytes(1000), "1.0 kB");
        assert_eq!(format_bytes(1536), "1.5 kB");
        assert_eq!(format_bytes(2_500_000), "2.5 MB");
        assert_eq!(format_bytes(1_000_000_000), "1.0 GB");
        assert_eq!(format_bytes(u64::MAX), "18.4 EB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "0.00ms");
        assert_eq!(format_duration(Duration::from_micros(12_346)), "12.35ms");
        assert_eq!(format_duration(Duration::from_secs(2)), "2000.00ms");
    }

    #[test]
    fn test_file_list_under_the_cap() {
        assert_eq!(
            file_list(&names(2), 10, "+"),
            vec![" + file0.txt", " + file1.txt"]
        );
    }

    #[test]
    fn test_file_list_exactly_at_the_cap() {
        let lines = file_list(&names(10), 10, "->");
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[9], " -> file9.txt");
    }

    #[test]
    fn test_file_list_over_the_cap() {
        let lines = file_list(&names(13), 10, "->");
        assert_eq!(lines.len(), 11);
        assert_eq!(lines[10], " -> … and 3 more files");
    }

    #[test]
    fn test_plain_console_has_no_escapes() {
        let console = Console::with_colors(false);
        assert_eq!(console.setting("Cache", "local://x"), "Cache: local://x");
        assert_eq!(console.files(&names(1), "+"), vec![" + file0.txt"]);
    }

    #[test]
    fn test_coloured_console_highlights_prefix() {
        let console = Console::with_colors(true);
        let lines = console.files(&names(12), "+");
        assert_eq!(lines[0], format!(" {GREEN}+{RESET} file0.txt"));
        assert_eq!(lines[10], format!("{GREY} + … and 2 more files{RESET}"));
    }

    #[test]
    fn test_summary_for_a_hit() {
        let base = Path::new("/work");
        let report = RunReport {
            key: Fingerprint::from(0xab),
            input_files: 3,
            outcome: Outcome::Restored {
                provider: "local:///cache".into(),
                files: vec![base.join("dist/app.js")],
            },
            timings: Default::default(),
        };

        let lines = Console::with_colors(false).summary(&report, base);

        assert_eq!(lines[0], "Found 3 input files in 0.00ms");
        assert_eq!(lines[1], "Computed cache key 00000000000000ab in 0.00ms");
        assert!(lines[2].starts_with("Found in cache local:///cache"));
        assert_eq!(lines[3], " -> dist/app.js");
    }

    #[test]
    fn test_summary_for_a_miss() {
        let base = Path::new("/work");
        let report = RunReport {
            key: Fingerprint::from(1),
            input_files: 1,
            outcome: Outcome::Executed {
                provider: "s3://bucket".into(),
                files: vec![base.join("out.txt")],
                bytes_stored: 1500,
                command: CommandOutput {
                    exit_code: 0,
                    duration: Duration::from_millis(5),
                },
            },
            timings: Default::default(),
        };

        let lines = Console::with_colors(false).summary(&report, base);

        assert_eq!(lines[2], "Command completed in 5.00ms");
        assert!(lines[3].starts_with("Stored result (1.5 kB) in s3://bucket in"));
        assert_eq!(lines[4], " + out.txt");
    }
}
