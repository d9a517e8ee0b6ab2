//! Destination for the output lines of a running command

use std::fmt;
use std::sync::Mutex;

/// Which pipe a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        })
    }
}

/// Receives command output one line at a time, as it is produced.
///
/// Called concurrently from the stdout and stderr readers. Lines arrive
/// without their terminator.
pub trait OutputSink: Send + Sync {
    /// Handle one line.
    fn line(&self, stream: OutputStream, line: &str);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn line(&self, _stream: OutputStream, _line: &str) {}
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<(OutputStream, String)>>,
}

impl MemorySink {
    /// Lines received so far, in arrival order.
    #[must_use]
    pub fn lines(&self) -> Vec<(OutputStream, String)> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// Lines from one stream only.
    #[must_use]
    pub fn stream(&self, stream: OutputStream) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, line)| line)
            .collect()
    }
}

impl OutputSink for MemorySink {
    fn line(&self, stream: OutputStream, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((stream, line.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_separates_streams() {
        let sink = MemorySink::default();
        sink.line(OutputStream::Stdout, "one");
        sink.line(OutputStream::Stderr, "warn");
        sink.line(OutputStream::Stdout, "two");

        assert_eq!(sink.stream(OutputStream::Stdout), vec!["one", "two"]);
        assert_eq!(sink.stream(OutputStream::Stderr), vec!["warn"]);
        assert_eq!(sink.lines().len(), 3);
    }

    #[test]
    fn test_stream_names() {
        assert_eq!(OutputStream::Stdout.to_string(), "stdout");
        assert_eq!(OutputStream::Stderr.to_string(), "stderr");
    }
}
