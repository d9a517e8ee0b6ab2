//! Shell command execution with live output streaming

use crate::output::{OutputSink, OutputStream};
use crate::{Error, Result};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Result of a command that exited successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exit code
    pub exit_code: i32,
    /// Wall time from spawn until both output streams were drained
    pub duration: Duration,
}

/// Run `command` through the platform shell in `cwd`.
///
/// Stdout and stderr are read concurrently and forwarded to `sink` line by
/// line while the process runs. The call returns once the process has exited
/// and both streams are drained. A non-zero exit is
/// [`Error::CommandFailed`].
pub async fn run_command(
    command: &str,
    cwd: &Path,
    sink: Arc<dyn OutputSink>,
) -> Result<CommandOutput> {
    if command.trim().is_empty() {
        return Err(Error::configuration("no command provided"));
    }

    let mut cmd = shell(command);
    cmd.current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::info!(command, cwd = %cwd.display(), "Running command");
    let started = Instant::now();
    let mut child = cmd
        .spawn()
        .map_err(|e| Error::io(e, cwd, format!("spawn '{command}'")))?;

    let stdout_task = child
        .stdout
        .take()
        .map(|out| tokio::spawn(forward(out, OutputStream::Stdout, Arc::clone(&sink))));
    let stderr_task = child
        .stderr
        .take()
        .map(|err| tokio::spawn(forward(err, OutputStream::Stderr, Arc::clone(&sink))));

    let status = child
        .wait()
        .await
        .map_err(|e| Error::io_no_path(e, format!("wait for '{command}'")))?;

    for task in [stdout_task, stderr_task].into_iter().flatten() {
        match task.await {
            Ok(Ok(lines)) => tracing::trace!(lines, "Output stream drained"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to read command output"),
            Err(e) => tracing::warn!(error = %e, "Output reader task failed"),
        }
    }
    let duration = started.elapsed();

    if !status.success() {
        tracing::debug!(command, code = ?status.code(), "Command failed");
        return Err(Error::CommandFailed {
            command: command.to_string(),
            code: status.code(),
        });
    }

    tracing::debug!(command, duration_ms = duration.as_millis(), "Command finished");
    Ok(CommandOutput {
        exit_code: status.code().unwrap_or_default(),
        duration,
    })
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

async fn forward(
    reader: impl AsyncRead + Unpin,
    stream: OutputStream,
    sink: Arc<dyn OutputSink>,
) -> std::io::Result<u64> {
    let mut segments = BufReader::new(reader).split(b'\n');
    let mut count = 0;
    while let Some(mut line) = segments.next_segment().await? {
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        sink.line(stream, &String::from_utf8_lossy(&line));
        count += 1;
    }
    Ok(count)
}
