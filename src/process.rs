//! One-shot external command execution with output capture.
//!
//! Used by the service-control gateway. Commands are spawned directly (no
//! shell), with `kill_on_drop(true)` so a timed-out child is killed when the
//! future is dropped.

use std::fmt::Write;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Max output kept per stream (64 KB). Service managers print a few lines;
/// anything beyond this is drained and discarded.
const MAX_OUTPUT: usize = 64 * 1024;

/// Run `program args...`, capturing stdout and stderr, bounded by `timeout`.
///
/// Stdout and stderr are read concurrently to avoid pipe deadlock.
pub async fn run_command(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<CommandOutput, ExecError> {
    let start = std::time::Instant::now();

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ExecError::NotFound(program.to_string())
        } else {
            ExecError::SpawnFailed(e.to_string())
        }
    })?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExecError::ProcessFailed("Failed to take stdout pipe".to_string()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| ExecError::ProcessFailed("Failed to take stderr pipe".to_string()))?;

    match tokio::time::timeout(timeout, async {
        let (stdout_data, stderr_data) = tokio::join!(
            read_capped(&mut stdout, MAX_OUTPUT),
            read_capped(&mut stderr, MAX_OUTPUT),
        );
        drop(stdout);
        drop(stderr);

        let status = child
            .wait()
            .await
            .map_err(|e| ExecError::ProcessFailed(e.to_string()))?;

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = start.elapsed().as_millis() as u64;

        Ok::<_, ExecError>(CommandOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: stdout_data,
            stderr: stderr_data,
            duration_ms,
        })
    })
    .await
    {
        Ok(result) => result,
        Err(_) => Err(ExecError::Timeout),
    }
}

/// Read from an async reader, keeping the first `max_bytes` and discarding the
/// rest. Keeps reading past the cap so the child never blocks on a full pipe.
async fn read_capped(reader: &mut (impl tokio::io::AsyncRead + Unpin), max_bytes: usize) -> String {
    let mut buf = Vec::with_capacity(max_bytes.min(8192));
    let mut tmp = [0u8; 4096];
    let mut total_read = 0usize;
    loop {
        match reader.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                total_read += n;
                if buf.len() < max_bytes {
                    let take = n.min(max_bytes - buf.len());
                    buf.extend_from_slice(&tmp[..take]);
                }
            }
        }
    }
    let mut s = String::from_utf8_lossy(&buf).into_owned();
    if total_read > max_bytes {
        let _ = write!(s, "\n[truncated: {total_read} bytes total]");
    }
    s
}

/// Captured result of [`run_command`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct CommandOutput {
    /// Exit code, `-1` when killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Errors from [`run_command`].
#[derive(Error, Debug)]
pub enum ExecError {
    /// The program is not on `PATH`.
    #[error("Command not found: {0}")]
    NotFound(String),
    /// The program exists but could not be started.
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),
    /// The child started but waiting on it failed.
    #[error("Process error: {0}")]
    ProcessFailed(String),
    /// The command exceeded its timeout and was killed.
    #[error("Command timed out")]
    Timeout,
}
