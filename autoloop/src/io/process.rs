//! Child processes with a timeout, piped stdin and bounded output.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Trimmed stderr, with a marker when bytes were dropped.
    pub fn stderr_summary(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stderr).trim().to_string();
        if self.stderr_truncated > 0 {
            text.push_str(&format!(" [stderr truncated {} bytes]", self.stderr_truncated));
        }
        text
    }
}

/// Run `cmd`, feeding `stdin` and capturing stdout/stderr concurrently.
///
/// stdin is written from its own thread so a child that produces output before
/// consuming all input cannot deadlock. Bytes beyond `output_limit_bytes` are
/// drained and counted but not stored. On timeout the child is killed and
/// `timed_out` is set.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_with_timeout(
    mut cmd: Command,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdin_handle = match stdin {
        Some(input) => {
            let mut pipe = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            Some(thread::spawn(move || -> Result<()> {
                match pipe.write_all(&input) {
                    // The child may exit without reading everything.
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                    other => other.context("write stdin"),
                }
            }))
        }
        None => None,
    };

    let stdout_reader = spawn_capture(child.stdout.take(), "stdout", output_limit_bytes)?;
    let stderr_reader = spawn_capture(child.stderr.take(), "stderr", output_limit_bytes)?;

    let waited = child.wait_timeout(timeout).context("wait for command")?;
    let timed_out = waited.is_none();
    let status = match waited {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    if let Some(writer) = stdin_handle {
        let written = writer
            .join()
            .map_err(|_| anyhow!("stdin writer thread panicked"))?;
        // A killed child leaves the writer with a broken pipe.
        if !timed_out {
            written?;
        }
    }
    let stdout = join_capture(stdout_reader, "stdout")?;
    let stderr = join_capture(stderr_reader, "stderr")?;

    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_truncated = stdout.dropped,
            stderr_truncated = stderr.dropped,
            "output truncated"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout: stdout.bytes,
        stderr: stderr.bytes,
        stdout_truncated: stdout.dropped,
        stderr_truncated: stderr.dropped,
        timed_out,
    })
}

/// Bytes kept from one output stream, plus the count drained past the limit.
struct Captured {
    bytes: Vec<u8>,
    dropped: usize,
}

fn spawn_capture<R: Read + Send + 'static>(
    pipe: Option<R>,
    stream: &str,
    limit: usize,
) -> Result<thread::JoinHandle<Result<Captured>>> {
    let reader = pipe.ok_or_else(|| anyhow!("{stream} was not piped"))?;
    Ok(thread::spawn(move || capture(reader, limit)))
}

fn join_capture(handle: thread::JoinHandle<Result<Captured>>, stream: &str) -> Result<Captured> {
    handle
        .join()
        .map_err(|_| anyhow!("{stream} reader thread panicked"))?
        .with_context(|| format!("read {stream}"))
}

fn capture<R: Read>(mut reader: R, limit: usize) -> Result<Captured> {
    let mut captured = Captured {
        bytes: Vec::new(),
        dropped: 0,
    };
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Ok(captured);
        }
        let room = limit.saturating_sub(captured.bytes.len());
        let keep = n.min(room);
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.dropped += n - keep;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn echoes_stdin_to_stdout() {
        let output = run_with_timeout(
            sh("cat"),
            Some(b"{\"ping\": true}".to_vec()),
            Duration::from_secs(10),
            1_000,
        )
        .expect("run");
        assert!(output.status.success());
        assert_eq!(output.stdout_text(), "{\"ping\": true}");
        assert!(!output.timed_out);
    }

    #[test]
    fn output_beyond_limit_is_counted() {
        let output = run_with_timeout(
            sh("printf 0123456789; printf oops >&2"),
            None,
            Duration::from_secs(10),
            4,
        )
        .expect("run");
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.stdout_truncated, 6);
        assert_eq!(output.stderr_summary(), "oops");
    }

    #[test]
    fn slow_child_is_killed() {
        let output = run_with_timeout(sh("exec sleep 5"), None, Duration::from_millis(100), 100)
            .expect("run");
        assert!(output.timed_out);
        assert!(!output.status.success());
    }
}
