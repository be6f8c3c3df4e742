//! Process invocation for cjbox-agent.
//!
//! Every tool stage goes through [`Invoke::run`], which either fails to run the
//! program at all ([`SpawnError`]) or returns an [`Invocation`] whose
//! [`Outcome`] the pipeline branches on.

use crate::error::SpawnError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, trace, warn};

/// Maximum captured output per stage in bytes (1 MiB).
/// Prevents memory exhaustion from programs with huge output.
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

const TRUNCATION_MARKER: &str = "\n... [output truncated]";

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Exited normally with this code.
    Exited(i32),
    /// Killed by a signal.
    Signaled,
    /// Killed after exceeding its time bound.
    TimedOut(Duration),
}

impl Outcome {
    /// Whether the process exited with code 0.
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Exit code as reported to clients, -1 when the process did not exit.
    pub fn code(&self) -> i32 {
        match self {
            Self::Exited(code) => *code,
            Self::Signaled | Self::TimedOut(_) => -1,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit status {code}"),
            Self::Signaled => write!(f, "terminated by signal"),
            Self::TimedOut(limit) => write!(f, "timed out after {}s", limit.as_secs_f64()),
        }
    }
}

/// A finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// How the process ended.
    pub outcome: Outcome,
    /// Interleaved stdout and stderr, truncated to [`MAX_OUTPUT_SIZE`].
    pub output: String,
}

/// A process to run.
#[derive(Debug, Clone)]
pub struct Invoke {
    program: PathBuf,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl Invoke {
    /// Run `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout: None,
        }
    }

    /// Append arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Working directory.
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Kill the process once `limit` has passed.
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// The command line, for diagnostics.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run to completion, capturing stdout and stderr into one buffer.
    pub async fn run(&self) -> Result<Invocation, SpawnError> {
        let program = self.program.to_string_lossy().into_owned();
        debug!(cmd = %self.command_line(), "invoking");

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| SpawnError::Start {
            program: program.clone(),
            source,
        })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(SpawnError::Collect {
                program,
                source: std::io::Error::other("stdio pipes missing"),
            });
        };

        // the buffer outlives the collecting future so a timeout keeps what was read
        let mut raw = Vec::new();
        let collect = async {
            collect_output(stdout, stderr, &mut raw).await?;
            child.wait().await
        };

        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, collect).await.ok(),
            None => Some(collect.await),
        };

        let outcome = match result {
            Some(Ok(status)) => status.code().map_or(Outcome::Signaled, Outcome::Exited),
            Some(Err(source)) => return Err(SpawnError::Collect { program, source }),
            None => {
                let limit = self.timeout.unwrap_or_default();
                warn!(cmd = %program, limit_ms = limit.as_millis() as u64, "process timed out, killing");
                if let Err(e) = child.kill().await {
                    warn!(cmd = %program, error = %e, "failed to kill process");
                }
                Outcome::TimedOut(limit)
            }
        };

        let output = cap_output(&raw, MAX_OUTPUT_SIZE);
        debug!(cmd = %program, outcome = %outcome, output_len = output.len(), "process finished");
        trace!(output = %output, "process output");
        Ok(Invocation { outcome, output })
    }
}

/// Read both pipes to EOF, appending chunks to `output` in arrival order.
///
/// Bytes beyond the cap are read and dropped so the child never blocks on a
/// full pipe.
async fn collect_output<O, E>(mut stdout: O, mut stderr: E, output: &mut Vec<u8>) -> std::io::Result<()>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut out_buf = [0u8; 8192];
    let mut err_buf = [0u8; 8192];
    let (mut out_open, mut err_open) = (true, true);

    while out_open || err_open {
        let chunk = tokio::select! {
            read = stdout.read(&mut out_buf), if out_open => {
                let n = read?;
                out_open = n > 0;
                &out_buf[..n]
            }
            read = stderr.read(&mut err_buf), if err_open => {
                let n = read?;
                err_open = n > 0;
                &err_buf[..n]
            }
        };
        // one extra byte lets cap_output notice the overflow
        let room = (MAX_OUTPUT_SIZE + 1).saturating_sub(output.len());
        output.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
    Ok(())
}

/// Decode captured bytes and cut the text to at most `max_bytes`.
///
/// The cut lands on the last whole character that fits; a marker is appended
/// when anything was dropped.
fn cap_output(raw: &[u8], max_bytes: usize) -> String {
    let text = String::from_utf8_lossy(raw);
    if text.len() <= max_bytes {
        return text.into_owned();
    }
    let keep = text
        .char_indices()
        .map(|(start, c)| start + c.len_utf8())
        .take_while(|&end| end <= max_bytes)
        .last()
        .unwrap_or(0);
    format!("{}{TRUNCATION_MARKER}", &text[..keep])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Invoke {
        Invoke::new("sh").args(["-c", script])
    }

    #[tokio::test]
    async fn test_captures_both_streams() {
        let result = sh("echo out; echo err >&2").run().await.unwrap();
        assert_eq!(result.outcome, Outcome::Exited(0));
        assert!(result.outcome.success());
        assert!(result.output.contains("out\n"));
        assert!(result.output.contains("err\n"));
    }

    #[tokio::test]
    async fn test_exit_code() {
        let result = sh("exit 42").run().await.unwrap();
        assert_eq!(result.outcome, Outcome::Exited(42));
        assert_eq!(result.outcome.code(), 42);
        assert!(!result.outcome.success());
    }

    #[tokio::test]
    async fn test_missing_program_is_a_spawn_error() {
        let result = Invoke::new("/nonexistent/cjc").run().await;
        assert!(matches!(result, Err(SpawnError::Start { .. })));
    }

    #[tokio::test]
    async fn test_timeout_kills() {
        let result = sh("sleep 5")
            .timeout(Duration::from_millis(100))
            .run()
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::TimedOut(Duration::from_millis(100)));
        assert_eq!(result.outcome.code(), -1);
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let result = sh("echo started; echo warming >&2; sleep 5")
            .timeout(Duration::from_millis(500))
            .run()
            .await
            .unwrap();
        assert!(matches!(result.outcome, Outcome::TimedOut(_)));
        assert!(result.output.contains("started\n"), "{:?}", result.output);
        assert!(result.output.contains("warming\n"), "{:?}", result.output);
    }

    #[tokio::test]
    async fn test_current_dir() {
        let dir = tempfile::tempdir().unwrap();
        let result = sh("pwd").current_dir(dir.path()).run().await.unwrap();
        let reported = std::path::PathBuf::from(result.output.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn test_large_output_is_truncated() {
        let result = sh("head -c 2000000 /dev/zero | tr '\\0' a").run().await.unwrap();
        assert!(result.outcome.success());
        assert!(result.output.ends_with(TRUNCATION_MARKER));
        assert_eq!(result.output.len(), MAX_OUTPUT_SIZE + TRUNCATION_MARKER.len());
    }

    #[test]
    fn test_command_line() {
        let invoke = Invoke::new("/usr/bin/cjc").args(["-p", "/playground/src"]);
        assert_eq!(invoke.command_line(), "/usr/bin/cjc -p /playground/src");
    }

    #[test]
    fn test_cap_respects_char_boundary() {
        let capped = cap_output("ééé".as_bytes(), 3);
        assert_eq!(capped, format!("é{TRUNCATION_MARKER}"));

        assert_eq!(cap_output("éé".as_bytes(), 4), "éé");
    }

    #[test]
    fn test_cap_decodes_invalid_bytes() {
        assert_eq!(cap_output(b"ok\xff", 16), "ok\u{fffd}");
    }
}
