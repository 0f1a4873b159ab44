//! Subprocess plumbing shared by every external collaborator (Azure CLI,
//! aztfexport, git).
//!
//! Services never spawn processes directly; they describe a [`CommandSpec`]
//! and hand it to a [`CommandRunner`]. [`SystemRunner`] is the real
//! implementation; tests substitute their own.

use async_trait::async_trait;
use camino::Utf8PathBuf;
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;

/// Log target used when echoing external tool output.
pub const TOOL_OUTPUT_TARGET: &str = "azexport::tool";

/// Errors raised while running an external command
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("{program} not found. Make sure it is installed and in PATH")]
    NotFound { program: String },

    #[error("Failed to run {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} timed out after {limit:?}")]
    Timeout { program: String, limit: Duration },
}

impl CommandError {
    fn from_io(program: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound {
                program: program.to_string(),
            }
        } else {
            Self::Io {
                program: program.to_string(),
                source,
            }
        }
    }
}

/// Description of one external command invocation.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<Utf8PathBuf>,
    pub envs: Vec<(String, String)>,
    redactions: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Mask `secret` wherever this command is displayed or logged.
    pub fn redact(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.redactions.push(secret);
        }
        self
    }

    fn mask(&self, text: &str) -> String {
        self.redactions
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), "***"))
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| {
                let part = self.mask(part);
                if part.contains(' ') || part.contains('"') || part.is_empty() {
                    format!("\"{}\"", part.replace('"', "\\\""))
                } else {
                    part
                }
            })
            .collect();
        write!(f, "{}", rendered.join(" "))
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("command", &self.to_string())
            .field("cwd", &self.cwd)
            .field("envs", &self.envs.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .finish()
    }
}

/// Captured result of a non-streaming command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stderr followed by stdout, for error reporting.
    pub fn combined(&self) -> String {
        match (self.stderr.trim(), self.stdout.trim()) {
            ("", out) => out.to_string(),
            (err, "") => err.to_string(),
            (err, out) => format!("{}\n{}", err, out),
        }
    }
}

/// Result of a streamed command: exit code plus every distinct output line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamedOutput {
    pub code: Option<i32>,
    pub lines: Vec<String>,
}

impl StreamedOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// The last `n` non-blank lines.
    pub fn tail(&self, n: usize) -> Vec<&str> {
        let non_blank: Vec<&str> = self
            .lines
            .iter()
            .map(String::as_str)
            .filter(|l| !l.trim().is_empty())
            .collect();
        non_blank[non_blank.len().saturating_sub(n)..].to_vec()
    }
}

/// Executes external commands.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture stdout/stderr separately.
    async fn output(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;

    /// Run with combined output echoed live line by line (repeated lines are
    /// echoed once) and killed after `limit`.
    async fn stream(&self, spec: &CommandSpec, limit: Duration)
    -> Result<StreamedOutput, CommandError>;
}

/// Remembers which lines have already been seen.
///
/// Tools that redraw progress emit the same line many times; only the first
/// occurrence is kept.
#[derive(Debug, Default)]
pub struct LineDeduplicator {
    seen: HashSet<String>,
    lines: Vec<String>,
}

impl LineDeduplicator {
    /// Returns the trimmed line if it has not been seen before.
    pub fn observe(&mut self, raw: &str) -> Option<&str> {
        let line = raw.trim_end();
        if !self.seen.insert(line.to_string()) {
            return None;
        }
        self.lines.push(line.to_string());
        self.lines.last().map(String::as_str)
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

/// Runs commands with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    fn command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }
}

enum Source {
    Stdout,
    Stderr,
}

/// One line of tool output without its terminator; invalid UTF-8 is replaced.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn output(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        tracing::debug!("Running command: {}", spec);

        let output = Self::command(spec)
            .output()
            .await
            .map_err(|e| CommandError::from_io(&spec.program, e))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn stream(
        &self,
        spec: &CommandSpec,
        limit: Duration,
    ) -> Result<StreamedOutput, CommandError> {
        tracing::debug!("Streaming command: {}", spec);
        let start = Instant::now();

        let mut child = Self::command(spec)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CommandError::from_io(&spec.program, e))?;

        let missing_pipe = || {
            CommandError::from_io(&spec.program, io::Error::other("output pipe not captured"))
        };
        let mut stdout = BufReader::new(child.stdout.take().ok_or_else(missing_pipe)?);
        let mut stderr = BufReader::new(child.stderr.take().ok_or_else(missing_pipe)?);
        let (mut out_buf, mut err_buf) = (Vec::new(), Vec::new());
        let mut dedup = LineDeduplicator::default();

        let run = async {
            let (mut stdout_done, mut stderr_done) = (false, false);
            while !(stdout_done && stderr_done) {
                // Raw bytes: tools may print text that is not valid UTF-8
                let (source, read) = tokio::select! {
                    n = stdout.read_until(b'\n', &mut out_buf), if !stdout_done => (Source::Stdout, n?),
                    n = stderr.read_until(b'\n', &mut err_buf), if !stderr_done => (Source::Stderr, n?),
                };

                if read == 0 {
                    match source {
                        Source::Stdout => stdout_done = true,
                        Source::Stderr => stderr_done = true,
                    }
                    continue;
                }

                let buf = match source {
                    Source::Stdout => &mut out_buf,
                    Source::Stderr => &mut err_buf,
                };
                let line = decode_line(buf);
                buf.clear();
                if let Some(first) = dedup.observe(&line) {
                    tracing::info!(target: TOOL_OUTPUT_TARGET, "{}", first);
                }
            }
            Ok::<ExitStatus, io::Error>(child.wait().await?)
        };

        let waited = timeout(limit, run).await;

        let status = match waited {
            Ok(status) => status.map_err(|e| CommandError::from_io(&spec.program, e))?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill {} after timeout: {}", spec.program, e);
                }
                return Err(CommandError::Timeout {
                    program: spec.program.clone(),
                    limit,
                });
            }
        };

        tracing::debug!(
            "{} finished in {:.2}s with exit code {:?}",
            spec.program,
            start.elapsed().as_secs_f32(),
            status.code()
        );

        Ok(StreamedOutput {
            code: status.code(),
            lines: dedup.into_lines(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let mut dedup = LineDeduplicator::default();
        assert_eq!(dedup.observe("Initializing...\n"), Some("Initializing..."));
        assert_eq!(dedup.observe("Initializing..."), None);
        assert_eq!(dedup.observe("Exporting rg-a"), Some("Exporting rg-a"));
        assert_eq!(dedup.observe("Initializing...  "), None);

        assert_eq!(dedup.into_lines(), vec!["Initializing...", "Exporting rg-a"]);
    }

    #[test]
    fn test_display_redacts_secrets() {
        let spec = CommandSpec::new("git")
            .args(["config", "--global", "url.https://s3cr3t@dev.azure.com/org/.insteadOf"])
            .arg("https://dev.azure.com/org/")
            .redact("s3cr3t");

        let shown = spec.to_string();
        assert!(!shown.contains("s3cr3t"));
        assert!(shown.contains("https://***@dev.azure.com/org/.insteadOf"));
        assert!(!format!("{:?}", spec).contains("s3cr3t"));
    }

    #[test]
    fn test_display_quotes_spaces() {
        let spec = CommandSpec::new("aztfexport").args(["query", "type != 'x' and resourceGroup == 'rg'"]);
        assert_eq!(
            spec.to_string(),
            "aztfexport query \"type != 'x' and resourceGroup == 'rg'\""
        );
    }

    #[test]
    fn test_tail_skips_blank_lines() {
        let output = StreamedOutput {
            code: Some(1),
            lines: vec!["a".into(), "".into(), "b".into(), "c".into()],
        };
        assert_eq!(output.tail(2), vec!["b", "c"]);
        assert_eq!(output.tail(20), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_combined_output() {
        let output = CommandOutput {
            code: Some(1),
            stdout: "out\n".into(),
            stderr: "err\n".into(),
        };
        assert_eq!(output.combined(), "err\nout");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_output() {
        let out = SystemRunner
            .output(&CommandSpec::new("sh").args(["-c", "echo hello; echo oops >&2; exit 3"]))
            .await
            .unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_stream_dedups() {
        let spec = CommandSpec::new("sh").args(["-c", "echo a; echo a; echo b >&2; echo a; exit 0"]);
        let out = SystemRunner.stream(&spec, Duration::from_secs(10)).await.unwrap();

        assert!(out.success());
        assert_eq!(out.lines.iter().filter(|l| *l == "a").count(), 1);
        assert!(out.lines.contains(&"b".to_string()));
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"plain\n"), "plain");
        assert_eq!(decode_line(b"crlf\r\n"), "crlf");
        assert_eq!(decode_line(b"last"), "last");
        assert_eq!(decode_line(b"bad \xff byte\n"), "bad \u{FFFD} byte");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_stream_survives_invalid_utf8() {
        let spec = CommandSpec::new("sh").args([
            "-c",
            "printf 'ok\\n\\377\\n'; sleep 1; echo done; exit 0",
        ]);
        let out = SystemRunner.stream(&spec, Duration::from_secs(10)).await.unwrap();

        assert_eq!(out.code, Some(0));
        assert!(out.lines.contains(&"ok".to_string()));
        assert!(out.lines.contains(&"\u{FFFD}".to_string()));
        assert_eq!(out.lines.last().map(String::as_str), Some("done"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_stream_timeout() {
        let spec = CommandSpec::new("sh").args(["-c", "sleep 5"]);
        let err = SystemRunner
            .stream(&spec, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_program_is_not_found() {
        let err = SystemRunner
            .output(&CommandSpec::new("definitely-not-a-real-binary-azexport"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NotFound { .. }));
    }
}
