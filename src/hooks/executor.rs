//! Secure execution of hook commands.
//!
//! A hook runs as a direct child with an explicit argument vector and an
//! explicit environment (nothing is inherited from the daemon). Its stdout
//! and stderr are drained concurrently and forwarded line by line to the
//! log, tagged with the stream name and the firing event. Each invocation
//! is bounded by a deadline and a cancellation token; either one tears down
//! the child's whole process group before the invocation returns.

use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::{ExecError, PathError};

/// Directories a configured hook command must live under.
pub const SAFE_COMMAND_DIRS: &[&str] = &["/usr/local/bin", "/usr/bin", "/bin", "/usr/sbin", "/sbin"];

/// Lines longer than this are truncated before logging.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Time between SIGTERM and SIGKILL when tearing down a hook.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// How long output readers may lag behind a killed process.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// One process invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Command name or path, resolved like a shell would.
    pub command: String,
    /// Argument vector, passed verbatim.
    pub args: Vec<String>,
    /// Complete environment of the child.
    pub env: Vec<(String, String)>,
    /// Event label attached to every log line.
    pub event: String,
    /// Hard deadline for the invocation.
    pub deadline: Instant,
}

/// Boxed future returned by [`Executor::execute`].
pub type ExecFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ExecError>> + Send + 'a>>;

/// Runs one external command to completion.
pub trait Executor: Send + Sync + 'static {
    /// Run `request`, honouring its deadline and `cancel`.
    fn execute<'a>(&'a self, request: &'a ExecRequest, cancel: &'a CancellationToken) -> ExecFuture<'a>;
}

/// Which pipe a forwarded line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// A line of hook output, as forwarded to an optional sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub event: String,
    pub stream: OutputStream,
    pub line: String,
}

/// [`Executor`] backed by real OS processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    sink: Option<mpsc::UnboundedSender<OutputLine>>,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self { sink: None }
    }

    /// Also send every output line to `sink`, in addition to the log.
    pub fn with_output_sink(sink: mpsc::UnboundedSender<OutputLine>) -> Self {
        Self { sink: Some(sink) }
    }

    async fn run(&self, request: &ExecRequest, cancel: &CancellationToken) -> Result<(), ExecError> {
        if request.command.is_empty() {
            return Err(ExecError::EmptyCommand);
        }

        let path = resolve_command(&request.command)?;

        if cancel.is_cancelled() {
            return Err(ExecError::Canceled);
        }
        let started = Instant::now();
        if started >= request.deadline {
            return Err(ExecError::Timeout {
                timeout: Duration::ZERO,
            });
        }
        let budget = request.deadline - started;

        debug!(
            event = %request.event,
            command = %path.display(),
            args = ?request.args,
            timeout_ms = budget.as_millis() as u64,
            "executing command"
        );

        let mut cmd = Command::new(&path);
        cmd.args(&request.args)
            .env_clear()
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            command: path.display().to_string(),
            source,
        })?;

        let stdout = child.stdout.take().ok_or_else(|| ExecError::Spawn {
            command: path.display().to_string(),
            source: std::io::Error::other("stdout pipe not available"),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| ExecError::Spawn {
            command: path.display().to_string(),
            source: std::io::Error::other("stderr pipe not available"),
        })?;

        // Captured now: the pid is gone once the leader is reaped.
        let pgid = child.id().map(|pid| Pid::from_raw(-(pid as i32)));

        let mut readers = [
            tokio::spawn(forward_lines(
                stdout,
                OutputStream::Stdout,
                request.event.clone(),
                self.sink.clone(),
            )),
            tokio::spawn(forward_lines(
                stderr,
                OutputStream::Stderr,
                request.event.clone(),
                self.sink.clone(),
            )),
        ];

        enum ExitReason {
            Completed(ExitStatus),
            WaitError(std::io::Error),
            Timeout,
            Canceled,
        }

        let reason = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => ExitReason::Completed(status),
                Err(err) => ExitReason::WaitError(err),
            },
            _ = tokio::time::sleep_until(request.deadline) => ExitReason::Timeout,
            _ = cancel.cancelled() => ExitReason::Canceled,
        };

        match reason {
            ExitReason::Completed(status) => {
                // Descendants may keep the pipes open after the leader exits;
                // they are bound by the same deadline and token.
                let interrupted = tokio::select! {
                    biased;
                    _ = join_readers(&mut readers) => None,
                    _ = tokio::time::sleep_until(request.deadline) => {
                        Some(ExecError::Timeout { timeout: budget })
                    }
                    _ = cancel.cancelled() => Some(ExecError::Canceled),
                };

                match interrupted {
                    None => classify_exit(status, &request.event),
                    Some(err) => {
                        warn!(
                            event = %request.event,
                            error = %err,
                            "descendants still hold hook output after exit, killing process group"
                        );
                        if let Some(pgid) = pgid {
                            signal_group(pgid, Signal::SIGKILL, &request.event);
                        }
                        // A reader that already finished must not be polled again.
                        for reader in &readers {
                            reader.abort();
                        }
                        Err(err)
                    }
                }
            }
            ExitReason::WaitError(err) => {
                error!(event = %request.event, error = %err, "failed to wait for command");
                terminate_process_group(&mut child, pgid, &request.event).await;
                drain_output(readers, Instant::now() + DRAIN_GRACE, &request.event).await;
                Err(ExecError::Wait(err))
            }
            ExitReason::Timeout => {
                warn!(event = %request.event, timeout_ms = budget.as_millis() as u64, "command timed out");
                terminate_process_group(&mut child, pgid, &request.event).await;
                drain_output(readers, Instant::now() + DRAIN_GRACE, &request.event).await;
                Err(ExecError::Timeout { timeout: budget })
            }
            ExitReason::Canceled => {
                warn!(event = %request.event, "command canceled");
                terminate_process_group(&mut child, pgid, &request.event).await;
                drain_output(readers, Instant::now() + DRAIN_GRACE, &request.event).await;
                Err(ExecError::Canceled)
            }
        }
    }
}

impl Executor for ProcessExecutor {
    fn execute<'a>(&'a self, request: &'a ExecRequest, cancel: &'a CancellationToken) -> ExecFuture<'a> {
        Box::pin(self.run(request, cancel))
    }
}

fn classify_exit(status: ExitStatus, event: &str) -> Result<(), ExecError> {
    if status.success() {
        debug!(event, "command completed");
        return Ok(());
    }

    let code = status.code().unwrap_or(-1);
    let signal = status.signal();
    error!(event, exit_code = code, signal = ?signal, "command exited with non-zero status");
    Err(ExecError::NonZeroExit { code, signal })
}

/// Read `reader` to EOF, logging each line.
async fn forward_lines<R>(
    reader: R,
    stream: OutputStream,
    event: String,
    sink: Option<mpsc::UnboundedSender<OutputLine>>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                let truncated = buf.len() > MAX_LINE_LENGTH;
                buf.truncate(MAX_LINE_LENGTH);
                let line = String::from_utf8_lossy(&buf).into_owned();

                info!(event = %event, stream = stream.as_str(), line = %line, truncated, "hook output");
                if let Some(sink) = &sink {
                    let _ = sink.send(OutputLine {
                        event: event.clone(),
                        stream,
                        line,
                    });
                }
            }
            Err(err) => {
                error!(event = %event, stream = stream.as_str(), error = %err, "error reading output");
                break;
            }
        }
    }
}

async fn join_readers(readers: &mut [JoinHandle<()>; 2]) {
    for reader in readers.iter_mut() {
        let _ = reader.await;
    }
}

/// Wait for both readers, abandoning them at `until`.
async fn drain_output(readers: [JoinHandle<()>; 2], until: Instant, event: &str) {
    for mut reader in readers {
        tokio::select! {
            _ = &mut reader => {}
            _ = tokio::time::sleep_until(until) => {
                warn!(event, "output still open after command exit, abandoning reader");
                reader.abort();
            }
        }
    }
}

fn signal_group(pgid: Pid, sig: Signal, event: &str) {
    if let Err(err) = signal::kill(pgid, sig) {
        if err != Errno::ESRCH {
            warn!(event, pgid = pgid.as_raw(), signal = ?sig, error = ?err, "signalling process group failed");
        }
    }
}

/// SIGTERM the child's process group, escalate to SIGKILL, then reap.
async fn terminate_process_group(child: &mut Child, pgid: Option<Pid>, event: &str) {
    let Some(pgid) = pgid else {
        return;
    };

    signal_group(pgid, Signal::SIGTERM, event);
    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
        debug!(event, pgid = pgid.as_raw(), "process ignored SIGTERM, sending SIGKILL");
    }

    // Stragglers in the group are killed even if the leader already exited.
    signal_group(pgid, Signal::SIGKILL, event);
    if let Err(err) = child.wait().await {
        debug!(event, pgid = pgid.as_raw(), error = %err, "failed to reap killed command");
    }
}

/// Resolve `command` the way a shell does: paths containing `/` are used
/// as given, bare names are searched in `PATH` (or [`SAFE_COMMAND_DIRS`]
/// when `PATH` is unset).
pub fn resolve_command(command: &str) -> Result<PathBuf, ExecError> {
    let not_found = || ExecError::NotFound {
        command: command.to_string(),
    };

    if command.contains('/') {
        let path = PathBuf::from(command);
        return if is_executable(&path) {
            Ok(path)
        } else {
            Err(not_found())
        };
    }

    let dirs: Vec<PathBuf> = match std::env::var_os("PATH") {
        Some(search) => std::env::split_paths(&search)
            .filter(|dir| !dir.as_os_str().is_empty())
            .collect(),
        None => SAFE_COMMAND_DIRS.iter().map(PathBuf::from).collect(),
    };

    dirs.into_iter()
        .map(|dir| dir.join(command))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(not_found)
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Pre-flight check for a configured command path.
///
/// Rejects whitespace anywhere in the path, then requires the absolute,
/// lexically normalised form to sit under one of [`SAFE_COMMAND_DIRS`].
pub fn validate_command_path(command: &str) -> Result<PathBuf, PathError> {
    if command.chars().any(char::is_whitespace) {
        return Err(PathError::Whitespace {
            command: command.to_string(),
        });
    }

    let absolute = absolute_path(command)?;
    if SAFE_COMMAND_DIRS
        .iter()
        .any(|dir| absolute.starts_with(dir))
    {
        Ok(absolute)
    } else {
        Err(PathError::UnsafeDirectory {
            path: absolute.display().to_string(),
        })
    }
}

fn absolute_path(command: &str) -> Result<PathBuf, PathError> {
    let path = Path::new(command);
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|source| PathError::Resolve {
                command: command.to_string(),
                source,
            })?
            .join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}
