//! Child process control for the upload tool.
//!
//! A [`ToolRunner`] executes one [`Invocation`] and reports how it ended.
//! [`ProcessRunner`] is the real implementation: it merges stdout and stderr
//! line by line, enforces a timeout and honours a [`CancelToken`]. When
//! either fires, the child is killed and reaped before the call returns.
//!
//! On Unix the child leads its own process group, so wrappers that fork
//! (shell scripts, `sleep &`) are killed together with it.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

/// How often a running child is polled for exit, timeout and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long to keep collecting output after the child is gone.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Shared cancellation flag.
///
/// Clones observe the same flag, so one handle can be moved into a signal
/// handler while another is polled by the running batch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A fully built command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program to execute.
    pub program: PathBuf,
    /// Arguments, in order.
    pub args: Vec<String>,
}

impl Invocation {
    /// Create an invocation.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process exited on its own.
    Exited {
        /// Exit status indicated success.
        success: bool,
        /// Exit code; `None` when killed by a signal.
        code: Option<i32>,
    },
    /// The process ran past its timeout and was killed.
    TimedOut,
    /// Cancellation was requested and the process was killed.
    Cancelled,
}

/// Result of running the tool once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// How the process ended.
    pub termination: Termination,
    /// Merged stdout/stderr, verbatim apart from lossy UTF-8 decoding.
    pub output: String,
}

impl ProcessOutput {
    /// Output of a process that exited with `code`.
    pub fn exited(code: i32, output: impl Into<String>) -> Self {
        Self {
            termination: Termination::Exited {
                success: code == 0,
                code: Some(code),
            },
            output: output.into(),
        }
    }
}

/// Executes upload tool invocations.
///
/// `Err` is reserved for failures to start the process; everything that
/// happens after a successful spawn is described by [`ProcessOutput`].
pub trait ToolRunner: Send + Sync {
    /// Run `invocation`, killing it after `timeout` or on cancellation.
    fn run(
        &self,
        invocation: &Invocation,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> io::Result<ProcessOutput>;
}

/// Runs the tool as a real child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(
        &self,
        invocation: &Invocation,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> io::Result<ProcessOutput> {
        debug!("Executing: {invocation}");

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = command.spawn()?;

        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, tx.clone());
        }
        drop(tx);

        let termination = wait_with_deadline(&mut child, timeout, cancel);

        let mut output = Vec::new();
        let drain_deadline = Instant::now() + OUTPUT_DRAIN_GRACE;
        loop {
            let remaining = drain_deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(chunk) => output.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "Output of {} still open after exit, truncating",
                        invocation.program.display()
                    );
                    // Leftover descendants hold the pipes open.
                    if let Err(e) = kill_group(&mut child) {
                        debug!("Failed to kill process group of {}: {e}", child.id());
                    }
                    break;
                },
            }
        }

        Ok(ProcessOutput {
            termination,
            output: String::from_utf8_lossy(&output).into_owned(),
        })
    }
}

fn spawn_line_reader<R: Read + Send + 'static>(stream: R, tx: mpsc::Sender<Vec<u8>>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        loop {
            let mut line = Vec::new();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                },
            }
        }
    });
}

fn wait_with_deadline(child: &mut Child, timeout: Duration, cancel: &CancelToken) -> Termination {
    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                trace!("Child {} exited with {status}", child.id());
                return Termination::Exited {
                    success: status.success(),
                    code: status.code(),
                };
            },
            Ok(None) => {},
            Err(e) => {
                warn!("Failed to poll child {}: {e}, killing it", child.id());
                terminate(child);
                return Termination::Exited {
                    success: false,
                    code: None,
                };
            },
        }
        if cancel.is_cancelled() {
            debug!("Cancellation requested, killing child {}", child.id());
            terminate(child);
            return Termination::Cancelled;
        }
        if started.elapsed() >= timeout {
            warn!("Child {} exceeded {timeout:?}, killing it", child.id());
            terminate(child);
            return Termination::TimedOut;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Kill and reap the child. The process did start, so failures here are
/// logged rather than reported as launch errors.
fn terminate(child: &mut Child) {
    if let Err(e) = kill_and_reap(child) {
        warn!("Failed to terminate child {}: {e}", child.id());
    }
}

fn kill_and_reap(child: &mut Child) -> io::Result<()> {
    kill_group(child)?;
    child.wait()?;
    Ok(())
}

#[cfg(unix)]
fn kill_group(child: &mut Child) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(child.id()).map_err(io::Error::other)?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        // The whole group is already gone.
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) -> io::Result<()> {
    match child.kill() {
        // Already exited between the last poll and the kill.
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
        other => other,
    }
}
