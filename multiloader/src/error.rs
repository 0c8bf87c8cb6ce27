//! Error types for multiloader.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for multiloader operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for multiloader operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (process pipes, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port enumeration error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No single serial port could be chosen for a board.
    #[error("Cannot resolve a serial port for {board}: {}", describe_candidates(.candidates))]
    PortResolution {
        /// Board the port was needed for.
        board: String,
        /// Ports that were found (empty when none were).
        candidates: Vec<String>,
    },

    /// The upload tool could not be started.
    #[error("Failed to launch `{command}` for {board}: {source}")]
    ProcessLaunch {
        /// Board the invocation targeted.
        board: String,
        /// Command line that was attempted.
        command: String,
        /// Underlying spawn error.
        #[source]
        source: io::Error,
    },

    /// The upload tool exceeded its time budget and was killed.
    #[error("`{command}` for {board} did not finish within {timeout:?} and was terminated")]
    ProcessTimeout {
        /// Board the invocation targeted.
        board: String,
        /// Command line that was run.
        command: String,
        /// Time budget that was exceeded.
        timeout: Duration,
        /// Output captured before termination.
        output: String,
    },

    /// The upload tool ran but reported a failure.
    #[error("{}", describe_tool_failure(.board, .exit_code, .signature_mismatch))]
    ToolReportedFailure {
        /// Board the invocation targeted.
        board: String,
        /// Command line that was run.
        command: String,
        /// Exit code, if the process exited normally.
        exit_code: Option<i32>,
        /// The output reported a device signature mismatch.
        signature_mismatch: bool,
        /// Merged stdout/stderr of the tool.
        output: String,
    },

    /// The operation was cancelled before or while it ran.
    #[error("Operation cancelled for {board}")]
    Cancelled {
        /// Board whose operation was cancelled.
        board: String,
    },

    /// Fleet parameters are inconsistent or incomplete.
    #[error("Fleet configuration error: {0}")]
    FleetConfig(String),

    /// A board parameter is out of range.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The session for a board could not be created, so it was skipped.
    #[error("Board #{index} is unavailable: {reason}")]
    SessionUnavailable {
        /// Index of the board in the fleet table.
        index: usize,
        /// Why the session could not be created.
        reason: String,
    },
}

impl Error {
    /// Tool output carried by this error, if any.
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            Self::ProcessTimeout { output, .. } | Self::ToolReportedFailure { output, .. } => {
                Some(output)
            },
            _ => None,
        }
    }
}

fn describe_candidates(candidates: &[String]) -> String {
    match candidates.len() {
        0 => "no ports found".to_string(),
        n => format!("{n} candidates ({})", candidates.join(", ")),
    }
}

fn describe_tool_failure(board: &str, exit_code: &Option<i32>, signature_mismatch: &bool) -> String {
    if *signature_mismatch {
        return format!("Device signature mismatch on {board}");
    }
    match exit_code {
        Some(code) => format!("Upload tool failed on {board} (exit code {code})"),
        None => format!("Upload tool failed on {board} (terminated by signal)"),
    }
}
