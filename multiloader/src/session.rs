//! Device sessions: one upload-tool target each.
//!
//! A [`DeviceSession`] binds a validated [`BoardSpec`] to the shared
//! [`Avrdude`] handle. Every operation classifies its run into a fresh
//! [`SessionOutcome`]; nothing is carried over from a previous run.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::avrdude::{Avrdude, Operation, has_signature_mismatch};
use crate::discovery::PortDiscovery;
use crate::error::{Error, Result};
use crate::process::{CancelToken, Termination};

/// Fully resolved configuration of one board.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoardSpec {
    /// Microcontroller variant, as avrdude names it (e.g. `atmega328p`).
    pub part_number: String,
    /// Programmer/protocol identifier (e.g. `arduino`, `wiring`).
    pub programmer_id: String,
    /// Serial baud rate.
    pub baud_rate: u32,
    /// Serial port the board is attached to.
    pub port: String,
    /// avrdude configuration file.
    pub config_path: PathBuf,
}

impl BoardSpec {
    /// Check the invariants a session relies on.
    pub fn validate(&self) -> Result<()> {
        if self.part_number.trim().is_empty() {
            return Err(Error::InvalidParameter(format!(
                "empty part number for port {}",
                self.port
            )));
        }
        if self.programmer_id.trim().is_empty() {
            return Err(Error::InvalidParameter(format!(
                "empty programmer id for {self}"
            )));
        }
        if self.baud_rate == 0 {
            return Err(Error::InvalidParameter(format!("baud rate of {self} must be positive")));
        }
        if self.port.trim().is_empty() {
            return Err(Error::InvalidParameter(format!(
                "empty serial port for {}",
                self.part_number
            )));
        }
        Ok(())
    }
}

impl fmt::Display for BoardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.part_number, self.port)
    }
}

/// Parameters for building a single session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    /// Microcontroller variant.
    pub part_number: String,
    /// Programmer/protocol identifier.
    pub programmer_id: String,
    /// Serial baud rate.
    pub baud_rate: u32,
    /// Serial port; discovered when `None`.
    pub port: Option<String>,
    /// avrdude configuration file; next to the binary when `None`.
    pub config_path: Option<PathBuf>,
}

impl SessionParams {
    /// Parameters with the port and configuration left to defaults.
    pub fn new(part_number: impl Into<String>, programmer_id: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            part_number: part_number.into(),
            programmer_id: programmer_id.into(),
            baud_rate,
            port: None,
            config_path: None,
        }
    }

    /// Set the serial port.
    #[must_use]
    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    /// Set the avrdude configuration file.
    #[must_use]
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }
}

/// Result of the most recent operation of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Merged tool output, verbatim.
    pub output: String,
}

/// Upload-tool session bound to one board.
#[derive(Debug)]
pub struct DeviceSession {
    board: BoardSpec,
    avrdude: Arc<Avrdude>,
    last_outcome: Option<SessionOutcome>,
}

impl DeviceSession {
    /// Build a session, discovering the port if none was given.
    pub fn new(
        params: SessionParams,
        avrdude: Arc<Avrdude>,
        discovery: &dyn PortDiscovery,
    ) -> Result<Self> {
        let port = match params.port {
            Some(port) => port,
            None => discovery.discover_single_port(&params.part_number)?,
        };
        let config_path = params
            .config_path
            .unwrap_or_else(|| avrdude.default_config_path());

        Self::from_board(
            BoardSpec {
                part_number: params.part_number,
                programmer_id: params.programmer_id,
                baud_rate: params.baud_rate,
                port,
                config_path,
            },
            avrdude,
        )
    }

    /// Build a session for an already resolved board.
    pub fn from_board(board: BoardSpec, avrdude: Arc<Avrdude>) -> Result<Self> {
        board.validate()?;
        info!("Connecting to port: {}", board.port);
        Ok(Self {
            board,
            avrdude,
            last_outcome: None,
        })
    }

    /// The board this session drives.
    pub fn board(&self) -> &BoardSpec {
        &self.board
    }

    /// Outcome of the most recent operation, if any ran.
    pub fn last_outcome(&self) -> Option<&SessionOutcome> {
        self.last_outcome.as_ref()
    }

    /// Query the board without writing. Returns whether it answered with the
    /// expected signature; the tool output is kept in [`Self::last_outcome`].
    pub fn test_connection(&mut self, extra_flags: &[String]) -> bool {
        self.check_connection(extra_flags, &CancelToken::new())
            .is_ok()
    }

    /// Query the board without writing, returning the classified result.
    ///
    /// A signature mismatch fails the check even when the tool exits zero.
    pub fn check_connection(&mut self, extra_flags: &[String], cancel: &CancelToken) -> Result<String> {
        self.run(&Operation::Query, extra_flags, cancel)
    }

    /// Write `hex_file` to program memory. Output is returned on success and
    /// on failure.
    pub fn flash_firmware(&mut self, hex_file: &Path, extra_flags: &[String]) -> (bool, String) {
        match self.write_firmware(hex_file, extra_flags, &CancelToken::new()) {
            Ok(output) => (true, output),
            Err(e) => {
                let output = e
                    .captured_output()
                    .map_or_else(|| e.to_string(), str::to_string);
                (false, output)
            },
        }
    }

    /// Write `hex_file` to program memory, returning the classified result.
    pub fn write_firmware(
        &mut self,
        hex_file: &Path,
        extra_flags: &[String],
        cancel: &CancelToken,
    ) -> Result<String> {
        self.run(&Operation::write(hex_file), extra_flags, cancel)
    }

    fn run(&mut self, operation: &Operation, extra_flags: &[String], cancel: &CancelToken) -> Result<String> {
        let result = self.invoke(operation, extra_flags, cancel);
        self.last_outcome = Some(match &result {
            Ok(output) => SessionOutcome {
                success: true,
                output: output.clone(),
            },
            Err(e) => SessionOutcome {
                success: false,
                output: e
                    .captured_output()
                    .map_or_else(|| e.to_string(), str::to_string),
            },
        });
        result
    }

    fn invoke(&self, operation: &Operation, extra_flags: &[String], cancel: &CancelToken) -> Result<String> {
        let board = self.board.to_string();
        if cancel.is_cancelled() {
            return Err(Error::Cancelled { board });
        }

        let invocation = self
            .avrdude
            .invocation(&self.board, operation, extra_flags);
        let command = invocation.to_string();
        info!("Executing: {command}");

        let out = self
            .avrdude
            .execute(&invocation, cancel)
            .map_err(|source| Error::ProcessLaunch {
                board: board.clone(),
                command: command.clone(),
                source,
            })?;

        match out.termination {
            Termination::Exited { success, code } => {
                let signature_mismatch = has_signature_mismatch(&out.output);
                let query = matches!(operation, Operation::Query);
                if success && !(query && signature_mismatch) {
                    debug!("{board}: tool finished successfully");
                    Ok(out.output)
                } else {
                    warn!("Error executing command for {board}: {}", out.output.trim_end());
                    Err(Error::ToolReportedFailure {
                        board,
                        command,
                        exit_code: code,
                        signature_mismatch,
                        output: out.output,
                    })
                }
            },
            Termination::TimedOut => Err(Error::ProcessTimeout {
                board,
                command,
                timeout: self.avrdude.timeout(),
                output: out.output,
            }),
            Termination::Cancelled => Err(Error::Cancelled { board }),
        }
    }
}
