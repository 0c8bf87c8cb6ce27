//! Fleet controller: one batch operation across many boards.
//!
//! [`FleetController`] resolves a [`FleetConfig`] into a board table, builds
//! one [`DeviceSession`] per row and drives them through
//! [`FleetController::test_connections`] and
//! [`FleetController::flash_firmware`]. A board that fails, times out or
//! could not even be set up never stops the others; every batch returns one
//! [`BoardOutcome`] per board, in table order.
//!
//! ```rust,no_run
//! use multiloader::{FleetConfig, FleetController, SerialPortDiscovery};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FleetConfig::new("atmega328p", "arduino", 115200)
//!         .with_ports(["/dev/ttyUSB0", "/dev/ttyUSB1"])
//!         .with_hex_file("blink.hex");
//!
//!     let mut fleet = FleetController::new(&config, &SerialPortDiscovery::new())?;
//!     let outcome = fleet.flash_firmware(None, &[])?;
//!     for board in &outcome {
//!         println!("{board}");
//!     }
//!     Ok(())
//! }
//! ```

mod config;
mod outcome;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use log::{error, info, warn};

pub use config::{FleetConfig, OneOrMany};
pub use outcome::{BatchOutcome, BoardOutcome};

use crate::avrdude::Avrdude;
use crate::discovery::PortDiscovery;
use crate::error::{Error, Result};
use crate::process::CancelToken;
use crate::session::{BoardSpec, DeviceSession};

/// How the sessions of a batch are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// One board after the other.
    #[default]
    Sequential,
    /// One thread per board, joined before the batch returns.
    Parallel,
}

/// A row of the board table and the session built from it.
#[derive(Debug)]
struct BoardSlot {
    board: BoardSpec,
    /// Why the session could not be built, if it could not.
    session: std::result::Result<DeviceSession, String>,
}

enum Task<'a> {
    Query,
    Flash(&'a [PathBuf]),
}

/// Owner of the sessions of a fleet.
#[derive(Debug)]
pub struct FleetController {
    slots: Vec<BoardSlot>,
    default_hex_files: Option<Vec<PathBuf>>,
    mode: ExecutionMode,
    cancel: CancelToken,
}

impl FleetController {
    /// Build a fleet using the avrdude found on `PATH`.
    pub fn new(config: &FleetConfig, discovery: &dyn PortDiscovery) -> Result<Self> {
        Self::with_tool(config, discovery, Arc::new(Avrdude::locate()))
    }

    /// Build a fleet driving the given avrdude handle.
    ///
    /// Fails when the configuration is inconsistent or when not a single
    /// board could be set up. Boards that fail individually are kept and
    /// reported as unavailable by every batch.
    pub fn with_tool(
        config: &FleetConfig,
        discovery: &dyn PortDiscovery,
        avrdude: Arc<Avrdude>,
    ) -> Result<Self> {
        let boards = config.resolve_boards(discovery, &avrdude.default_config_path())?;
        let default_hex_files = config.resolve_hex_files(boards.len())?;

        let slots: Vec<BoardSlot> = boards
            .into_iter()
            .enumerate()
            .map(|(index, board)| {
                let session = DeviceSession::from_board(board.clone(), Arc::clone(&avrdude)).map_err(|e| {
                    warn!("Board #{index} ({board}) is unusable: {e}");
                    e.to_string()
                });
                BoardSlot { board, session }
            })
            .collect();

        if let Some(reason) = first_unusable_if_all(&slots) {
            return Err(Error::FleetConfig(format!("no usable boards ({reason})")));
        }

        info!(
            "Fleet ready: {} board(s), {} usable",
            slots.len(),
            slots.iter().filter(|s| s.session.is_ok()).count()
        );

        Ok(Self {
            slots,
            default_hex_files,
            mode: ExecutionMode::default(),
            cancel: CancelToken::new(),
        })
    }

    /// Set how boards are scheduled.
    #[must_use]
    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Use `token` to cancel batches from elsewhere (e.g. a Ctrl-C handler).
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Handle that cancels running and future batches of this fleet.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Scheduling mode.
    pub fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Number of boards in the table.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the table is empty (never true for a constructed fleet).
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Boards in table order.
    pub fn boards(&self) -> impl Iterator<Item = &BoardSpec> {
        self.slots.iter().map(|s| &s.board)
    }

    /// Session of the board at `index`, if it could be built.
    pub fn session(&self, index: usize) -> Option<&DeviceSession> {
        self.slots
            .get(index)
            .and_then(|s| s.session.as_ref().ok())
    }

    /// Number of boards with a session.
    pub fn usable_count(&self) -> usize {
        self.slots.iter().filter(|s| s.session.is_ok()).count()
    }

    /// Boards without a session, with the reason.
    pub fn unusable(&self) -> impl Iterator<Item = (usize, &str)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.session.as_ref().err().map(|reason| (i, reason.as_str())))
    }

    /// Query every board without writing.
    pub fn test_connections(&mut self, extra_flags: &[String]) -> BatchOutcome {
        self.test_connections_with_progress(extra_flags, &mut |_: &BoardOutcome| {})
    }

    /// [`Self::test_connections`], reporting each board as it completes.
    pub fn test_connections_with_progress(
        &mut self,
        extra_flags: &[String],
        progress: &mut dyn FnMut(&BoardOutcome),
    ) -> BatchOutcome {
        self.run_batch(&Task::Query, extra_flags, progress)
    }

    /// Write firmware to every board.
    ///
    /// `hex_file` overrides the images given at construction. Without
    /// either, nothing runs and a [`Error::FleetConfig`] is returned.
    pub fn flash_firmware(
        &mut self,
        hex_file: Option<&OneOrMany<PathBuf>>,
        extra_flags: &[String],
    ) -> Result<BatchOutcome> {
        self.flash_firmware_with_progress(hex_file, extra_flags, &mut |_: &BoardOutcome| {})
    }

    /// [`Self::flash_firmware`], reporting each board as it completes.
    pub fn flash_firmware_with_progress(
        &mut self,
        hex_file: Option<&OneOrMany<PathBuf>>,
        extra_flags: &[String],
        progress: &mut dyn FnMut(&BoardOutcome),
    ) -> Result<BatchOutcome> {
        let hex_files = match hex_file {
            Some(hex_file) => hex_file.broadcast_repeat_last(self.slots.len(), "hex_file")?,
            None => self.default_hex_files.clone().ok_or_else(|| {
                Error::FleetConfig("no firmware image given for flashing".to_string())
            })?,
        };
        Ok(self.run_batch(&Task::Flash(&hex_files), extra_flags, progress))
    }

    fn run_batch(
        &mut self,
        task: &Task<'_>,
        extra_flags: &[String],
        progress: &mut dyn FnMut(&BoardOutcome),
    ) -> BatchOutcome {
        let cancel = &self.cancel;
        let results: Vec<BoardOutcome> = match self.mode {
            ExecutionMode::Sequential => self
                .slots
                .iter_mut()
                .enumerate()
                .map(|(index, slot)| {
                    let outcome = run_slot(index, slot, task, extra_flags, cancel);
                    progress(&outcome);
                    outcome
                })
                .collect(),
            ExecutionMode::Parallel => {
                let results: Vec<BoardOutcome> = thread::scope(|scope| {
                    let handles: Vec<_> = self
                        .slots
                        .iter_mut()
                        .enumerate()
                        .map(|(index, slot)| {
                            let board = slot.board.clone();
                            let handle = scope.spawn(move || run_slot(index, slot, task, extra_flags, cancel));
                            (index, board, handle)
                        })
                        .collect();

                    handles
                        .into_iter()
                        .map(|(index, board, handle)| {
                            handle.join().unwrap_or_else(|_| {
                                error!("Worker for board #{index} ({board}) panicked");
                                BoardOutcome::failed(
                                    index,
                                    board,
                                    Error::Io(io::Error::other("board worker panicked")),
                                )
                            })
                        })
                        .collect()
                });
                for outcome in &results {
                    progress(outcome);
                }
                results
            },
        };

        let batch = BatchOutcome::new(results);
        info!("{}/{} boards succeeded", batch.succeeded(), batch.len());
        batch
    }
}

fn first_unusable_if_all(slots: &[BoardSlot]) -> Option<&str> {
    if slots.iter().any(|s| s.session.is_ok()) {
        return None;
    }
    slots
        .iter()
        .find_map(|s| s.session.as_ref().err().map(String::as_str))
}

fn run_slot(
    index: usize,
    slot: &mut BoardSlot,
    task: &Task<'_>,
    extra_flags: &[String],
    cancel: &CancelToken,
) -> BoardOutcome {
    let board = slot.board.clone();
    let session = match &mut slot.session {
        Ok(session) => session,
        Err(reason) => {
            let reason = reason.clone();
            return BoardOutcome::failed(index, board, Error::SessionUnavailable { index, reason });
        },
    };

    let result = match task {
        Task::Query => session.check_connection(extra_flags, cancel),
        Task::Flash(hex_files) => session.write_firmware(&hex_files[index], extra_flags, cancel),
    };

    match result {
        Ok(output) => {
            info!("Board #{index} ({board}) succeeded");
            BoardOutcome::succeeded(index, board, output)
        },
        Err(e) => {
            error!("Board #{index} ({board}) failed: {e}");
            BoardOutcome::failed(index, board, e)
        },
    }
}
