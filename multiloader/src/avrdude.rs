//! The avrdude upload tool.
//!
//! [`Avrdude`] knows where the binary lives, where its configuration file is
//! expected, how long an invocation may take and how to build the command
//! line for a board. It is shared read-only between all sessions of a fleet.

use std::env;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::process::{CancelToken, Invocation, ProcessOutput, ProcessRunner, ToolRunner};
use crate::session::BoardSpec;

/// Default time budget for one avrdude invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Name of the avrdude executable.
#[cfg(windows)]
pub const TOOL_NAME: &str = "avrdude.exe";
/// Name of the avrdude executable.
#[cfg(not(windows))]
pub const TOOL_NAME: &str = "avrdude";

/// File name of avrdude's part/programmer database.
pub const CONFIG_FILE_NAME: &str = "avrdude.conf";

/// Output fragments avrdude prints when the connected chip is not the part
/// that was asked for. Some avrdude builds exit 0 after printing these
/// (for example with `-F`), so exit status alone is not enough.
///
/// Markers are lowercase and matched case-insensitively: avrdude 7.1 and
/// later print `avrdude error: expected signature for ...`.
pub const SIGNATURE_MISMATCH_MARKERS: &[&str] = &[
    "expected signature for",
    "invalid device signature",
    "signature mismatch",
];

/// Whether avrdude output reports a device signature mismatch.
pub fn has_signature_mismatch(output: &str) -> bool {
    let output = output.to_ascii_lowercase();
    SIGNATURE_MISMATCH_MARKERS
        .iter()
        .any(|marker| output.contains(marker))
}

/// File format directive of a `-U` memory operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Intel HEX (`i`).
    IntelHex,
    /// Raw binary (`r`).
    RawBinary,
    /// ELF executable (`e`).
    Elf,
    /// Motorola S-record (`s`).
    SRecord,
    /// Let avrdude guess (`a`).
    Auto,
}

impl ImageFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("hex" | "ihex" | "ihx") => Self::IntelHex,
            Some("bin") => Self::RawBinary,
            Some("elf") => Self::Elf,
            Some("srec" | "s19" | "s28" | "s37") => Self::SRecord,
            _ => Self::Auto,
        }
    }

    /// avrdude's single-letter code.
    pub fn code(self) -> char {
        match self {
            Self::IntelHex => 'i',
            Self::RawBinary => 'r',
            Self::Elf => 'e',
            Self::SRecord => 's',
            Self::Auto => 'a',
        }
    }
}

/// What an invocation asks avrdude to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Connect and read the device signature without writing anything.
    Query,
    /// Write an image to program memory.
    Write {
        /// Firmware image.
        image: PathBuf,
        /// Image file format.
        format: ImageFormat,
    },
}

impl Operation {
    /// Write `image`, with the format derived from its extension.
    pub fn write(image: impl Into<PathBuf>) -> Self {
        let image = image.into();
        let format = ImageFormat::from_path(&image);
        Self::Write { image, format }
    }
}

/// Handle on the avrdude executable.
#[derive(Clone)]
pub struct Avrdude {
    program: PathBuf,
    timeout: Duration,
    runner: Arc<dyn ToolRunner>,
}

impl fmt::Debug for Avrdude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Avrdude")
            .field("program", &self.program)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Avrdude {
    /// Use the avrdude found on `PATH`, or the bare name if there is none.
    pub fn locate() -> Self {
        let program = find_in_path(TOOL_NAME).unwrap_or_else(|| PathBuf::from(TOOL_NAME));
        debug!("Using avrdude at {}", program.display());
        Self::new(program)
    }

    /// Use the executable at `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_TIMEOUT,
            runner: Arc::new(ProcessRunner),
        }
    }

    /// Set the per-invocation time budget.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the process runner.
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn ToolRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Path of the executable.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Per-invocation time budget.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `avrdude.conf` next to the executable.
    pub fn default_config_path(&self) -> PathBuf {
        match self.program.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(CONFIG_FILE_NAME),
            _ => PathBuf::from(CONFIG_FILE_NAME),
        }
    }

    /// Build the command line for `operation` on `board`.
    pub fn invocation(
        &self,
        board: &BoardSpec,
        operation: &Operation,
        extra_flags: &[String],
    ) -> Invocation {
        let mut args = vec![
            "-c".to_string(),
            board.programmer_id.clone(),
            "-b".to_string(),
            board.baud_rate.to_string(),
            "-p".to_string(),
            board.part_number.clone(),
            "-P".to_string(),
            board.port.clone(),
            "-C".to_string(),
            board.config_path.display().to_string(),
        ];
        if let Operation::Write { image, format } = operation {
            args.push("-U".to_string());
            args.push(format!("flash:w:{}:{}", image.display(), format.code()));
        }
        args.extend(extra_flags.iter().cloned());
        Invocation::new(self.program.clone(), args)
    }

    /// Execute `invocation` within the configured timeout.
    pub fn execute(&self, invocation: &Invocation, cancel: &CancelToken) -> io::Result<ProcessOutput> {
        self.runner.run(invocation, self.timeout, cancel)
    }
}

impl Default for Avrdude {
    fn default() -> Self {
        Self::locate()
    }
}

/// First executable called `name` on `PATH`.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
