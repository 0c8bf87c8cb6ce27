//! multiloader CLI - Command-line tool for flashing many AVR boards at once.
//!
//! ## Features
//!
//! - Check or flash every attached board in one run
//! - Per-board part numbers, programmers, baud rates and images
//! - Sequential or parallel execution with a per-board timeout
//! - Layered TOML configuration and fleet manifests
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if animations and symbols should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Failures that map to a specific exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad or missing arguments or configuration (exit 2).
    #[error("{0}")]
    Usage(String),
    /// The user aborted the run (exit 130).
    #[error("{0}")]
    Cancelled(String),
    /// The batch ran but some boards failed (exit 1).
    #[error("{failed} of {total} boards failed")]
    BoardsFailed {
        /// Number of failed boards.
        failed: usize,
        /// Number of boards in the batch.
        total: usize,
    },
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Cancelled(_) => 130,
            Self::BoardsFailed { .. } => 1,
        }
    }
}

/// multiloader - Flash and check many AVR boards through avrdude.
///
/// Environment variables:
///   MULTILOADER_AVRDUDE          - Path to the avrdude executable
///   MULTILOADER_PART             - Part number(s), comma-separated
///   MULTILOADER_PROGRAMMER       - Programmer id(s), comma-separated
///   MULTILOADER_BAUD             - Baud rate(s), comma-separated (default: 115200)
///   MULTILOADER_PORT             - Serial port(s), comma-separated
///   MULTILOADER_NON_INTERACTIVE  - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "multiloader")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Microcontroller part number, one for all boards or one per board.
    #[arg(
        short = 'p',
        long = "part",
        global = true,
        env = "MULTILOADER_PART",
        value_delimiter = ','
    )]
    pub(crate) part: Vec<String>,

    /// Programmer id (default: arduino), one for all boards or one per board.
    #[arg(
        short = 'c',
        long,
        global = true,
        env = "MULTILOADER_PROGRAMMER",
        value_delimiter = ','
    )]
    pub(crate) programmer: Vec<String>,

    /// Baud rate (default: 115200), one for all boards or one per board.
    #[arg(
        short,
        long,
        global = true,
        env = "MULTILOADER_BAUD",
        value_delimiter = ','
    )]
    pub(crate) baud: Vec<u32>,

    /// Serial ports, one per board (discovered if not specified).
    #[arg(
        short = 'P',
        long,
        global = true,
        env = "MULTILOADER_PORT",
        value_delimiter = ','
    )]
    pub(crate) port: Vec<String>,

    /// Path to the avrdude executable (searched on PATH if not specified).
    #[arg(long, global = true, env = "MULTILOADER_AVRDUDE", value_name = "PATH")]
    pub(crate) avrdude: Option<PathBuf>,

    /// avrdude configuration file (default: avrdude.conf next to avrdude).
    #[arg(short = 'C', long, global = true, value_name = "PATH")]
    pub(crate) avrdude_config: Option<PathBuf>,

    /// Per-board time limit in seconds (default: 15).
    #[arg(
        long,
        global = true,
        value_name = "SECS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub(crate) timeout: Option<u64>,

    /// Drive all boards at the same time.
    #[arg(long, global = true)]
    pub(crate) parallel: bool,

    /// Consider every serial port, not only USB-attached ones.
    #[arg(long, global = true)]
    pub(crate) all_ports: bool,

    /// Fleet manifest (TOML) describing the boards.
    #[arg(long, global = true, value_name = "PATH")]
    pub(crate) manifest: Option<PathBuf>,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    /// Print results as JSON to stdout.
    #[arg(long, global = true)]
    pub(crate) json: bool,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Non-interactive mode (never prompt).
    #[arg(long, global = true, env = "MULTILOADER_NON_INTERACTIVE")]
    pub(crate) non_interactive: bool,

    /// Flash several boards without asking for confirmation.
    #[arg(short = 'y', long, global = true)]
    pub(crate) yes: bool,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Check that every board answers, without writing anything.
    Test {
        /// Extra avrdude flags, passed verbatim after `--`.
        #[arg(last = true, value_name = "EXTRA")]
        extra: Vec<String>,
    },

    /// Write firmware to every board.
    Flash {
        /// Firmware image, one for all boards or one per board.
        #[arg(value_name = "HEX")]
        hex: Vec<PathBuf>,

        /// Extra avrdude flags, passed verbatim after `--`.
        #[arg(last = true, value_name = "EXTRA")]
        extra: Vec<String>,
    },

    /// List serial ports boards may be attached to.
    ListPorts,

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return cli_err.exit_code();
    }
    match err.downcast_ref::<multiloader::Error>() {
        Some(
            multiloader::Error::FleetConfig(_)
            | multiloader::Error::InvalidParameter(_)
            | multiloader::Error::PortResolution { .. },
        ) => 2,
        Some(multiloader::Error::Cancelled { .. }) => 130,
        _ => 1,
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Test { extra } => commands::batch::cmd_test(cli, &config, extra),
        Commands::Flash { hex, extra } => commands::batch::cmd_flash(cli, &config, hex, extra),
        Commands::ListPorts => commands::ports::cmd_list_ports(cli),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    debug!(
        "multiloader v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}
