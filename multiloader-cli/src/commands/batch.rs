//! Test and flash command implementations.

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Error as DialoguerError, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use multiloader::avrdude::DEFAULT_TIMEOUT;
use multiloader::{
    Avrdude, BatchOutcome, BoardOutcome, CancelToken, ExecutionMode, FleetConfig, FleetController,
    OneOrMany, SerialPortDiscovery,
};
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::{Cli, CliError, use_fancy_output};

/// Programmer used when none is configured.
const DEFAULT_PROGRAMMER: &str = "arduino";
/// Baud rate used when none is configured.
const DEFAULT_BAUD: u32 = 115200;
/// Lines of tool output shown under a failed board.
const FAILURE_OUTPUT_LINES: usize = 6;

fn one_or_many<T: Clone>(values: &[T]) -> Option<OneOrMany<T>> {
    match values {
        [] => None,
        [value] => Some(OneOrMany::One(value.clone())),
        values => Some(OneOrMany::Many(values.to_vec())),
    }
}

/// Load a fleet manifest.
pub(crate) fn load_manifest(path: &Path) -> Result<FleetConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read fleet manifest {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Invalid fleet manifest {}", path.display()))
}

/// Fleet parameters from the command line, manifest and config file, in
/// that order of preference.
///
/// `hex` is `None` for operations that write nothing.
pub(crate) fn fleet_config(
    cli: &Cli,
    config: &Config,
    manifest: Option<&FleetConfig>,
    hex: Option<&[PathBuf]>,
) -> Result<FleetConfig> {
    let defaults = &config.fleet;

    let part_number = one_or_many(&cli.part)
        .or_else(|| manifest.map(|m| m.part_number.clone()))
        .or_else(|| defaults.part_number.clone())
        .ok_or_else(|| {
            CliError::Usage(
                "no part number given (use --part, MULTILOADER_PART or the config file)".to_string(),
            )
        })?;
    let programmer_id = one_or_many(&cli.programmer)
        .or_else(|| manifest.map(|m| m.programmer_id.clone()))
        .or_else(|| defaults.programmer_id.clone())
        .unwrap_or_else(|| OneOrMany::One(DEFAULT_PROGRAMMER.to_string()));
    let baud_rate = one_or_many(&cli.baud)
        .or_else(|| manifest.map(|m| m.baud_rate.clone()))
        .or_else(|| defaults.baud_rate.clone())
        .unwrap_or(OneOrMany::One(DEFAULT_BAUD));

    let mut fleet = FleetConfig::new(part_number, programmer_id, baud_rate);
    fleet.port = one_or_many(&cli.port)
        .or_else(|| manifest.and_then(|m| m.port.clone()))
        .or_else(|| defaults.port.clone());
    fleet.hex_file = hex.and_then(|hex| {
        one_or_many(hex)
            .or_else(|| manifest.and_then(|m| m.hex_file.clone()))
            .or_else(|| defaults.hex_file.clone())
    });
    fleet.config_path = cli
        .avrdude_config
        .clone()
        .or_else(|| manifest.and_then(|m| m.config_path.clone()))
        .or_else(|| config.tool.config_path.clone());
    Ok(fleet)
}

/// The avrdude handle described by the command line and config file.
pub(crate) fn avrdude_tool(cli: &Cli, config: &Config) -> Avrdude {
    let avrdude = match cli.avrdude.as_ref().or(config.tool.path.as_ref()) {
        Some(path) => Avrdude::new(path.clone()),
        None => Avrdude::locate(),
    };
    let timeout = cli
        .timeout
        .or(config.tool.timeout_secs.filter(|secs| *secs > 0))
        .map_or(DEFAULT_TIMEOUT, Duration::from_secs);
    avrdude.with_timeout(timeout)
}

fn ensure_images_exist(fleet: &FleetConfig) -> Result<()> {
    let images = match &fleet.hex_file {
        Some(OneOrMany::One(image)) => std::slice::from_ref(image),
        Some(OneOrMany::Many(images)) => images.as_slice(),
        None => {
            return Err(CliError::Usage(
                "no firmware image given (pass HEX or set fleet.hex_file)".to_string(),
            )
            .into());
        },
    };
    if let Some(missing) = images.iter().find(|image| !image.is_file()) {
        return Err(CliError::Usage(format!(
            "firmware image not found: {}",
            missing.display()
        ))
        .into());
    }
    Ok(())
}

fn build_controller(cli: &Cli, config: &Config, fleet_config: &FleetConfig, cancel: &CancelToken) -> Result<FleetController> {
    let avrdude = avrdude_tool(cli, config);
    debug!(
        "Using {} with a {:?} timeout",
        avrdude.program().display(),
        avrdude.timeout()
    );

    let mode = if cli.parallel || config.run.parallel {
        ExecutionMode::Parallel
    } else {
        ExecutionMode::Sequential
    };
    let discovery = SerialPortDiscovery::new().include_all(cli.all_ports);
    let fleet = FleetController::with_tool(fleet_config, &discovery, Arc::new(avrdude))
        .context("Failed to set up the fleet")?
        .with_execution_mode(mode)
        .with_cancel_token(cancel.clone());

    for (index, reason) in fleet.unusable() {
        warn!("Board #{index} will be skipped: {reason}");
    }
    Ok(fleet)
}

fn resolve(cli: &Cli, config: &Config, hex: Option<&[PathBuf]>) -> Result<FleetConfig> {
    let manifest = cli
        .manifest
        .as_deref()
        .map(load_manifest)
        .transpose()?;
    fleet_config(cli, config, manifest.as_ref(), hex)
}

fn install_interrupt_handler(cancel: &CancelToken) {
    let token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || token.cancel()) {
        warn!("Could not install Ctrl-C handler: {e}");
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(CliError::Usage(
            "flashing several boards needs confirmation; pass --yes or --non-interactive".to_string(),
        )
        .into())
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("flashing aborted".to_string()).into()
            } else {
                CliError::Usage(format!("confirmation prompt failed: {io_err}")).into()
            }
        },
    }
}

fn confirm_flash(fleet: &FleetController) -> Result<()> {
    ensure_interactive_terminal()?;

    eprintln!("{}", style("Boards to flash").bold().underlined());
    for (index, board) in fleet.boards().enumerate() {
        eprintln!("  {} [{index}] {board}", style("•").dim());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Flash {} boards?", fleet.len()))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(())
    } else {
        Err(CliError::Cancelled("flashing aborted".to_string()).into())
    }
}

/// Prints per-board lines as results come in.
struct Reporter {
    pb: ProgressBar,
    json: bool,
    quiet: bool,
}

impl Reporter {
    fn new(cli: &Cli, boards: usize, action: &str) -> Self {
        let pb = if cli.quiet || cli.json || !use_fancy_output() {
            ProgressBar::hidden()
        } else {
            let pb = ProgressBar::new(boards as u64);
            #[allow(clippy::unwrap_used)] // Static template string
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap()
                    .progress_chars("#>-"),
            );
            pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
            pb.set_message(format!("{action} {boards} board(s)"));
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        };
        Self {
            pb,
            json: cli.json,
            quiet: cli.quiet,
        }
    }

    fn board(&self, outcome: &BoardOutcome) {
        self.pb.inc(1);
        if self.json || (self.quiet && outcome.success()) {
            return;
        }
        let lines = board_lines(outcome, !self.quiet);
        self.pb.suspend(|| {
            for line in &lines {
                eprintln!("{line}");
            }
        });
    }

    fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

fn board_lines(outcome: &BoardOutcome, with_output: bool) -> Vec<String> {
    let label = format!("[{}] {}", outcome.index(), outcome.board());
    let Some(error) = outcome.error() else {
        return vec![format!("{} {label}", style("✓").green())];
    };

    let mut lines = vec![format!("{} {label}: {error}", style("✗").red())];
    if with_output {
        let output: Vec<&str> = outcome.output().lines().collect();
        let tail = output.len().saturating_sub(FAILURE_OUTPUT_LINES);
        lines.extend(
            output[tail..]
                .iter()
                .map(|line| format!("    {}", style(line).dim())),
        );
    }
    lines
}

fn outcome_json(operation: &str, outcome: &BatchOutcome) -> serde_json::Value {
    let boards: Vec<serde_json::Value> = outcome
        .iter()
        .map(|o| {
            let board = o.board();
            serde_json::json!({
                "index": o.index(),
                "port": board.port,
                "part_number": board.part_number,
                "programmer_id": board.programmer_id,
                "baud_rate": board.baud_rate,
                "config_path": board.config_path.display().to_string(),
                "success": o.success(),
                "error": o.error().map(ToString::to_string),
                "output": o.output(),
            })
        })
        .collect();

    serde_json::json!({
        "operation": operation,
        "total": outcome.len(),
        "succeeded": outcome.succeeded(),
        "failed": outcome.failed(),
        "boards": boards,
    })
}

fn finish_batch(cli: &Cli, operation: &str, outcome: &BatchOutcome, cancel: &CancelToken) -> Result<()> {
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome_json(operation, outcome)).unwrap_or_default()
        );
    } else if !cli.quiet || !outcome.all_succeeded() {
        let summary = format!("{}/{} boards succeeded", outcome.succeeded(), outcome.len());
        if outcome.all_succeeded() {
            eprintln!("\n{} {}", style("✓").green().bold(), style(summary).green());
        } else {
            eprintln!("\n{} {}", style("✗").red().bold(), style(summary).red());
        }
    }

    if cancel.is_cancelled() {
        return Err(CliError::Cancelled("interrupted".to_string()).into());
    }
    if !outcome.all_succeeded() {
        return Err(CliError::BoardsFailed {
            failed: outcome.failed(),
            total: outcome.len(),
        }
        .into());
    }
    Ok(())
}

/// Test command implementation.
pub(crate) fn cmd_test(cli: &Cli, config: &Config, extra: &[String]) -> Result<()> {
    let fleet_config = resolve(cli, config, None)?;
    let cancel = CancelToken::new();
    let mut fleet = build_controller(cli, config, &fleet_config, &cancel)?;

    install_interrupt_handler(&cancel);
    let reporter = Reporter::new(cli, fleet.len(), "Testing");
    let outcome = fleet.test_connections_with_progress(extra, &mut |o: &BoardOutcome| reporter.board(o));
    reporter.finish();

    finish_batch(cli, "test", &outcome, &cancel)
}

/// Flash command implementation.
pub(crate) fn cmd_flash(cli: &Cli, config: &Config, hex: &[PathBuf], extra: &[String]) -> Result<()> {
    let fleet_config = resolve(cli, config, Some(hex))?;
    ensure_images_exist(&fleet_config)?;

    let cancel = CancelToken::new();
    let mut fleet = build_controller(cli, config, &fleet_config, &cancel)?;

    if fleet.len() > 1 && !cli.yes && !cli.non_interactive {
        confirm_flash(&fleet)?;
    }

    install_interrupt_handler(&cancel);
    let reporter = Reporter::new(cli, fleet.len(), "Flashing");
    let outcome = fleet.flash_firmware_with_progress(None, extra, &mut |o: &BoardOutcome| reporter.board(o));
    reporter.finish();

    finish_batch(cli, "flash", &outcome?, &cancel)
}
