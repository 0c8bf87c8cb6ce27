//! List ports command.

use anyhow::{Context, Result};
use console::style;
use multiloader::{DetectedPort, SerialPortDiscovery};

use crate::Cli;

fn port_json(port: &DetectedPort) -> serde_json::Value {
    serde_json::json!({
        "name": port.name,
        "transport": port.transport.name(),
        "device": port.device.name(),
        "known": port.device.is_known(),
        "board_candidate": port.is_board_candidate(),
        "vid": port.vid,
        "pid": port.pid,
        "manufacturer": port.manufacturer,
        "product": port.product,
        "serial": port.serial,
    })
}

/// List ports command implementation.
///
/// Shows the same ports `test` and `flash` would use when no port is given.
pub(crate) fn cmd_list_ports(cli: &Cli) -> Result<()> {
    let detected = SerialPortDiscovery::new()
        .include_all(cli.all_ports)
        .detect()
        .context("Failed to enumerate serial ports")?;

    if cli.json {
        let ports: Vec<serde_json::Value> = detected.iter().map(port_json).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&ports).unwrap_or_default()
        );
        return Ok(());
    }

    eprintln!("{}", style("Serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No ports found").dim());
        if !cli.all_ports {
            eprintln!(
                "  {}",
                style("Use --all-ports to include built-in UARTs").dim()
            );
        }
        return Ok(());
    }

    for port in &detected {
        let device_type = if port.device.is_known() {
            format!(" [{}]", style(port.device.name()).yellow())
        } else {
            String::new()
        };

        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };

        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{}{}{} {}",
            style("•").green(),
            style(&port.name).cyan(),
            device_type,
            vid_pid,
            product,
            style(format!("({})", port.transport.name())).dim()
        );
    }

    Ok(())
}
