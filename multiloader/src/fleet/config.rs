//! Fleet parameters and their reconciliation into a per-board table.
//!
//! Each parameter is either one value shared by every board or a list with
//! one value per board. Identity-critical parameters (part number,
//! programmer, baud rate) must match the fleet size exactly; a list of the
//! wrong length is rejected instead of being truncated or padded. Firmware
//! images are the exception: a short list repeats its last entry.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::discovery::PortDiscovery;
use crate::error::{Error, Result};
use crate::session::BoardSpec;

/// A value shared by every board, or one value per board.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum OneOrMany<T> {
    /// Broadcast to every board.
    One(T),
    /// Positionally matched to the boards.
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T> {
    /// Number of values given, or `None` for a broadcast value.
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::One(_) => None,
            Self::Many(values) => Some(values.len()),
        }
    }

    /// Whether this is an empty list.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Many(values) if values.is_empty())
    }

    /// Exactly `n` values: a broadcast value is repeated, a list must
    /// already have length `n`.
    pub fn broadcast(&self, n: usize, field: &str) -> Result<Vec<T>> {
        match self {
            Self::One(value) => Ok(vec![value.clone(); n]),
            Self::Many(values) if values.len() == n => Ok(values.clone()),
            Self::Many(values) => Err(Error::FleetConfig(format!(
                "`{field}` has {} values but the fleet has {n} boards",
                values.len()
            ))),
        }
    }

    /// Exactly `n` values, repeating the last entry of a short list.
    pub fn broadcast_repeat_last(&self, n: usize, field: &str) -> Result<Vec<T>> {
        match self {
            Self::One(value) => Ok(vec![value.clone(); n]),
            Self::Many(values) => {
                let Some(last) = values.last() else {
                    return Err(Error::FleetConfig(format!("`{field}` is an empty list")));
                };
                if values.len() > n {
                    return Err(Error::FleetConfig(format!(
                        "`{field}` has {} values but the fleet has only {n} boards",
                        values.len()
                    )));
                }
                let mut resolved = values.clone();
                resolved.resize(n, last.clone());
                Ok(resolved)
            },
        }
    }
}

impl<T> From<Vec<T>> for OneOrMany<T> {
    fn from(values: Vec<T>) -> Self {
        Self::Many(values)
    }
}

impl From<&str> for OneOrMany<String> {
    fn from(value: &str) -> Self {
        Self::One(value.to_string())
    }
}

impl From<String> for OneOrMany<String> {
    fn from(value: String) -> Self {
        Self::One(value)
    }
}

impl<const N: usize> From<[&str; N]> for OneOrMany<String> {
    fn from(values: [&str; N]) -> Self {
        Self::Many(values.iter().map(|v| (*v).to_string()).collect())
    }
}

impl From<u32> for OneOrMany<u32> {
    fn from(value: u32) -> Self {
        Self::One(value)
    }
}

impl<const N: usize> From<[u32; N]> for OneOrMany<u32> {
    fn from(values: [u32; N]) -> Self {
        Self::Many(values.to_vec())
    }
}

impl From<&str> for OneOrMany<PathBuf> {
    fn from(value: &str) -> Self {
        Self::One(PathBuf::from(value))
    }
}

impl From<PathBuf> for OneOrMany<PathBuf> {
    fn from(value: PathBuf) -> Self {
        Self::One(value)
    }
}

impl From<&Path> for OneOrMany<PathBuf> {
    fn from(value: &Path) -> Self {
        Self::One(value.to_path_buf())
    }
}

impl<const N: usize> From<[&str; N]> for OneOrMany<PathBuf> {
    fn from(values: [&str; N]) -> Self {
        Self::Many(values.iter().map(PathBuf::from).collect())
    }
}

/// Raw input of a batch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FleetConfig {
    /// Microcontroller variant(s).
    pub part_number: OneOrMany<String>,
    /// Programmer identifier(s).
    pub programmer_id: OneOrMany<String>,
    /// Baud rate(s).
    pub baud_rate: OneOrMany<u32>,
    /// Serial port(s); discovered when absent.
    #[cfg_attr(feature = "serde", serde(default))]
    pub port: Option<OneOrMany<String>>,
    /// Default firmware image(s) for flashing.
    #[cfg_attr(feature = "serde", serde(default))]
    pub hex_file: Option<OneOrMany<PathBuf>>,
    /// avrdude configuration file shared by every board.
    #[cfg_attr(feature = "serde", serde(default))]
    pub config_path: Option<PathBuf>,
}

impl FleetConfig {
    /// Configuration with ports and firmware left unspecified.
    pub fn new(
        part_number: impl Into<OneOrMany<String>>,
        programmer_id: impl Into<OneOrMany<String>>,
        baud_rate: impl Into<OneOrMany<u32>>,
    ) -> Self {
        Self {
            part_number: part_number.into(),
            programmer_id: programmer_id.into(),
            baud_rate: baud_rate.into(),
            port: None,
            hex_file: None,
            config_path: None,
        }
    }

    /// Set the serial port(s).
    #[must_use]
    pub fn with_ports(mut self, port: impl Into<OneOrMany<String>>) -> Self {
        self.port = Some(port.into());
        self
    }

    /// Set the default firmware image(s).
    #[must_use]
    pub fn with_hex_file(mut self, hex_file: impl Into<OneOrMany<PathBuf>>) -> Self {
        self.hex_file = Some(hex_file.into());
        self
    }

    /// Set the shared avrdude configuration file.
    #[must_use]
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Ports of the fleet, in board order. Their count is the fleet size.
    pub fn resolve_ports(&self, discovery: &dyn PortDiscovery) -> Result<Vec<String>> {
        let ports = match &self.port {
            Some(OneOrMany::One(port)) => vec![port.clone()],
            Some(OneOrMany::Many(ports)) => {
                if ports.is_empty() {
                    return Err(Error::FleetConfig("`port` is an empty list".to_string()));
                }
                ports.clone()
            },
            None => {
                let ports = discovery.discover_all_ports()?;
                if ports.is_empty() {
                    return Err(Error::FleetConfig(
                        "no serial ports discovered and none specified".to_string(),
                    ));
                }
                info!("Discovered {} port(s): {}", ports.len(), ports.join(", "));
                ports
            },
        };

        let mut seen = HashSet::new();
        if let Some(duplicate) = ports.iter().find(|p| !seen.insert(p.as_str())) {
            return Err(Error::FleetConfig(format!(
                "port {duplicate} is listed more than once"
            )));
        }
        Ok(ports)
    }

    /// The per-board table.
    ///
    /// `default_config_path` is used when no shared configuration file was
    /// set. Rows are not validated here; a row with an out-of-range value
    /// only makes its own board unusable.
    pub fn resolve_boards(
        &self,
        discovery: &dyn PortDiscovery,
        default_config_path: &Path,
    ) -> Result<Vec<BoardSpec>> {
        let ports = self.resolve_ports(discovery)?;
        let n = ports.len();

        let part_numbers = self.part_number.broadcast(n, "part_number")?;
        let programmer_ids = self.programmer_id.broadcast(n, "programmer_id")?;
        let baud_rates = self.baud_rate.broadcast(n, "baud_rate")?;
        if let Some(hex_file) = &self.hex_file {
            hex_file.broadcast_repeat_last(n, "hex_file")?;
        }
        let config_path = self
            .config_path
            .clone()
            .unwrap_or_else(|| default_config_path.to_path_buf());

        let boards: Vec<BoardSpec> = ports
            .into_iter()
            .zip(part_numbers)
            .zip(programmer_ids)
            .zip(baud_rates)
            .map(|(((port, part_number), programmer_id), baud_rate)| BoardSpec {
                part_number,
                programmer_id,
                baud_rate,
                port,
                config_path: config_path.clone(),
            })
            .collect();
        debug!("Resolved {} board(s)", boards.len());
        Ok(boards)
    }

    /// Default firmware per board, if any was configured.
    pub fn resolve_hex_files(&self, n: usize) -> Result<Option<Vec<PathBuf>>> {
        self.hex_file
            .as_ref()
            .map(|hex_file| hex_file.broadcast_repeat_last(n, "hex_file"))
            .transpose()
    }
}
