//! Port discovery.
//!
//! Sessions and fleets never enumerate ports themselves. They ask a
//! [`PortDiscovery`] implementation, which makes it possible to drive them
//! with a fixed list of ports in tests or when the user names the ports.

use crate::device::{self, DetectedPort};
use crate::error::{Error, Result};
use log::{debug, info};

/// Source of serial port identifiers.
pub trait PortDiscovery {
    /// All ports boards may be attached to, in a stable order.
    fn discover_all_ports(&self) -> Result<Vec<String>>;

    /// The one port a board is attached to.
    ///
    /// Fails with [`Error::PortResolution`] when there is no candidate or
    /// more than one.
    fn discover_single_port(&self, board: &str) -> Result<String> {
        let mut ports = self.discover_all_ports()?;
        if ports.len() == 1 {
            let port = ports.remove(0);
            info!("Auto-detected port {port} for {board}");
            Ok(port)
        } else {
            Err(Error::PortResolution {
                board: board.to_string(),
                candidates: ports,
            })
        }
    }
}

/// Discovery backed by the operating system's serial port list.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortDiscovery {
    include_all: bool,
}

impl SerialPortDiscovery {
    /// Discovery limited to USB-attached ports.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also report built-in UARTs and unclassified endpoints.
    #[must_use]
    pub fn include_all(mut self, include_all: bool) -> Self {
        self.include_all = include_all;
        self
    }

    /// Detailed endpoint list after filtering, sorted by name.
    pub fn detect(&self) -> Result<Vec<DetectedPort>> {
        let mut ports: Vec<DetectedPort> = device::detect_ports()?
            .into_iter()
            .filter(|p| self.include_all || p.is_board_candidate())
            .collect();
        ports.sort_by(|a, b| a.name.cmp(&b.name));
        ports.dedup_by(|a, b| a.name == b.name);
        debug!("Discovered {} candidate port(s)", ports.len());
        for line in device::format_port_list(&ports) {
            debug!("  {line}");
        }
        Ok(ports)
    }
}

impl PortDiscovery for SerialPortDiscovery {
    fn discover_all_ports(&self) -> Result<Vec<String>> {
        Ok(self
            .detect()?
            .into_iter()
            .map(|p| p.name)
            .collect())
    }
}

/// A fixed list of ports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticPorts(pub Vec<String>);

impl StaticPorts {
    /// Create a discovery that always reports `ports`.
    pub fn new<I, S>(ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(ports.into_iter().map(Into::into).collect())
    }
}

impl PortDiscovery for StaticPorts {
    fn discover_all_ports(&self) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_ports_all() {
        let discovery = StaticPorts::new(["/dev/ttyUSB0", "/dev/ttyUSB1"]);
        assert_eq!(
            discovery.discover_all_ports().unwrap(),
            vec!["/dev/ttyUSB0".to_string(), "/dev/ttyUSB1".to_string()]
        );
    }

    #[test]
    fn test_single_port_exactly_one() {
        let discovery = StaticPorts::new(["COM3"]);
        assert_eq!(discovery.discover_single_port("atmega328p").unwrap(), "COM3");
    }

    #[test]
    fn test_single_port_none() {
        let discovery = StaticPorts::default();
        let err = discovery
            .discover_single_port("atmega328p")
            .unwrap_err();
        assert!(matches!(err, Error::PortResolution { ref candidates, .. } if candidates.is_empty()));
    }

    #[test]
    fn test_single_port_ambiguous() {
        let discovery = StaticPorts::new(["/dev/ttyUSB0", "/dev/ttyUSB1"]);
        match discovery.discover_single_port("atmega2560") {
            Err(Error::PortResolution { board, candidates }) => {
                assert_eq!(board, "atmega2560");
                assert_eq!(candidates.len(), 2);
            },
            other => panic!("Expected PortResolution, got {other:?}"),
        }
    }

    #[test]
    fn test_serial_discovery_does_not_panic() {
        // Result depends on the host; only enumeration itself is exercised.
        let _ = SerialPortDiscovery::new().include_all(true).discover_all_ports();
    }
}
