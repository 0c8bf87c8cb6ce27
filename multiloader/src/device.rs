//! Serial endpoint enumeration and classification.
//!
//! Enumeration goes through the `serialport` crate. Each endpoint is tagged
//! with the USB bridge it sits behind, so callers can tell an Arduino-style
//! board apart from an on-board UART.

#[cfg(feature = "native")]
use log::{debug, trace};

/// Transport type for discovered endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// USB-attached serial device (CDC-ACM or USB-UART bridge).
    Usb,
    /// Built-in or PCI UART.
    Native,
    /// Bluetooth serial profile.
    Bluetooth,
    /// Unknown or unclassified transport.
    Unknown,
}

impl TransportKind {
    /// Short lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Usb => "usb",
            Self::Native => "native",
            Self::Bluetooth => "bluetooth",
            Self::Unknown => "unknown",
        }
    }
}

/// USB bridges and boards commonly found in front of AVR targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Genuine Arduino board (ATmega16U2/32U4 USB interface).
    Arduino,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI FT232/FT2232 USB-to-Serial converter.
    Ftdi,
    /// Prolific PL2303 USB-to-Serial converter.
    Prolific,
    /// Microchip/Atmel programmer or evaluation kit.
    Microchip,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs. An empty PID list matches any product.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (0x2341, &[], DeviceKind::Arduino),
    (0x2A03, &[], DeviceKind::Arduino),
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x55D4],
        DeviceKind::Ch340,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71], DeviceKind::Cp210x),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        DeviceKind::Ftdi,
    ),
    (0x067B, &[0x2303, 0x23A3], DeviceKind::Prolific),
    (0x03EB, &[], DeviceKind::Microchip),
];

impl DeviceKind {
    /// Classify a USB VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        for (known_vid, pids, device) in KNOWN_USB_DEVICES {
            if vid == *known_vid && (pids.is_empty() || pids.contains(&pid)) {
                return *device;
            }
        }
        Self::Unknown
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Arduino => "Arduino",
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::Microchip => "Microchip",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Discovered serial endpoint.
#[derive(Debug, Clone)]
pub struct DetectedPort {
    /// Endpoint name/path (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// Transport type.
    pub transport: TransportKind,
    /// Classified device kind.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// Endpoint with only a name, as used for explicitly configured ports.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Unknown,
            device: DeviceKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    /// Whether a board can plausibly sit behind this endpoint.
    pub fn is_board_candidate(&self) -> bool {
        self.transport == TransportKind::Usb || self.device.is_known()
    }
}

/// Enumerate every serial endpoint the OS reports.
#[cfg(feature = "native")]
pub fn detect_ports() -> crate::Result<Vec<DetectedPort>> {
    let ports = serialport::available_ports().inspect_err(|e| {
        debug!("Failed to enumerate serial ports: {e}");
    })?;

    Ok(ports
        .into_iter()
        .map(|port_info| {
            let mut detected = DetectedPort::named(port_info.port_name);
            match port_info.port_type {
                serialport::SerialPortType::UsbPort(usb_info) => {
                    detected.transport = TransportKind::Usb;
                    detected.vid = Some(usb_info.vid);
                    detected.pid = Some(usb_info.pid);
                    detected.device = DeviceKind::from_vid_pid(usb_info.vid, usb_info.pid);
                    detected.manufacturer = usb_info.manufacturer;
                    detected.product = usb_info.product;
                    detected.serial = usb_info.serial_number;

                    trace!(
                        "Found USB port: {} (VID: {:04X}, PID: {:04X}, Device: {:?})",
                        detected.name, usb_info.vid, usb_info.pid, detected.device
                    );
                },
                serialport::SerialPortType::PciPort => detected.transport = TransportKind::Native,
                serialport::SerialPortType::BluetoothPort => {
                    detected.transport = TransportKind::Bluetooth;
                },
                serialport::SerialPortType::Unknown => {},
            }
            detected
        })
        .collect())
}

/// Enumerate serial endpoints (no native support compiled in).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> crate::Result<Vec<DetectedPort>> {
    Ok(Vec::new())
}

/// Format a list of detected endpoints for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let device_info = if port.device.is_known() {
                format!(" [{}]", port.device.name())
            } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };

            let product_info = port
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();

            format!("{}{}{}", port.name, device_info, product_info)
        })
        .collect()
}
