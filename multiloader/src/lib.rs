//! # multiloader
//!
//! A library for flashing and checking many AVR boards in one run.
//!
//! Each board is driven through the external `avrdude` tool. This crate
//! takes care of the parts around it:
//!
//! - serial port discovery and classification of USB bridges
//! - per-board command lines built from shared or per-board parameters
//! - supervised tool runs with a timeout and cooperative cancellation
//! - batch operations where one failing board never stops the others
//!
//! ## Features
//!
//! - `native` (default): serial port enumeration via the `serialport` crate
//! - `serde`: Serialization support for fleet configuration and board specs
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use multiloader::{Avrdude, ExecutionMode, FleetConfig, FleetController, SerialPortDiscovery};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Every attached USB board, flashed with the same image
//!     let config = FleetConfig::new("atmega328p", "arduino", 115200).with_hex_file("blink.hex");
//!
//!     let avrdude = Avrdude::locate().with_timeout(Duration::from_secs(30));
//!     let mut fleet = FleetController::with_tool(&config, &SerialPortDiscovery::new(), Arc::new(avrdude))?
//!         .with_execution_mode(ExecutionMode::Parallel);
//!
//!     let outcome = fleet.flash_firmware(None, &[])?;
//!     println!("{outcome}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod avrdude;
pub mod device;
pub mod discovery;
pub mod error;
pub mod fleet;
pub mod process;
pub mod session;

pub use avrdude::{Avrdude, ImageFormat, Operation};
pub use device::{DetectedPort, DeviceKind, TransportKind, detect_ports};
pub use discovery::{PortDiscovery, SerialPortDiscovery, StaticPorts};
pub use error::{Error, Result};
pub use fleet::{BatchOutcome, BoardOutcome, ExecutionMode, FleetConfig, FleetController, OneOrMany};
pub use process::{CancelToken, Invocation, ProcessOutput, ProcessRunner, Termination, ToolRunner};
pub use session::{BoardSpec, DeviceSession, SessionOutcome, SessionParams};
