//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod batch;
pub(crate) mod completions;
pub(crate) mod ports;
