//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod codes;
pub(crate) mod completions;
pub(crate) mod fota;
pub(crate) mod modem;
pub(crate) mod ports;
