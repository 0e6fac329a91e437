//! Error types for ecfota.

use std::io;
use thiserror::Error;

use crate::network::RegistrationStatus;

/// Result type for ecfota operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for ecfota operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port read/write).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The transport is not open, or was closed while waiting.
    #[error("Modem is not connected")]
    NotConnected,

    /// A required answer did not arrive in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The modem answered a command with `ERROR` (or without `OK`).
    #[error("Command {command} failed: {response}")]
    CommandFailed {
        /// Command text as sent.
        command: String,
        /// Raw response text, or a placeholder when nothing arrived.
        response: String,
    },

    /// The modem is not attached to a network, so it cannot fetch firmware.
    #[error("Network not registered: {0}")]
    NetworkNotRegistered(RegistrationStatus),

    /// Upgrade URL exceeds what `AT+QFOTADL` accepts.
    #[error("URL length {len} exceeds the {max} character limit")]
    UrlTooLong {
        /// Length of the rejected URL.
        len: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// Response could not be interpreted.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The embedding application requested a stop.
    #[error("Operation interrupted")]
    Interrupted,

    /// No suitable serial port was found.
    #[error("Device not found")]
    DeviceNotFound,

    /// Unsupported operation on this platform.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}
