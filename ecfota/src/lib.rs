//! # ecfota
//!
//! AT command engine and DFOTA upgrade driver for Quectel EC800K/EG800K
//! LTE modules.
//!
//! This crate talks to a module over its AT serial interface:
//!
//! - Line framing and unsolicited result code (URC) classification
//! - Command/response correlation with a background reader thread
//! - The `AT+QFOTADL` upgrade flow, driven by `+QIND: "FOTA"` notifications
//! - Identity, SIM, registration and signal queries
//! - DFOTA result-code descriptions
//!
//! ## Features
//!
//! - `native` (default): serial ports via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use ecfota::{FotaOutcome, Modem, ModemConfig, SerialConfig, UpgradeRequest};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let serial = SerialConfig::new("/dev/ttyUSB2", 115_200);
//!     let mut modem = Modem::open(&serial, ModemConfig::default())?;
//!
//!     println!("Firmware: {}", modem.query_firmware_version()?);
//!
//!     modem.start_upgrade(&UpgradeRequest::new("http://example.com/delta.bin"), None)?;
//!     match modem.wait_for_upgrade_completion(Duration::from_secs(300)) {
//!         FotaOutcome::Succeeded => println!("done"),
//!         other => println!("{other}"),
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod at;
pub mod codes;
pub mod device;
pub mod error;
pub mod fota;
pub mod info;
pub mod modem;
pub mod network;
pub mod port;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by blocking waits.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    at::{Command, Response, ResponseStatus, Urc},
    device::{DetectedPort, DeviceKind, TransportKind, auto_detect_port, detect_ports},
    error::{Error, Result},
    fota::{
        FotaEvent, FotaOutcome, FotaSnapshot, ProgressObserver, ResetMode, UpgradePhase,
        UpgradeRequest,
    },
    info::{ModuleInfo, SimStatus},
    modem::{Modem, ModemConfig},
    network::{RegistrationStatus, SignalQuality},
    port::{Port, SerialConfig},
};
