//! AT command protocol engine.
//!
//! Bytes from the modem pass through three stages:
//!
//! - [`framer`] splits the stream into lines,
//! - [`urc`] picks out unsolicited notifications,
//! - [`correlator`] collects everything else as the answer to the command in
//!   flight.
//!
//! Notifications go to the upgrade session in [`crate::fota`]; each line ends
//! up in exactly one place.

pub mod command;
pub mod correlator;
pub mod framer;
pub mod urc;

pub use {
    command::{Command, DEFAULT_AT_TIMEOUT, Response, ResponseStatus},
    correlator::Correlator,
    framer::LineFramer,
    urc::{Urc, classify},
};
