//! Transport abstraction for the modem's AT interface.
//!
//! The protocol engine never opens a port itself. It is handed something that
//! implements [`Port`], clones a read half for the background reader, and keeps
//! the write half for commands:
//!
//! ```text
//!        foreground (commands)            background (reader thread)
//!   +---------------------------+     +-----------------------------+
//!   |  Modem::send_command      |     |  LineFramer -> urc::classify |
//!   +-------------+-------------+     +--------------+--------------+
//!                 | write half                      | read half
//!                 v                                 v
//!   +-------------+---------------------------------+--------------+
//!   |              Port (NativePort / test MockPort)               |
//!   +--------------------------------------------------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use ecfota::port::Port;
//!
//! fn ping<P: Port>(port: &mut P) -> ecfota::Result<()> {
//!     port.write_all_bytes(b"AT\r\n")?;
//!
//!     let mut buf = [0u8; 64];
//!     let n = port.read_available(&mut buf)?;
//!     println!("Received: {:?}", String::from_utf8_lossy(&buf[..n]));
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Default baud rate of the EC800K/EG800K main UART and USB AT port.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Line settings for the module's AT interface.
///
/// The AT port always runs 8N1; only the baud rate and RTS/CTS are
/// configurable. The USB interfaces ignore both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB2", "COM8").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Initial read timeout; the reader replaces it with its poll interval.
    pub timeout: Duration,
    /// Use RTS/CTS hardware flow control (main UART wired with handshake lines).
    pub rts_cts: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: Duration::from_millis(100),
            rts_cts: false,
        }
    }
}

impl SerialConfig {
    /// 8N1 at `baud_rate`, no flow control.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the initial timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable RTS/CTS.
    #[must_use]
    pub fn with_rts_cts(mut self, enabled: bool) -> Self {
        self.rts_cts = enabled;
        self
    }
}

/// Byte transport carrying the AT command stream.
///
/// Implementations must allow a second handle to the same device via
/// [`Port::try_clone_port`]; the reader thread blocks in `read` on its clone
/// while the foreground writes on the original.
pub trait Port: Read + Write + Send {
    /// Bound on how long a single `read` blocks.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Current line speed.
    fn baud_rate(&self) -> u32;

    /// Drop anything still queued in either direction.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Device path, for logs.
    fn name(&self) -> &str;

    /// Open a second handle to the same device.
    fn try_clone_port(&self) -> Result<Box<dyn Port>>;

    /// Release the device. Further I/O on this handle fails.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }

    /// Read whatever is available within the port timeout.
    ///
    /// A timeout is not an error here: it yields `Ok(0)`.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

impl<P: Port + ?Sized> Port for Box<P> {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        (**self).set_timeout(timeout)
    }

    fn baud_rate(&self) -> u32 {
        (**self).baud_rate()
    }

    fn clear_buffers(&mut self) -> Result<()> {
        (**self).clear_buffers()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn try_clone_port(&self) -> Result<Box<dyn Port>> {
        (**self).try_clone_port()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

#[cfg(feature = "native")]
pub use native::NativePort;
