//! [`Port`] over a real tty/COM device, backed by the `serialport` crate.

use {
    crate::{
        error::{Error, Result},
        port::{Port, SerialConfig},
    },
    log::{debug, trace},
    serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits},
    std::{
        io::{self, Read, Write},
        time::Duration,
    },
};

/// Serial handle on the module's AT interface.
pub struct NativePort {
    handle: Option<Box<dyn SerialPort>>,
    name: String,
    timeout: Duration,
    baud_rate: u32,
}

impl NativePort {
    /// Open `config.port_name` as 8N1.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let flow_control = if config.rts_cts {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };
        let handle = serialport::new(&config.port_name, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(flow_control)
            .timeout(config.timeout)
            .open()?;

        debug!(
            "Opened {} @ {} bps (RTS/CTS {})",
            config.port_name,
            config.baud_rate,
            if config.rts_cts { "on" } else { "off" }
        );

        Ok(Self {
            handle: Some(handle),
            name: config
                .port_name
                .clone(),
            timeout: config.timeout,
            baud_rate: config.baud_rate,
        })
    }

    fn handle_mut(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.handle
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))
    }
}

impl Port for NativePort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.handle_mut()?
            .set_timeout(timeout)?;
        self.timeout = timeout;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.handle_mut()?
            .clear(ClearBuffer::All)?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn try_clone_port(&self) -> Result<Box<dyn Port>> {
        let handle = self
            .handle
            .as_ref()
            .ok_or(Error::NotConnected)?
            .try_clone()?;
        trace!("Cloned handle for {}", self.name);
        Ok(Box::new(Self {
            handle: Some(handle),
            name: self
                .name
                .clone(),
            timeout: self.timeout,
            baud_rate: self.baud_rate,
        }))
    }

    fn close(&mut self) -> Result<()> {
        // The device closes when the last handle is dropped
        self.handle = None;
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.handle_mut()?
            .read(buf)
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.handle_mut()?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.handle_mut()?
            .flush()
    }
}
