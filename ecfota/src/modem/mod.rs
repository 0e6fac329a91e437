//! High-level modem handle.
//!
//! [`Modem`] owns the write half of the transport and a background reader
//! on a cloned read half. Commands go out through the shared
//! [`Correlator`]; upgrade notifications land in the shared
//! [`FotaSession`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use ecfota::{Modem, ModemConfig, ResetMode, SerialConfig, UpgradeRequest};
//!
//! fn main() -> ecfota::Result<()> {
//!     let serial = SerialConfig::new("/dev/ttyUSB2", 115_200);
//!     let mut modem = Modem::open(&serial, ModemConfig::default())?;
//!
//!     let request = UpgradeRequest::new("http://example.com/delta.bin")
//!         .with_mode(ResetMode::Automatic);
//!     modem.start_upgrade(
//!         &request,
//!         Some(Box::new(|event| println!("{}: {}", event.kind(), event.value()))),
//!     )?;
//!
//!     let outcome = modem.wait_for_upgrade_completion(Duration::from_secs(300));
//!     println!("{outcome}");
//!     Ok(())
//! }
//! ```

mod reader;

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

#[cfg(feature = "native")]
use crate::port::{NativePort, SerialConfig};
use crate::{
    at::{
        command::{Command, DEFAULT_AT_TIMEOUT, Response, ResponseStatus},
        correlator::Correlator,
    },
    error::{Error, Result},
    fota::{
        FotaOutcome, FotaSession, FotaSnapshot, MAX_URL_LEN, ProgressObserver, UpgradePhase,
        UpgradeRequest,
    },
    info::{self, ModuleInfo, SimStatus},
    network::{RegistrationStatus, SignalQuality},
};
use reader::Reader;

/// Timing and limits used by [`Modem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModemConfig {
    /// Timeout for ordinary AT queries.
    pub at_timeout: Duration,
    /// Timeout for the `AT+QFOTADL` submission.
    pub submit_timeout: Duration,
    /// Read timeout of the background reader.
    pub poll_interval: Duration,
    /// Longest accepted upgrade URL.
    pub max_url_len: usize,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            at_timeout: DEFAULT_AT_TIMEOUT,
            submit_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
            max_url_len: MAX_URL_LEN,
        }
    }
}

impl ModemConfig {
    /// Set the AT query timeout.
    #[must_use]
    pub fn with_at_timeout(mut self, timeout: Duration) -> Self {
        self.at_timeout = timeout;
        self
    }

    /// Set the upgrade submission timeout.
    #[must_use]
    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    /// Set the reader poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the URL length limit.
    #[must_use]
    pub fn with_max_url_len(mut self, len: usize) -> Self {
        self.max_url_len = len;
        self
    }
}

/// A connected (or connectable) EC800K/EG800K module.
pub struct Modem {
    config: ModemConfig,
    port: Option<Box<dyn crate::port::Port>>,
    reader: Option<Reader>,
    correlator: Arc<Correlator>,
    session: Arc<FotaSession>,
}

impl Modem {
    /// Create a disconnected handle.
    pub fn new(config: ModemConfig) -> Self {
        Self {
            config,
            port: None,
            reader: None,
            correlator: Arc::new(Correlator::new()),
            session: Arc::new(FotaSession::new()),
        }
    }

    /// Open a native serial port and connect to it.
    #[cfg(feature = "native")]
    pub fn open(serial: &SerialConfig, config: ModemConfig) -> Result<Self> {
        let port = NativePort::open(serial)?;
        let mut modem = Self::new(config);
        modem.connect(Box::new(port))?;
        Ok(modem)
    }

    /// Take ownership of `port` and start the background reader.
    ///
    /// An existing connection is closed first.
    pub fn connect(&mut self, mut port: Box<dyn crate::port::Port>) -> Result<()> {
        if self.is_connected() {
            self.disconnect();
        }

        // Boot banners and half-finished answers from before we attached
        if let Err(e) = port.clear_buffers() {
            debug!("Could not flush {}: {e}", port.name());
        }
        let reader_port = port.try_clone_port()?;
        self.correlator
            .reopen();
        self.session
            .reopen();
        self.reader = Some(Reader::spawn(
            reader_port,
            Arc::clone(&self.correlator),
            Arc::clone(&self.session),
            self.config
                .poll_interval,
        )?);

        info!("Connected to {} @ {} bps", port.name(), port.baud_rate());
        self.port = Some(port);
        Ok(())
    }

    /// Stop the reader, wake all waiters and close the port.
    ///
    /// Safe to call more than once.
    pub fn disconnect(&mut self) {
        if let Some(reader) = &self.reader {
            reader.signal_stop();
        }
        self.correlator
            .close();
        self.session
            .close();
        if let Some(mut reader) = self
            .reader
            .take()
        {
            reader.join();
        }
        if let Some(mut port) = self
            .port
            .take()
        {
            let name = port
                .name()
                .to_string();
            if let Err(e) = port.close() {
                warn!("Failed to close {name}: {e}");
            }
            info!("Disconnected from {name}");
        }
    }

    /// Whether a transport is attached.
    pub fn is_connected(&self) -> bool {
        self.port
            .is_some()
    }

    /// Name of the attached port.
    pub fn port_name(&self) -> Option<&str> {
        self.port
            .as_deref()
            .map(crate::port::Port::name)
    }

    /// Active configuration.
    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    /// Send a command and wait for its terminal marker.
    pub fn send(&mut self, command: &Command) -> Result<Response> {
        let port = self
            .port
            .as_mut()
            .ok_or(Error::NotConnected)?;
        self.correlator
            .send(&mut **port, command)
    }

    /// Send `text` with an explicit timeout.
    pub fn send_command(&mut self, text: &str, timeout: Duration) -> Result<Response> {
        self.send(&Command::new(text, timeout))
    }

    /// `AT`: is anybody there?
    pub fn test_at(&mut self) -> bool {
        let text = "AT";
        self.query(text)
            .is_ok()
    }

    /// Full firmware version string from `AT+QGMR`.
    pub fn query_firmware_version(&mut self) -> Result<String> {
        let text = "AT+QGMR";
        let resp = self.query(text)?;
        info::parse_firmware_version(&resp.text)
            .ok_or_else(|| Error::Protocol(format!("no version in {text} response")))
    }

    /// Network registration from `AT+CREG?`.
    pub fn query_network_status(&mut self) -> Result<RegistrationStatus> {
        let text = "AT+CREG?";
        let resp = self.query(text)?;
        RegistrationStatus::parse(&resp.text)
            .ok_or_else(|| Error::Protocol(format!("no +CREG in {text} response")))
    }

    /// Signal quality from `AT+CSQ`.
    pub fn query_signal_quality(&mut self) -> Result<SignalQuality> {
        let text = "AT+CSQ";
        let resp = self.query(text)?;
        SignalQuality::parse(&resp.text)
            .ok_or_else(|| Error::Protocol(format!("no +CSQ in {text} response")))
    }

    /// IMEI from `AT+GSN`.
    pub fn query_imei(&mut self) -> Result<String> {
        let text = "AT+GSN";
        let resp = self.query(text)?;
        info::parse_imei(&resp.text)
            .ok_or_else(|| Error::Protocol(format!("no IMEI in {text} response")))
    }

    /// SIM state from `AT+CPIN?`.
    pub fn query_sim_status(&mut self) -> Result<SimStatus> {
        let resp = self.query("AT+CPIN?")?;
        Ok(SimStatus::parse(&resp.text))
    }

    /// Everything the identity queries can find; failures leave gaps.
    pub fn query_module_info(&mut self) -> Result<ModuleInfo> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let description = self
            .query("ATI")
            .ok()
            .and_then(|resp| info::parse_description(&resp.text));
        let firmware_version = self.best_effort("firmware version", Self::query_firmware_version);
        let version_number = firmware_version
            .as_deref()
            .and_then(info::version_number);
        let imei = self.best_effort("IMEI", Self::query_imei);
        let sim_status = self.best_effort("SIM status", Self::query_sim_status);

        Ok(ModuleInfo {
            description,
            firmware_version,
            version_number,
            imei,
            sim_status,
        })
    }

    /// Raw `AT+QFOTADL?` answer.
    pub fn query_fota_status(&mut self) -> Result<Response> {
        let timeout = self
            .config
            .at_timeout;
        self.send_command("AT+QFOTADL?", timeout)
    }

    /// Check preconditions and submit an upgrade.
    ///
    /// Returns once the module accepted `AT+QFOTADL`; progress then arrives
    /// through `observer` on the reader thread. Use
    /// [`Modem::wait_for_upgrade_completion`] to block until it finishes.
    pub fn start_upgrade(
        &mut self,
        request: &UpgradeRequest,
        observer: Option<ProgressObserver>,
    ) -> Result<()> {
        let len = request.url_len();
        if len > self
            .config
            .max_url_len
        {
            return Err(Error::UrlTooLong {
                len,
                max: self
                    .config
                    .max_url_len,
            });
        }
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        self.session
            .begin(request, observer);
        info!("Starting FOTA upgrade");

        // Step 1: current version
        match self.query_firmware_version() {
            Ok(version) => info!("Current firmware: {version}"),
            Err(e) => warn!("Could not read current firmware version: {e}"),
        }

        // Step 2: registration
        let status = match self.query_network_status() {
            Ok(status) => status,
            Err(e @ (Error::NotConnected | Error::Interrupted | Error::Io(_))) => {
                self.session
                    .set_phase(UpgradePhase::Failed);
                return Err(e);
            },
            Err(e) => {
                warn!("Could not read network status: {e}");
                RegistrationStatus::Unknown
            },
        };
        if !status.is_registered() {
            self.session
                .set_phase(UpgradePhase::Failed);
            return Err(Error::NetworkNotRegistered(status));
        }
        info!("Network: {status}");

        match self.query_signal_quality() {
            Ok(signal) => info!("Signal: {signal}"),
            Err(e) => warn!("Could not read signal quality: {e}"),
        }

        // Step 3: submit
        info!(
            "Submitting {} ({}, download timeout {}s)",
            request.url, request.mode, request.timeout_secs
        );
        self.session
            .set_phase(UpgradePhase::AwaitingDownload);
        let command = Command::new(
            request.command_text(),
            self.config
                .submit_timeout,
        );
        let resp = match self.send(&command) {
            Ok(resp) => resp,
            Err(e) => {
                self.session
                    .set_phase(UpgradePhase::Failed);
                return Err(e);
            },
        };
        if !resp.is_ok() {
            self.session
                .set_phase(UpgradePhase::Failed);
            return Err(Error::CommandFailed {
                command: command
                    .text()
                    .to_string(),
                response: resp.describe(),
            });
        }

        info!("Upgrade accepted, module is downloading the package");
        Ok(())
    }

    /// Block until the upgrade reports `END`, or `max_wait` passes.
    pub fn wait_for_upgrade_completion(&self, max_wait: Duration) -> FotaOutcome {
        debug!("Waiting up to {max_wait:?} for upgrade result");
        self.session
            .wait_for_completion(max_wait)
    }

    /// Copy of the upgrade session state.
    pub fn fota_snapshot(&self) -> FotaSnapshot {
        self.session
            .snapshot()
    }

    /// Send `text` with the AT timeout and require `OK`.
    fn query(&mut self, text: &str) -> Result<Response> {
        let timeout = self
            .config
            .at_timeout;
        let resp = self.send_command(text, timeout)?;
        match resp.status {
            ResponseStatus::Ok => Ok(resp),
            ResponseStatus::Timeout => Err(Error::Timeout(format!("no answer to {text}"))),
            ResponseStatus::Error => Err(Error::CommandFailed {
                command: text.to_string(),
                response: resp.describe(),
            }),
        }
    }

    fn best_effort<T>(&mut self, what: &str, f: fn(&mut Self) -> Result<T>) -> Option<T> {
        match f(self) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Could not read {what}: {e}");
                None
            },
        }
    }
}

impl Default for Modem {
    fn default() -> Self {
        Self::new(ModemConfig::default())
    }
}

impl Drop for Modem {
    fn drop(&mut self) {
        self.disconnect();
    }
}
