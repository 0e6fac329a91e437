//! Pairs an outgoing command with the lines that answer it.
//!
//! The foreground thread calls [`Correlator::send`] and blocks; the reader
//! thread hands every non-notification line to [`Correlator::on_line`]. The
//! two meet on a mutex-protected buffer and a condition variable.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::{
    at::command::{Command, Response, ResponseStatus},
    error::{Error, Result},
    is_interrupted_requested,
    port::Port,
};

/// Longest single condvar wait, so interrupts are noticed promptly.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Bytes kept from lines that arrive while no command is waiting.
const IDLE_BUFFER_LIMIT: usize = 4096;

#[derive(Debug, Default)]
struct Slot {
    buffer: String,
    pending: bool,
    prefix: Option<String>,
    closed: bool,
}

/// Shared response buffer with a single outstanding-command slot.
#[derive(Debug, Default)]
pub struct Correlator {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl Correlator {
    /// Create an open correlator with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `command` to `port` and wait for its terminal marker.
    ///
    /// The buffer is cleared first, so text left over from an earlier
    /// exchange never leaks into this response. A timeout is not an error:
    /// it yields a [`ResponseStatus::Timeout`] response carrying whatever
    /// text did arrive.
    pub fn send(&self, port: &mut dyn Port, command: &Command) -> Result<Response> {
        {
            let mut slot = self.lock();
            if slot.closed {
                return Err(Error::NotConnected);
            }
            slot.buffer
                .clear();
            slot.pending = true;
            slot.prefix = command.response_prefix();
        }

        debug!("-> {command}");
        if let Err(e) = port.write_all_bytes(&command.to_wire()) {
            self.finish();
            return Err(e);
        }

        let deadline = Instant::now() + command.timeout();
        let mut slot = self.lock();
        loop {
            if slot.closed {
                slot.pending = false;
                return Err(Error::NotConnected);
            }

            let status = if slot
                .buffer
                .contains("OK")
            {
                Some(ResponseStatus::Ok)
            } else if slot
                .buffer
                .contains("ERROR")
            {
                Some(ResponseStatus::Error)
            } else if Instant::now() >= deadline {
                Some(ResponseStatus::Timeout)
            } else {
                None
            };

            if let Some(status) = status {
                slot.pending = false;
                slot.prefix = None;
                let response = Response {
                    status,
                    text: slot
                        .buffer
                        .clone(),
                };
                debug!("<- {command}: {status:?} {:?}", response.text);
                return Ok(response);
            }

            if is_interrupted_requested() {
                slot.pending = false;
                return Err(Error::Interrupted);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            slot = self
                .ready
                .wait_timeout(slot, remaining.min(WAIT_SLICE))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Append a non-notification line and wake the waiting sender.
    ///
    /// With no command outstanding the buffer stops growing at
    /// 4 KiB; the next [`Correlator::send`] clears it anyway.
    pub fn on_line(&self, line: &str) {
        let mut slot = self.lock();
        if !slot.pending && slot.buffer.len() + line.len() + 2 > IDLE_BUFFER_LIMIT {
            debug!("Dropping unsolicited line: {line:?}");
            return;
        }
        trace!("buffered: {line:?}");
        slot.buffer
            .push_str(line);
        slot.buffer
            .push_str("\r\n");
        drop(slot);
        self.ready
            .notify_all();
    }

    /// Whether a boot marker is the answer to the pending command.
    ///
    /// `+CPIN: READY` is both a power-on notice and the reply to `AT+CPIN?`;
    /// while that query is outstanding the line belongs to the response.
    pub fn claims(&self, line: &str) -> bool {
        let slot = self.lock();
        slot.pending
            && slot
                .prefix
                .as_deref()
                .is_some_and(|p| line.starts_with(p))
    }

    /// Whether a command is waiting for its answer.
    pub fn is_pending(&self) -> bool {
        self.lock()
            .pending
    }

    /// Copy of the current buffer contents.
    pub fn buffered(&self) -> String {
        self.lock()
            .buffer
            .clone()
    }

    /// Refuse further commands and wake any waiter with `NotConnected`.
    pub fn close(&self) {
        self.lock()
            .closed = true;
        self.ready
            .notify_all();
    }

    /// Accept commands again after a reconnect.
    pub fn reopen(&self) {
        let mut slot = self.lock();
        *slot = Slot::default();
    }

    fn finish(&self) {
        let mut slot = self.lock();
        slot.pending = false;
        slot.prefix = None;
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::at::command::DEFAULT_AT_TIMEOUT;
    use crate::port::mock::MockPort;

    /// Feed the correlator from the mock's queued replies, like the reader.
    fn pump(correlator: &Arc<Correlator>, port: &MockPort) -> thread::JoinHandle<()> {
        let _ = env_logger::builder().is_test(true).try_init();
        let correlator = Arc::clone(correlator);
        let mut reader = port.handle();
        thread::spawn(move || {
            let mut framer = crate::at::framer::LineFramer::new();
            let mut buf = [0u8; 64];
            while let Ok(n) = reader.read_available(&mut buf) {
                for line in framer.push(&buf[..n]) {
                    let line = line.trim();
                    if !line.is_empty() {
                        correlator.on_line(line);
                    }
                }
            }
        })
    }

    #[test]
    fn test_ok_response() {
        let correlator = Arc::new(Correlator::new());
        let mut port = MockPort::with_responder(|cmd| {
            (cmd == "AT+CSQ").then(|| "\r\n+CSQ: 20,99\r\n\r\nOK\r\n".to_string())
        });
        let reader = pump(&correlator, &port);

        let resp = correlator
            .send(&mut port, &Command::new("AT+CSQ", DEFAULT_AT_TIMEOUT))
            .unwrap();
        assert!(resp.is_ok());
        assert!(resp.text.contains("+CSQ: 20,99"));
        assert_eq!(port.commands(), vec!["AT+CSQ"]);

        port.close().unwrap();
        reader.join().unwrap();
    }

    #[test]
    fn test_buffer_cleared_between_commands() {
        let correlator = Arc::new(Correlator::new());
        let mut port = MockPort::with_responder(|cmd| match cmd {
            "AT" => Some("OK\r\n".to_string()),
            "AT+CSQ" => Some("+CSQ: 18,99\r\nOK\r\n".to_string()),
            _ => None,
        });
        let reader = pump(&correlator, &port);

        let first = correlator
            .send(&mut port, &Command::new("AT", DEFAULT_AT_TIMEOUT))
            .unwrap();
        assert!(first.is_ok());

        let second = correlator
            .send(&mut port, &Command::new("AT+CSQ", DEFAULT_AT_TIMEOUT))
            .unwrap();
        assert!(second.is_ok());
        assert_eq!(second.text, "+CSQ: 18,99\r\nOK\r\n");

        port.close().unwrap();
        reader.join().unwrap();
    }

    #[test]
    fn test_error_response() {
        let correlator = Arc::new(Correlator::new());
        let mut port = MockPort::with_responder(|_| Some("+CME ERROR: 10\r\n".to_string()));
        let reader = pump(&correlator, &port);

        let resp = correlator
            .send(&mut port, &Command::new("AT+CPIN?", DEFAULT_AT_TIMEOUT))
            .unwrap();
        assert_eq!(resp.status, ResponseStatus::Error);
        assert!(!resp.is_ok());

        port.close().unwrap();
        reader.join().unwrap();
    }

    #[test]
    fn test_timeout_with_no_text() {
        let correlator = Correlator::new();
        let mut port = MockPort::new();

        let started = Instant::now();
        let resp = correlator
            .send(&mut port, &Command::new("AT", Duration::from_millis(150)))
            .unwrap();
        assert!(resp.is_timeout());
        assert!(resp.text.is_empty());
        assert_eq!(resp.describe(), "no response");
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert!(!correlator.is_pending());
    }

    #[test]
    fn test_timeout_keeps_partial_text() {
        let correlator = Arc::new(Correlator::new());
        let mut port = MockPort::with_responder(|_| Some("+QGMR: partial\r\n".to_string()));
        let reader = pump(&correlator, &port);

        let resp = correlator
            .send(&mut port, &Command::new("AT+QGMR", Duration::from_millis(200)))
            .unwrap();
        assert!(resp.is_timeout());
        assert_eq!(resp.text, "+QGMR: partial\r\n");

        port.close().unwrap();
        reader.join().unwrap();
    }

    #[test]
    fn test_write_failure_is_immediate() {
        let correlator = Correlator::new();
        let mut port = MockPort::new();
        port.handle()
            .close()
            .unwrap();

        let started = Instant::now();
        let err = correlator
            .send(&mut port, &Command::new("AT", Duration::from_secs(5)))
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!correlator.is_pending());
    }

    #[test]
    fn test_closed_correlator_writes_nothing() {
        let correlator = Correlator::new();
        correlator.close();
        let mut port = MockPort::new();

        let err = correlator
            .send(&mut port, &Command::new("AT", DEFAULT_AT_TIMEOUT))
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert_eq!(port.bytes_written(), 0);
    }

    #[test]
    fn test_close_wakes_waiter() {
        let correlator = Arc::new(Correlator::new());
        let waiter = {
            let correlator = Arc::clone(&correlator);
            thread::spawn(move || {
                let mut port = MockPort::new();
                correlator.send(&mut port, &Command::new("AT", Duration::from_secs(10)))
            })
        };

        while !correlator.is_pending() {
            thread::sleep(Duration::from_millis(5));
        }
        let started = Instant::now();
        correlator.close();
        let result = waiter
            .join()
            .unwrap();
        assert!(matches!(result, Err(Error::NotConnected)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_claims_only_pending_prefix() {
        let correlator = Arc::new(Correlator::new());
        assert!(!correlator.claims("+CPIN: READY"));

        let waiter = {
            let correlator = Arc::clone(&correlator);
            thread::spawn(move || {
                let mut port = MockPort::new();
                correlator.send(&mut port, &Command::new("AT+CPIN?", Duration::from_secs(5)))
            })
        };
        while !correlator.is_pending() {
            thread::sleep(Duration::from_millis(5));
        }

        assert!(correlator.claims("+CPIN: READY"));
        assert!(!correlator.claims("RDY"));
        assert!(!correlator.claims("+QUSIM: 1"));

        correlator.on_line("+CPIN: READY");
        correlator.on_line("OK");
        let resp = waiter
            .join()
            .unwrap()
            .unwrap();
        assert!(resp.is_ok());
        assert!(resp.text.contains("+CPIN: READY"));
        assert!(!correlator.claims("+CPIN: READY"));
    }

    #[test]
    fn test_unsolicited_lines_are_bounded() {
        let correlator = Correlator::new();
        let line = "+QIND: \"SMS DONE\" x".repeat(4);
        for _ in 0..1000 {
            correlator.on_line(&line);
        }
        assert!(correlator.buffered().len() <= IDLE_BUFFER_LIMIT);
        assert!(correlator.buffered().starts_with(&line));
    }

    #[test]
    fn test_reopen_after_close() {
        let correlator = Correlator::new();
        correlator.on_line("stale");
        correlator.close();
        correlator.reopen();
        assert!(correlator.buffered().is_empty());

        let mut port = MockPort::new();
        let resp = correlator
            .send(&mut port, &Command::new("AT", Duration::from_millis(30)))
            .unwrap();
        assert!(resp.is_timeout());
    }
}
