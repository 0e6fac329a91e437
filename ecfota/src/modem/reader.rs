//! Background reader: transport -> framer -> classifier -> destination.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, trace, warn};

use crate::{
    at::{
        correlator::Correlator,
        framer::LineFramer,
        urc::{Urc, classify},
    },
    error::Result,
    fota::FotaSession,
    port::Port,
};

const READ_BUF_SIZE: usize = 1024;

/// Handle to the running reader thread.
pub(crate) struct Reader {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Reader {
    /// Start reading from `port` until stopped.
    ///
    /// `port` should be a clone of the command port; its timeout is set to
    /// `poll_interval` so the stop flag is checked regularly.
    pub(crate) fn spawn(
        mut port: Box<dyn Port>,
        correlator: Arc<Correlator>,
        session: Arc<FotaSession>,
        poll_interval: Duration,
    ) -> Result<Self> {
        port.set_timeout(poll_interval)?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_reader = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("ecfota-reader".to_string())
            .spawn(move || {
                let mut framer = LineFramer::new();
                let mut buf = [0u8; READ_BUF_SIZE];

                while !stop_reader.load(Ordering::Relaxed) {
                    match port.read_available(&mut buf) {
                        Ok(0) => {},
                        Ok(n) => {
                            trace!("Read {n} bytes");
                            for line in framer.push(&buf[..n]) {
                                route_line(&line, &correlator, &session);
                            }
                        },
                        Err(e) => {
                            if stop_reader.load(Ordering::Relaxed) {
                                break;
                            }
                            warn!("Read error on {}: {e}", port.name());
                            thread::sleep(poll_interval);
                        },
                    }
                }
                debug!("Reader thread stopped");
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Ask the thread to exit after its current read.
    pub(crate) fn signal_stop(&self) {
        self.stop
            .store(true, Ordering::Relaxed);
    }

    /// Wait for the thread to exit.
    pub(crate) fn join(&mut self) {
        let Some(handle) = self
            .handle
            .take()
        else {
            return;
        };
        if handle
            .join()
            .is_err()
        {
            warn!("Reader thread panicked");
        }
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.signal_stop();
        self.join();
    }
}

/// Send one framed line to exactly one destination.
///
/// Blank lines are dropped. Notifications go to the session unless the
/// pending command claims them as its answer; everything else is response
/// text.
pub(crate) fn route_line(line: &str, correlator: &Correlator, session: &FotaSession) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    trace!("line: {line:?}");

    match classify(line) {
        None => correlator.on_line(line),
        Some(Urc::BootEvent { .. }) if correlator.claims(line) => correlator.on_line(line),
        Some(urc) => session.handle(&urc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fota::{UpgradePhase, UpgradeRequest};
    use crate::port::mock::MockPort;

    fn active_session() -> FotaSession {
        let session = FotaSession::new();
        session.begin(&UpgradeRequest::new("http://example.com/d.bin"), None);
        session.set_phase(UpgradePhase::AwaitingDownload);
        session
    }

    #[test]
    fn test_response_lines_go_to_buffer() {
        let correlator = Correlator::new();
        let session = active_session();

        route_line("+CSQ: 20,99", &correlator, &session);
        route_line("OK", &correlator, &session);
        route_line("", &correlator, &session);

        assert_eq!(correlator.buffered(), "+CSQ: 20,99\r\nOK\r\n");
        assert_eq!(session.snapshot().progress, None);
    }

    #[test]
    fn test_notifications_never_reach_buffer() {
        let correlator = Correlator::new();
        let session = active_session();

        route_line("+QIND: \"FOTA\",\"UPDATING\",12", &correlator, &session);
        route_line("+QIND: \"FOTA\",\"HTTPSTART\"", &correlator, &session);
        route_line("RDY", &correlator, &session);
        route_line("+CPIN: READY", &correlator, &session);

        assert!(correlator.buffered().is_empty());
        let snap = session.snapshot();
        assert_eq!(snap.progress, Some(12));
        assert_eq!(snap.boot_events, 2);
    }

    #[test]
    fn test_reader_thread_routes_stream() {
        let correlator = Arc::new(Correlator::new());
        let session = Arc::new(active_session());
        let port = MockPort::new().with_chunk_size(3);
        port.inject("\r\n+CREG: 0,1\r\n+QIND: \"FOTA\",\"END\",0\r\nOK\r\n");

        let mut reader = Reader::spawn(
            Box::new(port.handle()),
            Arc::clone(&correlator),
            Arc::clone(&session),
            Duration::from_millis(10),
        )
        .unwrap();

        let done = session.wait_for_completion(Duration::from_secs(2));
        assert!(done.is_success());
        for _ in 0..200 {
            if correlator
                .buffered()
                .contains("OK")
            {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(correlator.buffered(), "+CREG: 0,1\r\nOK\r\n");

        reader.signal_stop();
        reader.join();
    }

    #[test]
    fn test_reader_survives_read_errors() {
        let correlator = Arc::new(Correlator::new());
        let session = Arc::new(FotaSession::new());
        let mut port = MockPort::new();
        port.close()
            .unwrap();

        let mut reader = Reader::spawn(
            Box::new(port.handle()),
            correlator,
            session,
            Duration::from_millis(5),
        )
        .unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(
            reader
                .handle
                .as_ref()
                .is_some_and(|h| !h.is_finished())
        );

        reader.signal_stop();
        reader.join();
        assert!(
            reader
                .handle
                .is_none()
        );
    }
}
