//! In-memory port used by the unit tests.
//!
//! Clones share one state, like two handles on the same tty. Every write is
//! recorded (the spy), and complete command lines are handed to an optional
//! responder whose reply is queued for reading.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::port::Port;

type Responder = Box<dyn FnMut(&str) -> Option<String> + Send>;

#[derive(Default)]
struct MockState {
    rx: VecDeque<u8>,
    written: Vec<u8>,
    pending_line: Vec<u8>,
    commands: Vec<String>,
    responder: Option<Responder>,
    closed: bool,
}

/// Shared-state fake serial port.
pub(crate) struct MockPort {
    state: Arc<Mutex<MockState>>,
    timeout: Duration,
    chunk: usize,
}

impl MockPort {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            timeout: Duration::from_millis(20),
            chunk: usize::MAX,
        }
    }

    /// Fake modem that answers each command line through `f`.
    pub(crate) fn with_responder<F>(f: F) -> Self
    where
        F: FnMut(&str) -> Option<String> + Send + 'static,
    {
        let port = Self::new();
        port.lock().responder = Some(Box::new(f));
        port
    }

    /// Deliver at most `chunk` bytes per read call.
    pub(crate) fn with_chunk_size(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    /// Second handle sharing the same state, kept by the test.
    pub(crate) fn handle(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            timeout: self.timeout,
            chunk: self.chunk,
        }
    }

    /// Queue bytes as if the modem had sent them unprompted.
    pub(crate) fn inject(&self, text: &str) {
        self.lock()
            .rx
            .extend(text.as_bytes());
    }

    /// Command lines received so far, without terminators.
    pub(crate) fn commands(&self) -> Vec<String> {
        self.lock()
            .commands
            .clone()
    }

    /// Total number of bytes written.
    pub(crate) fn bytes_written(&self) -> usize {
        self.lock()
            .written
            .len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let deadline = Instant::now() + self.timeout;
        loop {
            {
                let mut state = self.lock();
                if state.closed {
                    return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
                }
                if !state.rx.is_empty() {
                    let n = buf
                        .len()
                        .min(self.chunk)
                        .min(state.rx.len());
                    for (slot, byte) in buf
                        .iter_mut()
                        .zip(state.rx.drain(..n))
                    {
                        *slot = byte;
                    }
                    return Ok(n);
                }
            }
            if Instant::now() >= deadline {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        state
            .written
            .extend_from_slice(buf);
        for &byte in buf {
            if byte == b'\n' {
                let raw = std::mem::take(&mut state.pending_line);
                let line = String::from_utf8_lossy(&raw)
                    .trim()
                    .to_string();
                state
                    .commands
                    .push(line.clone());
                let reply = state
                    .responder
                    .as_mut()
                    .and_then(|f| f(&line));
                if let Some(reply) = reply {
                    state
                        .rx
                        .extend(reply.as_bytes());
                }
            } else {
                state
                    .pending_line
                    .push(byte);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        115_200
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.lock()
            .rx
            .clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn try_clone_port(&self) -> Result<Box<dyn Port>> {
        if self.lock().closed {
            return Err(Error::NotConnected);
        }
        Ok(Box::new(self.handle()))
    }

    fn close(&mut self) -> Result<()> {
        self.lock().closed = true;
        Ok(())
    }
}
