//! AT command and response values.

use std::fmt;
use std::time::Duration;

/// Default time to wait for a terminal `OK`/`ERROR`.
pub const DEFAULT_AT_TIMEOUT: Duration = Duration::from_secs(2);

/// An AT command line, without its `\r\n` terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    timeout: Duration,
}

impl Command {
    /// Create a command with an explicit response timeout.
    pub fn new(text: impl Into<String>, timeout: Duration) -> Self {
        Self {
            text: text.into(),
            timeout,
        }
    }

    /// Command text as it goes on the wire, minus the terminator.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// How long to wait for a terminal marker.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Bytes written to the transport.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.text.len() + 2);
        bytes.extend_from_slice(
            self.text
                .as_bytes(),
        );
        bytes.extend_from_slice(b"\r\n");
        bytes
    }

    /// Prefix of the information response this command produces.
    ///
    /// `AT+CPIN?` answers with `+CPIN: ...`, `AT+QFOTADL="..."` with
    /// `+QFOTADL: ...`. Basic commands like `ATI` have none.
    pub fn response_prefix(&self) -> Option<String> {
        let text = self
            .text
            .trim();
        let body = text
            .get(..2)
            .filter(|at| at.eq_ignore_ascii_case("AT"))
            .map(|_| &text[2..])?;
        if !body.starts_with('+') {
            return None;
        }

        let name: String = body
            .chars()
            .take_while(|c| !matches!(c, '?' | '=' | ';' | ' '))
            .collect();
        if name.len() < 2 {
            return None;
        }
        Some(format!("{}:", name.to_ascii_uppercase()))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Terminal marker that ended a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResponseStatus {
    /// `OK` was seen.
    Ok,
    /// `ERROR` was seen and `OK` was not.
    Error,
    /// Neither arrived before the deadline.
    Timeout,
}

/// Accumulated answer to one [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Response {
    /// How the exchange ended.
    pub status: ResponseStatus,
    /// Raw non-notification lines, each followed by `\r\n`.
    pub text: String,
}

impl Response {
    /// `true` only when `OK` was seen.
    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    /// `true` when the deadline passed with no marker.
    pub fn is_timeout(&self) -> bool {
        self.status == ResponseStatus::Timeout
    }

    /// Raw response text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Non-empty trimmed lines of the response.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }

    /// Text for error reports; says so when nothing arrived.
    pub fn describe(&self) -> String {
        if self
            .text
            .trim()
            .is_empty()
        {
            "no response".to_string()
        } else {
            self.text
                .trim()
                .to_string()
        }
    }
}
