//! Unsolicited result code (URC) classification.
//!
//! The modem interleaves URCs with command responses on the same stream.
//! [`classify`] decides, one trimmed line at a time, whether a line is a
//! notification; anything it rejects belongs to the pending command.
//!
//! Recognized shapes:
//!
//! | Line                                   | Result                |
//! |----------------------------------------|-----------------------|
//! | `+QIND: "FOTA","UPDATING",<percent>`   | [`Urc::Updating`]     |
//! | `+QIND: "FOTA","END",<err>`            | [`Urc::End`]          |
//! | any other `+QIND: ...`                 | [`Urc::Generic`]      |
//! | `RDY`, `+CFUN: 1`, `+CPIN: ...`, `+QUSIM: ...` | [`Urc::BootEvent`] |

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Prefix shared by all Quectel indication URCs.
pub const QIND_PREFIX: &str = "+QIND:";

/// Lines the module prints, verbatim, after power-on.
pub const BOOT_MARKERS: &[&str] = &["RDY", "+CFUN: 1"];

/// Line prefixes reported while the SIM comes up after a reboot.
pub const BOOT_PREFIXES: &[&str] = &["+CPIN:", "+QUSIM:"];

static FOTA_UPDATING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\+QIND:\s*"\s*FOTA\s*"\s*,\s*"\s*UPDATING\s*"\s*,\s*(\d+)"#)
        .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

static FOTA_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\+QIND:\s*"\s*FOTA\s*"\s*,\s*"\s*END\s*"\s*,\s*(-?\d+)"#)
        .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

/// A classified unsolicited notification.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Urc {
    /// Upgrade progress. Not range-checked.
    Updating {
        /// Reported percentage.
        percent: u32,
    },
    /// Upgrade finished; `0` is success.
    End {
        /// Vendor result code.
        result_code: i32,
    },
    /// Any other `+QIND:` indication.
    Generic {
        /// The line as received.
        raw: String,
    },
    /// Power-on or SIM-ready marker emitted after a reboot.
    BootEvent {
        /// The line as received.
        raw: String,
    },
}

impl Urc {
    /// Short tag used when reporting the event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Updating { .. } => "UPDATING",
            Self::End { .. } => "END",
            Self::Generic { .. } => "QIND",
            Self::BootEvent { .. } => "BOOT",
        }
    }
}

impl fmt::Display for Urc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Updating { percent } => write!(f, "FOTA updating {percent}%"),
            Self::End { result_code } => write!(f, "FOTA end, result {result_code}"),
            Self::Generic { raw } | Self::BootEvent { raw } => f.write_str(raw),
        }
    }
}

/// Classify one trimmed line.
///
/// Returns `None` for ordinary response text.
pub fn classify(line: &str) -> Option<Urc> {
    if line.contains(QIND_PREFIX) {
        return Some(classify_qind(line));
    }

    if BOOT_MARKERS.contains(&line)
        || BOOT_PREFIXES
            .iter()
            .any(|p| line.starts_with(p))
    {
        return Some(Urc::BootEvent {
            raw: line.to_string(),
        });
    }

    None
}

fn classify_qind(line: &str) -> Urc {
    let updating = FOTA_UPDATING
        .captures(line)
        .and_then(|caps| caps[1].parse().ok());
    if let Some(percent) = updating {
        return Urc::Updating { percent };
    }

    let end = FOTA_END
        .captures(line)
        .and_then(|caps| caps[1].parse().ok());
    if let Some(result_code) = end {
        return Urc::End { result_code };
    }

    // Numbers that overflow fall through here rather than being dropped
    Urc::Generic {
        raw: line.to_string(),
    }
}
