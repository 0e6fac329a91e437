//! Module identity queries: firmware version, IMEI, SIM state.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static VERSION_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+\.\d+\.\d+\.\d+)$").unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

static IMEI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{15}").unwrap_or_else(|e| unreachable!("static pattern: {e}")));

/// SIM state from `AT+CPIN?`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SimStatus {
    /// `+CPIN: READY`.
    Ready,
    /// Anything else, e.g. `SIM PIN`, as the raw response.
    Other(String),
}

impl SimStatus {
    /// Interpret an `AT+CPIN?` response.
    pub fn parse(response: &str) -> Self {
        if response.contains("READY") {
            Self::Ready
        } else {
            Self::Other(
                response
                    .trim()
                    .to_string(),
            )
        }
    }
}

impl fmt::Display for SimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("ready"),
            Self::Other(raw) => f.write_str(raw),
        }
    }
}

/// What `query_module_info` could find out. Missing answers stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModuleInfo {
    /// `ATI` identification lines, joined with spaces.
    pub description: Option<String>,
    /// Full `AT+QGMR` string, e.g. `EG800KEULCR07A07M04_01.300.01.300`.
    pub firmware_version: Option<String>,
    /// Trailing `d.d.d.d` component of the firmware version.
    pub version_number: Option<String>,
    /// 15-digit IMEI from `AT+GSN`.
    pub imei: Option<String>,
    /// SIM state.
    pub sim_status: Option<SimStatus>,
}

/// First line of an `AT+QGMR` response that is neither echo nor `OK`.
pub fn parse_firmware_version(response: &str) -> Option<String> {
    response
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with("AT") && *line != "OK")
        .map(str::to_string)
}

/// Trailing four-part version number, if the string ends in one.
pub fn version_number(firmware: &str) -> Option<String> {
    VERSION_NUMBER
        .captures(firmware.trim())
        .map(|caps| caps[1].to_string())
}

/// First run of 15 digits in an `AT+GSN` response.
pub fn parse_imei(response: &str) -> Option<String> {
    IMEI.find(response)
        .map(|m| {
            m.as_str()
                .to_string()
        })
}

/// Identification lines of an `ATI` response.
pub fn parse_description(response: &str) -> Option<String> {
    let lines: Vec<&str> = response
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("AT") && *line != "OK")
        .collect();
    (!lines.is_empty()).then(|| lines.join(" "))
}
