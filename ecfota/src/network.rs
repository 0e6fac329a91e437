//! Network registration and signal quality.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static CREG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\+CREG:\s*\d+\s*,\s*(\d+)").unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

static CSQ: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\+CSQ:\s*(\d+)\s*,\s*(\d+)").unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

/// `<stat>` field of `+CREG: <n>,<stat>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RegistrationStatus {
    /// 0: not registered, not searching.
    NotRegistered,
    /// 1: registered on the home network.
    Home,
    /// 2: not registered, searching.
    Searching,
    /// 3: registration denied.
    Denied,
    /// 4: unknown.
    Unknown,
    /// 5: registered, roaming.
    Roaming,
    /// Any other value the module reports.
    Other(u8),
}

impl RegistrationStatus {
    /// Map the numeric `<stat>` value.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::NotRegistered,
            1 => Self::Home,
            2 => Self::Searching,
            3 => Self::Denied,
            4 => Self::Unknown,
            5 => Self::Roaming,
            other => Self::Other(other),
        }
    }

    /// Numeric `<stat>` value.
    pub fn code(self) -> u8 {
        match self {
            Self::NotRegistered => 0,
            Self::Home => 1,
            Self::Searching => 2,
            Self::Denied => 3,
            Self::Unknown => 4,
            Self::Roaming => 5,
            Self::Other(code) => code,
        }
    }

    /// Only home and roaming registrations can reach a download server.
    pub fn is_registered(self) -> bool {
        matches!(self, Self::Home | Self::Roaming)
    }

    /// Extract the status from an `AT+CREG?` response.
    pub fn parse(response: &str) -> Option<Self> {
        let caps = CREG.captures(response)?;
        let code: u8 = caps[1]
            .parse()
            .ok()?;
        Some(Self::from_code(code))
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRegistered => f.write_str("not registered"),
            Self::Home => f.write_str("registered (home)"),
            Self::Searching => f.write_str("searching"),
            Self::Denied => f.write_str("registration denied"),
            Self::Unknown => f.write_str("unknown"),
            Self::Roaming => f.write_str("registered (roaming)"),
            Self::Other(code) => write!(f, "unknown ({code})"),
        }
    }
}

/// `+CSQ: <rssi>,<ber>` reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SignalQuality {
    /// 0..=31, or 99 when unknown.
    pub rssi: u8,
    /// Bit error rate class, 99 when unknown.
    pub ber: u8,
}

impl SignalQuality {
    /// `rssi` value meaning "not known or not detectable".
    pub const UNKNOWN: u8 = 99;

    /// Extract the reading from an `AT+CSQ` response.
    pub fn parse(response: &str) -> Option<Self> {
        let caps = CSQ.captures(response)?;
        Some(Self {
            rssi: caps[1]
                .parse()
                .ok()?,
            ber: caps[2]
                .parse()
                .ok()?,
        })
    }

    /// Whether the module could measure the signal.
    pub fn is_known(self) -> bool {
        self.rssi != Self::UNKNOWN
    }

    /// Received signal strength in dBm (`-113 + 2 * rssi`).
    pub fn dbm(self) -> Option<i32> {
        self.is_known()
            .then(|| -113 + 2 * i32::from(self.rssi))
    }
}

impl fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dbm() {
            Some(dbm) => write!(f, "RSSI={} ({dbm} dBm)", self.rssi),
            None => f.write_str("unknown or not detectable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_creg() {
        let cases = [
            ("+CREG: 0,1\r\nOK\r\n", RegistrationStatus::Home),
            ("+CREG: 2,5,\"1A2B\",\"01C3D4E5\",7\r\nOK", RegistrationStatus::Roaming),
            ("+CREG: 0, 2\r\nOK", RegistrationStatus::Searching),
            ("+CREG: 0,3", RegistrationStatus::Denied),
            ("+CREG: 0,0", RegistrationStatus::NotRegistered),
            ("+CREG: 0,9", RegistrationStatus::Other(9)),
        ];
        for (text, expected) in cases {
            assert_eq!(RegistrationStatus::parse(text), Some(expected), "{text:?}");
        }
        assert_eq!(RegistrationStatus::parse("OK"), None);
    }

    #[test]
    fn test_only_home_and_roaming_are_registered() {
        for code in 0..=10u8 {
            let status = RegistrationStatus::from_code(code);
            assert_eq!(status.is_registered(), code == 1 || code == 5, "{code}");
            assert_eq!(status.code(), code);
        }
    }

    #[test]
    fn test_parse_csq() {
        let q = SignalQuality::parse("\r\n+CSQ: 20,99\r\n\r\nOK\r\n").unwrap();
        assert_eq!(q, SignalQuality { rssi: 20, ber: 99 });
        assert_eq!(q.dbm(), Some(-73));
        assert_eq!(q.to_string(), "RSSI=20 (-73 dBm)");
        assert_eq!(SignalQuality::parse("ERROR"), None);
    }

    #[test]
    fn test_unknown_signal() {
        let q = SignalQuality::parse("+CSQ: 99,99").unwrap();
        assert!(!q.is_known());
        assert_eq!(q.dbm(), None);
        assert_eq!(q.to_string(), "unknown or not detectable");
    }
}
