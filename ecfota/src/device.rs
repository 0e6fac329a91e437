//! Serial port discovery.
//!
//! A Quectel module on USB enumerates several ttys with the same VID/PID
//! (diagnostics, NMEA, AT, modem). Modules wired through a UART go through a
//! USB-to-serial bridge instead, so the common bridges are recognized too.

use {
    crate::error::{Error, Result},
    std::fmt,
};

#[cfg(feature = "native")]
use log::{debug, info, trace};

/// Quectel Wireless Solutions USB vendor ID.
pub const QUECTEL_VID: u16 = 0x2C7C;

/// Transport type for discovered endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransportKind {
    /// Native USB interface of the module.
    Usb,
    /// UART, possibly behind a USB bridge.
    Serial,
}

/// What sits on the other end of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceKind {
    /// Quectel module on its own USB interface.
    Quectel,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI USB-to-Serial converter.
    Ftdi,
    /// Prolific PL2303 USB-to-Serial converter.
    Prolific,
    /// Anything else.
    Unknown,
}

/// Known vendor IDs; an empty PID list matches any product.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (QUECTEL_VID, &[], DeviceKind::Quectel),
    (0x1A86, &[0x7523, 0x7522, 0x5523, 0x55D4], DeviceKind::Ch340),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71], DeviceKind::Cp210x),
    (0x0403, &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015], DeviceKind::Ftdi),
    (0x067B, &[0x2303, 0x23A3, 0x23C3, 0x23D3], DeviceKind::Prolific),
];

impl DeviceKind {
    /// Classify a USB VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_USB_DEVICES
            .iter()
            .find(|(known_vid, pids, _)| vid == *known_vid && (pids.is_empty() || pids.contains(&pid)))
            .map_or(Self::Unknown, |(_, _, kind)| *kind)
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Quectel => "Quectel",
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Whether this is a USB-to-UART bridge.
    pub fn is_bridge(&self) -> bool {
        matches!(self, Self::Ch340 | Self::Cp210x | Self::Ftdi | Self::Prolific)
    }
}

/// A serial endpoint found on the host.
///
/// USB fields are `None` for ports without USB metadata (on-board UARTs,
/// virtual ports, anything named explicitly by the user).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectedPort {
    /// "/dev/ttyUSB2", "COM8", ...
    pub name: String,
    /// How the module is attached.
    pub transport: TransportKind,
    /// Classified from VID/PID.
    pub device: DeviceKind,
    /// USB vendor ID.
    pub vid: Option<u16>,
    /// USB product ID.
    pub pid: Option<u16>,
    /// USB manufacturer string.
    pub manufacturer: Option<String>,
    /// Interface string; Quectel names the AT interface here.
    pub product: Option<String>,
    /// USB serial number.
    pub serial: Option<String>,
}

impl DetectedPort {
    /// Port with no USB metadata.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Serial,
            device: DeviceKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    #[cfg(feature = "native")]
    fn from_info(info: serialport::SerialPortInfo) -> Self {
        let mut port = Self::plain(info.port_name);
        let serialport::SerialPortType::UsbPort(usb) = info.port_type else {
            return port;
        };

        port.device = DeviceKind::from_vid_pid(usb.vid, usb.pid);
        if port.device == DeviceKind::Quectel {
            port.transport = TransportKind::Usb;
        }
        port.vid = Some(usb.vid);
        port.pid = Some(usb.pid);
        port.manufacturer = usb.manufacturer;
        port.product = usb.product;
        port.serial = usb.serial_number;
        trace!("{} is {:04X}:{:04X} ({:?})", port.name, usb.vid, usb.pid, port.device);
        port
    }

    /// Whether the port describes itself as the AT interface.
    pub fn is_at_interface(&self) -> bool {
        self.device == DeviceKind::Quectel
            && self
                .product
                .as_deref()
                .is_some_and(|p| {
                    p.split(|c: char| !c.is_ascii_alphanumeric())
                        .any(|word| word.eq_ignore_ascii_case("AT"))
                })
    }
}

/// `name [Device] - product`, or `name [VID:xxxx PID:xxxx]` for unknown USB.
impl fmt::Display for DetectedPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        match (self.device.is_known(), self.vid, self.pid) {
            (true, ..) => write!(f, " [{}]", self.device.name())?,
            (false, Some(vid), Some(pid)) => write!(f, " [VID:{vid:04X} PID:{pid:04X}]")?,
            _ => {},
        }
        if let Some(product) = &self.product {
            write!(f, " - {product}")?;
        }
        Ok(())
    }
}

/// Enumerate serial ports with USB metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    serialport::available_ports()
        .map(|ports| ports.into_iter().map(DetectedPort::from_info).collect())
        .unwrap_or_else(|e| {
            debug!("Port enumeration failed: {e}");
            Vec::new()
        })
}

/// Without the native backend there is nothing to enumerate.
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Pick the most plausible AT port among `ports`.
///
/// Preference: a Quectel interface naming itself AT, any Quectel interface,
/// a known USB bridge, then the first port.
pub fn select_port(ports: &[DetectedPort]) -> Option<&DetectedPort> {
    let preferences: [fn(&DetectedPort) -> bool; 3] = [
        DetectedPort::is_at_interface,
        |p| p.device == DeviceKind::Quectel,
        |p| p.device.is_bridge(),
    ];
    preferences
        .iter()
        .find_map(|wanted| ports.iter().find(|p| wanted(p)))
        .or_else(|| ports.first())
}

/// Detect ports and pick one with [`select_port`].
#[cfg(feature = "native")]
pub fn auto_detect_port() -> Result<DetectedPort> {
    let ports = detect_ports();
    let port = select_port(&ports).ok_or(Error::DeviceNotFound)?;
    if port.device.is_known() {
        info!("Auto-detected {} port {}", port.device.name(), port.name);
    } else {
        info!("No recognised device, falling back to {}", port.name);
    }
    Ok(port.clone())
}

/// Without the native backend auto-detection is unsupported.
#[cfg(not(feature = "native"))]
pub fn auto_detect_port() -> Result<DetectedPort> {
    Err(Error::Unsupported(
        "port enumeration requires the `native` feature".to_string(),
    ))
}

/// One display line per port.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports.iter().map(ToString::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usb(name: &str, vid: u16, pid: u16, product: Option<&str>) -> DetectedPort {
        DetectedPort {
            device: DeviceKind::from_vid_pid(vid, pid),
            vid: Some(vid),
            pid: Some(pid),
            product: product.map(str::to_string),
            ..DetectedPort::plain(name)
        }
    }

    #[test]
    fn test_device_kind_from_vid_pid() {
        assert_eq!(DeviceKind::from_vid_pid(0x2C7C, 0x6001), DeviceKind::Quectel);
        assert_eq!(DeviceKind::from_vid_pid(0x2C7C, 0x0125), DeviceKind::Quectel);
        assert_eq!(DeviceKind::from_vid_pid(0x1A86, 0x7523), DeviceKind::Ch340);
        assert_eq!(DeviceKind::from_vid_pid(0x10C4, 0xEA60), DeviceKind::Cp210x);
        assert_eq!(DeviceKind::from_vid_pid(0x0403, 0x6001), DeviceKind::Ftdi);
        assert_eq!(DeviceKind::from_vid_pid(0x067B, 0x2303), DeviceKind::Prolific);
        assert_eq!(DeviceKind::from_vid_pid(0x1A86, 0x0001), DeviceKind::Unknown);
        assert_eq!(DeviceKind::from_vid_pid(0x1234, 0x5678), DeviceKind::Unknown);
    }

    #[test]
    fn test_bridges() {
        assert!(DeviceKind::Ch340.is_bridge());
        assert!(!DeviceKind::Quectel.is_bridge());
        assert!(!DeviceKind::Unknown.is_known());
    }

    #[test]
    fn test_select_prefers_quectel_at_interface() {
        let ports = vec![
            DetectedPort::plain("/dev/ttyS0"),
            usb("/dev/ttyUSB9", 0x1A86, 0x7523, None),
            usb("/dev/ttyUSB0", 0x2C7C, 0x6001, Some("Quectel USB Data Port")),
            usb("/dev/ttyUSB2", 0x2C7C, 0x6001, Some("Quectel AT Port")),
        ];
        assert_eq!(select_port(&ports).map(|p| p.name.as_str()), Some("/dev/ttyUSB2"));
    }

    #[test]
    fn test_select_fallback_order() {
        let quectel = vec![
            DetectedPort::plain("/dev/ttyS0"),
            usb("/dev/ttyUSB9", 0x1A86, 0x7523, None),
            usb("/dev/ttyUSB0", 0x2C7C, 0x6001, None),
        ];
        assert_eq!(select_port(&quectel).map(|p| p.name.as_str()), Some("/dev/ttyUSB0"));

        let bridge = vec![
            DetectedPort::plain("/dev/ttyS0"),
            usb("/dev/ttyUSB9", 0x1A86, 0x7523, None),
        ];
        assert_eq!(select_port(&bridge).map(|p| p.name.as_str()), Some("/dev/ttyUSB9"));

        let plain = vec![DetectedPort::plain("COM3")];
        assert_eq!(select_port(&plain).map(|p| p.name.as_str()), Some("COM3"));

        assert!(select_port(&[]).is_none());
    }

    #[test]
    fn test_format_port_list() {
        let ports = vec![
            usb("/dev/ttyUSB2", 0x2C7C, 0x6001, Some("EG800K")),
            usb("/dev/ttyACM0", 0x1234, 0xABCD, None),
            DetectedPort::plain("/dev/ttyS0"),
        ];

        let formatted = format_port_list(&ports);
        assert_eq!(formatted[0], "/dev/ttyUSB2 [Quectel] - EG800K");
        assert_eq!(formatted[1], "/dev/ttyACM0 [VID:1234 PID:ABCD]");
        assert_eq!(formatted[2], "/dev/ttyS0");
    }

    #[test]
    fn test_at_interface_needs_quectel_and_at_word() {
        assert!(usb("/dev/ttyUSB2", 0x2C7C, 0x6001, Some("Quectel USB AT Port")).is_at_interface());
        assert!(!usb("/dev/ttyUSB1", 0x2C7C, 0x6001, Some("Quectel USB DATA Port")).is_at_interface());
        assert!(!usb("/dev/ttyUSB0", 0x1A86, 0x7523, Some("USB AT bridge")).is_at_interface());
        assert!(!usb("/dev/ttyUSB3", 0x2C7C, 0x6001, None).is_at_interface());
    }
}
