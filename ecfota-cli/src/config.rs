//! `ecfota.toml` settings.
//!
//! Files are layered: the global file under the user's config directory
//! first, then `./ecfota.toml` on top. Only keys a file actually sets
//! replace earlier values. Flags and `ECFOTA_*` variables are applied later
//! by the commands and always win.
//!
//! ```toml
//! [port.connection]
//! serial = "/dev/ttyUSB2"
//! baud = 115200
//! rts_cts = false
//!
//! [[port.usb_device]]
//! vid = 11388
//! pid = 24577
//!
//! [fota]
//! mode = "manual"
//! timeout = 50
//! max_wait = 600
//! verify = true
//! ```

use {
    clap::ValueEnum,
    directories::ProjectDirs,
    ecfota::ResetMode,
    log::{debug, info, warn},
    serde::{Deserialize, Serialize},
    std::{
        fs,
        path::{Path, PathBuf},
    },
};

/// Name of the local configuration file.
pub const LOCAL_CONFIG_FILE: &str = "ecfota.toml";

const GLOBAL_CONFIG_FILE: &str = "config.toml";

/// A USB vendor/product pair the user has confirmed as a module.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    pub vid: u16,
    pub pid: u16,
}

impl UsbDevice {
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        (self.vid, self.pid) == (vid, pid)
    }
}

/// `[port.connection]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Port name, e.g. "/dev/ttyUSB2" or "COM8".
    pub serial: Option<String>,
    pub baud: Option<u32>,
    /// RTS/CTS handshake, only meaningful on a UART link.
    pub rts_cts: Option<bool>,
}

/// `[port]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Extra USB devices treated as known during port selection.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// Reset behaviour as written in config files and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModeSetting {
    /// Host resets the module after the upgrade (mode 0).
    Manual,
    /// Module reboots into the new firmware by itself (mode 1).
    Auto,
}

impl From<ModeSetting> for ResetMode {
    fn from(mode: ModeSetting) -> Self {
        match mode {
            ModeSetting::Manual => Self::Manual,
            ModeSetting::Auto => Self::Automatic,
        }
    }
}

/// `[fota]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FotaConfig {
    pub mode: Option<ModeSetting>,
    /// Download timeout handed to the module, in seconds.
    pub timeout: Option<u32>,
    /// How long the host waits for `END`, in seconds.
    pub max_wait: Option<u64>,
    /// Read the firmware version back after a successful upgrade.
    pub verify: Option<bool>,
}

/// Everything `ecfota.toml` can hold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub port: PortConfig,
    #[serde(default)]
    pub fota: FotaConfig,
}

/// Replace `slot` only when the newer layer sets a value.
fn overlay<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

impl Config {
    /// Global file, then the local one on top.
    pub fn load() -> Self {
        let layers = Self::global_config_path()
            .into_iter()
            .chain(std::iter::once(PathBuf::from(LOCAL_CONFIG_FILE)));

        let mut config = Self::default();
        for path in layers {
            if let Some(layer) = Self::read_layer(&path) {
                debug!("Config layer: {}", path.display());
                config.apply(layer);
            }
        }
        config
    }

    /// Only the file given with `--config`.
    pub fn load_from_path(path: &Path) -> Self {
        Self::read_layer(path).unwrap_or_else(|| {
            warn!("Ignoring {}, continuing with defaults", path.display());
            Self::default()
        })
    }

    /// `None` when the file is absent or unusable; unusable files are warned about.
    fn read_layer(path: &Path) -> Option<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cannot read {}: {e}", path.display());
                return None;
            },
        };
        toml::from_str(&text)
            .map_err(|e| warn!("Invalid TOML in {}: {e}", path.display()))
            .ok()
    }

    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "ecfota").map(|dirs| dirs.config_dir().to_path_buf())
    }

    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join(GLOBAL_CONFIG_FILE))
    }

    fn apply(&mut self, layer: Self) {
        let Self { port, fota } = layer;

        let connection = &mut self.port.connection;
        overlay(&mut connection.serial, port.connection.serial);
        overlay(&mut connection.baud, port.connection.baud);
        overlay(&mut connection.rts_cts, port.connection.rts_cts);
        for device in port.usb_device {
            if !self.port.usb_device.contains(&device) {
                self.port.usb_device.push(device);
            }
        }

        overlay(&mut self.fota.mode, fota.mode);
        overlay(&mut self.fota.timeout, fota.timeout);
        overlay(&mut self.fota.max_wait, fota.max_wait);
        overlay(&mut self.fota.verify, fota.verify);
    }

    pub fn knows_usb(&self, vid: u16, pid: u16) -> bool {
        self.port
            .usb_device
            .iter()
            .any(|device| device.matches(vid, pid))
    }

    /// Where a remembered device goes: the local file when present.
    fn remember_target() -> anyhow::Result<PathBuf> {
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Ok(local);
        }
        match Self::global_config_dir() {
            Some(dir) => {
                fs::create_dir_all(&dir)?;
                Ok(dir.join(GLOBAL_CONFIG_FILE))
            },
            None => Ok(local),
        }
    }

    /// Record a USB device so later runs pick it without asking.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        let device = UsbDevice { vid, pid };
        if self.port.usb_device.contains(&device) {
            return Ok(());
        }

        let path = Self::remember_target()?;
        Self::append_usb_device(&path, device)?;
        self.port.usb_device.push(device);
        info!("Remembered USB {vid:04X}:{pid:04X} in {}", path.display());
        Ok(())
    }

    /// Rewrite `path` with `device` added, keeping whatever else it held.
    fn append_usb_device(path: &Path, device: UsbDevice) -> anyhow::Result<()> {
        let mut on_disk = Self::read_layer(path).unwrap_or_default();
        if !on_disk.port.usb_device.contains(&device) {
            on_disk.port.usb_device.push(device);
        }
        fs::write(path, toml::to_string_pretty(&on_disk)?)?;
        Ok(())
    }
}
