//! Serial port selection.
//!
//! Resolution order:
//! - `--port` / `ECFOTA_PORT`
//! - `[port.connection] serial` from the config file
//! - auto-detection (a single candidate, or the Quectel AT interface)
//! - an interactive prompt when stdin and stderr are terminals

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    ecfota::{DetectedPort, detect_ports},
    log::{debug, error, info},
    std::io::IsTerminal,
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Offer every port, not only recognized ones.
    pub list_all_ports: bool,
    /// Never prompt.
    pub non_interactive: bool,
}

/// Result of port selection including whether it was a known device.
pub struct SelectedPort {
    /// The selected port info.
    pub port: DetectedPort,
    /// Whether this port matched a known/configured device.
    pub is_known: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    // Selection failures map to exit code 2 so scripts can tell them apart
    CliError::Usage(message.to_string()).into()
}

/// Pick a port without prompting.
///
/// One candidate is used as is; among several, only a port that identifies
/// itself as the Quectel AT interface is chosen.
fn select_non_interactive_port(candidates: Vec<DetectedPort>, config: &Config) -> Result<SelectedPort> {
    let at_ports: Vec<&DetectedPort> = candidates
        .iter()
        .filter(|p| p.is_at_interface())
        .collect();
    let chosen = match (candidates.len(), at_ports.as_slice()) {
        (0, _) => return Err(usage_err("No serial ports available")),
        (1, _) => candidates
            .first()
            .cloned(),
        (_, [only]) => Some((*only).clone()),
        _ => None,
    };

    let port = chosen.ok_or_else(|| {
        usage_err("Multiple serial ports found; specify one with --port or ECFOTA_PORT")
    })?;
    Ok(SelectedPort {
        is_known: is_known_device(&port, config),
        port,
    })
}

/// Select a serial port automatically or interactively.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    // If port explicitly specified, use it
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name, config));
    }

    // If port in config, use it
    if let Some(port_name) = &config
        .port
        .connection
        .serial
    {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name, config));
    }

    let ports = detect_ports();
    if ports.is_empty() {
        return Err(usage_err("No serial ports found"));
    }

    // Known devices first unless the user asks for everything
    let known_ports: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| is_known_device(p, config))
        .cloned()
        .collect();
    let candidates = if options.list_all_ports || known_ports.is_empty() {
        ports
    } else {
        known_ports
    };

    match select_non_interactive_port(candidates.clone(), config) {
        Ok(selected) => {
            info!(
                "Auto-selected port: {} [{}]",
                selected.port.name,
                selected.port.device.name()
            );
            Ok(selected)
        },
        Err(e) if options.non_interactive => Err(e),
        Err(_) => {
            ensure_interactive_terminal()?;
            select_port_interactive(candidates, config)
        },
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Multiple serial ports found and no terminal to ask; use --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                usage_err("Interactive prompt failed")
            }
        },
    }
}

/// Look `name` up among the detected ports; unlisted paths are used as given.
fn find_port_by_name(name: &str, config: &Config) -> SelectedPort {
    let ports = detect_ports();
    // Exact match first; Windows names compare case-insensitively
    let port = ports
        .iter()
        .position(|p| p.name == name)
        .or_else(|| ports.iter().position(|p| p.name.eq_ignore_ascii_case(name)))
        .and_then(|index| ports.into_iter().nth(index))
        .unwrap_or_else(|| DetectedPort::plain(name));

    SelectedPort {
        is_known: is_known_device(&port, config),
        port,
    }
}

/// Built-in device table, or a USB pair remembered in the config.
fn is_known_device(port: &DetectedPort, config: &Config) -> bool {
    port.device.is_known()
        || matches!((port.vid, port.pid), (Some(vid), Some(pid)) if config.knows_usb(vid, pid))
}

/// One menu line: name (bold when known), device or VID:PID, product.
fn port_label(port: &DetectedPort, known: bool, width: usize) -> String {
    let mut label = if known {
        style(&port.name).bold().to_string()
    } else {
        port.name.clone()
    };
    match (port.device.is_known(), port.vid, port.pid) {
        (true, ..) => label.push_str(&format!(" [{}]", style(port.device.name()).yellow())),
        (false, Some(vid), Some(pid)) => label.push_str(&format!(" ({vid:04X}:{pid:04X})")),
        _ => {},
    }
    if let Some(product) = &port.product {
        label.push_str(&format!(" - {}", style(product).dim()));
    }
    console::truncate_str(&label, width, "\u{2026}").into_owned()
}

/// Interactive port selection.
fn select_port_interactive(mut ports: Vec<DetectedPort>, config: &Config) -> Result<SelectedPort> {
    eprintln!("{} Found {} serial ports", style("ℹ").blue(), ports.len());

    // AT interfaces first, then other known devices
    ports.sort_by_key(|p| (!p.is_at_interface(), !is_known_device(p, config)));

    let width = usize::from(console::Term::stderr().size().1).saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|port| port_label(port, is_known_device(port, config), width))
        .collect();

    let index = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the modem's AT port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?
        .ok_or_else(|| CliError::Cancelled("Port selection cancelled".to_string()))?;
    let port = ports
        .into_iter()
        .nth(index)
        .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
    Ok(SelectedPort {
        is_known: is_known_device(&port, config),
        port,
    })
}

/// Offer to remember an unrecognized USB device.
pub fn ask_remember_port(port: &DetectedPort, config: &mut Config) -> Result<()> {
    let (Some(vid), Some(pid)) = (port.vid, port.pid) else {
        return Ok(());
    };
    if config.knows_usb(vid, pid) || !std::io::stdin().is_terminal() {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!(
            "Remember {vid:04X}:{pid:04X} as a modem port for next time?"
        ))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_usb_device(vid, pid) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        console::measure_text_width,
        ecfota::DeviceKind,
    };

    fn usb(name: &str, vid: u16, pid: u16, product: Option<&str>) -> DetectedPort {
        DetectedPort {
            device: DeviceKind::from_vid_pid(vid, pid),
            vid: Some(vid),
            pid: Some(pid),
            product: product.map(str::to_string),
            ..DetectedPort::plain(name)
        }
    }

    fn assert_usage(err: &anyhow::Error) {
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_serial_options_default() {
        let options = SerialOptions::default();
        assert!(options.port.is_none());
        assert!(!options.list_all_ports);
        assert!(!options.non_interactive);
    }

    #[test]
    fn test_port_label_fits_narrow_terminal() {
        let port = usb("/dev/ttyUSB2", 0x2C7C, 0x6001, Some("Quectel USB AT Port"));
        let label = port_label(&port, true, 6);
        assert!(!label.contains('\n'));
        assert!(measure_text_width(&label) <= 6);
    }

    #[test]
    fn test_port_label_shows_ids_for_unknown_usb() {
        let port = usb("/dev/ttyACM0", 0xABCD, 0x1234, None);
        let label = port_label(&port, false, 200);
        assert!(label.contains("/dev/ttyACM0"));
        assert!(label.contains("ABCD:1234"));
    }

    #[test]
    fn test_is_known_device_builtin() {
        let config = Config::default();
        assert!(is_known_device(&usb("/dev/ttyUSB2", 0x2C7C, 0x6001, None), &config));
        assert!(is_known_device(&usb("/dev/ttyUSB0", 0x1A86, 0x7523, None), &config));
        assert!(!is_known_device(&usb("/dev/ttyUSB0", 0x9999, 0x9999, None), &config));
        assert!(!is_known_device(&DetectedPort::plain("/dev/ttyS0"), &config));
    }

    #[test]
    fn test_is_known_device_from_config() {
        let port = usb("/dev/ttyACM0", 0xABCD, 0x1234, None);
        let mut config = Config::default();
        config
            .port
            .usb_device
            .push(crate::config::UsbDevice {
                vid: 0xABCD,
                pid: 0x1234,
            });
        assert!(is_known_device(&port, &config));
    }

    #[test]
    fn test_explicit_unlisted_port_is_used_verbatim() {
        let selected = find_port_by_name("/dev/ecfota-test-port", &Config::default());
        assert_eq!(selected.port.name, "/dev/ecfota-test-port");
        assert!(!selected.is_known);
    }

    #[test]
    fn test_non_interactive_no_ports_is_usage_error() {
        let err = select_non_interactive_port(vec![], &Config::default())
            .err()
            .unwrap();
        assert_usage(&err);
    }

    #[test]
    fn test_non_interactive_single_port() {
        let selected =
            select_non_interactive_port(vec![DetectedPort::plain("COM8")], &Config::default())
                .unwrap();
        assert_eq!(selected.port.name, "COM8");
    }

    #[test]
    fn test_non_interactive_prefers_at_interface() {
        let ports = vec![
            usb("/dev/ttyUSB0", 0x2C7C, 0x6001, Some("Quectel DIAG")),
            usb("/dev/ttyUSB2", 0x2C7C, 0x6001, Some("Quectel AT Port")),
            usb("/dev/ttyUSB3", 0x2C7C, 0x6001, Some("Quectel Modem")),
        ];
        let selected = select_non_interactive_port(ports, &Config::default()).unwrap();
        assert_eq!(selected.port.name, "/dev/ttyUSB2");
        assert!(selected.is_known);
    }

    #[test]
    fn test_non_interactive_ambiguous_is_usage_error() {
        let ports = vec![
            DetectedPort::plain("/dev/ttyUSB0"),
            DetectedPort::plain("/dev/ttyUSB1"),
        ];
        let err = select_non_interactive_port(ports, &Config::default())
            .err()
            .unwrap();
        assert_usage(&err);
    }
}
