//! Port listing command implementation.

use {
    anyhow::Result,
    console::style,
    ecfota::{DetectedPort, auto_detect_port, detect_ports},
};

/// `{"ok": true, "data": {"ports": [...]}}`
pub(crate) fn ports_json(ports: &[DetectedPort]) -> serde_json::Value {
    let ports: Vec<serde_json::Value> = ports
        .iter()
        .map(|p| {
            serde_json::json!({
                "name": p.name,
                "device": p.device.name(),
                "known": p.device.is_known(),
                "at_interface": p.is_at_interface(),
                "vid": p.vid,
                "pid": p.pid,
                "manufacturer": p.manufacturer,
                "product": p.product,
                "serial": p.serial,
            })
        })
        .collect();
    serde_json::json!({
        "ok": true,
        "data": {
            "ports": ports,
        }
    })
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = detect_ports();

    if json {
        println!("{}", serde_json::to_string_pretty(&ports_json(&detected))?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for (port, line) in detected
        .iter()
        .zip(ecfota::device::format_port_list(&detected))
    {
        let marker = if port.is_at_interface() {
            style("•").green().bold()
        } else {
            style("•").green()
        };
        eprintln!("  {marker} {line}");
    }

    if let Ok(auto_port) = auto_detect_port() {
        eprintln!(
            "\n{} Auto-detected AT port: {}",
            style("→").green().bold(),
            style(&auto_port.name).cyan().bold()
        );
    }

    Ok(())
}
