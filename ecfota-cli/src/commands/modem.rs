//! Module checks and raw AT access: `test`, `version`, `status`, `at`.

use {
    crate::{Cli, CliError, config::Config, ensure_not_interrupted, open_modem},
    anyhow::{Result, bail},
    console::style,
    ecfota::{ModuleInfo, Response, ResponseStatus},
    log::warn,
    std::time::Duration,
};

/// `(label, value)` rows for a module summary; unknown values show as "-".
pub(crate) fn module_info_rows(info: &ModuleInfo) -> Vec<(&'static str, String)> {
    let or_dash = |value: Option<&str>| value.unwrap_or("-").to_string();
    vec![
        ("Module", or_dash(info.description.as_deref())),
        ("Firmware", or_dash(info.firmware_version.as_deref())),
        ("Version", or_dash(info.version_number.as_deref())),
        ("IMEI", or_dash(info.imei.as_deref())),
        (
            "SIM",
            info.sim_status
                .as_ref()
                .map_or_else(|| "-".to_string(), ToString::to_string),
        ),
    ]
}

/// Print the response body, one line per row, without echo or final status.
fn print_response(command: &str, response: &Response) {
    for line in response
        .lines()
        .filter(|line| *line != command && *line != "OK" && *line != "ERROR")
    {
        println!("{line}");
    }
}

/// Test command implementation.
pub(crate) fn cmd_test(cli: &Cli, config: &mut Config) -> Result<()> {
    let mut modem = open_modem(cli, config)?;

    if !modem.test_at() {
        ensure_not_interrupted()?;
        return Err(CliError::Device("Module did not answer AT".to_string()).into());
    }
    if !cli.quiet {
        eprintln!("{} Module answers AT", style("✓").green());
    }

    let info = modem.query_module_info()?;
    for (label, value) in module_info_rows(&info) {
        println!("{label:<10} {value}");
    }

    match modem.query_network_status() {
        Ok(status) => println!("{:<10} {status}", "Network"),
        Err(e) => warn!("Network status unavailable: {e}"),
    }
    match modem.query_signal_quality() {
        Ok(signal) => println!("{:<10} {signal}", "Signal"),
        Err(e) => warn!("Signal quality unavailable: {e}"),
    }

    Ok(())
}

/// Version command implementation.
pub(crate) fn cmd_version(cli: &Cli, config: &mut Config) -> Result<()> {
    let mut modem = open_modem(cli, config)?;
    let firmware = modem.query_firmware_version()?;
    println!("{firmware}");
    Ok(())
}

/// Status command implementation.
pub(crate) fn cmd_status(cli: &Cli, config: &mut Config) -> Result<()> {
    let mut modem = open_modem(cli, config)?;
    let command = "AT+QFOTADL?";
    let response = modem.query_fota_status()?;
    finish_raw(command, &response)
}

/// At command implementation.
pub(crate) fn cmd_at(cli: &Cli, config: &mut Config, command: &str, timeout_ms: u64) -> Result<()> {
    let command = command.trim();
    if command.is_empty() {
        return Err(CliError::Usage("AT command must not be empty".to_string()).into());
    }

    let mut modem = open_modem(cli, config)?;
    let response = modem.send_command(command, Duration::from_millis(timeout_ms))?;
    finish_raw(command, &response)
}

fn finish_raw(command: &str, response: &Response) -> Result<()> {
    print_response(command, response);
    match response.status {
        ResponseStatus::Ok => Ok(()),
        ResponseStatus::Error => bail!("{command} returned ERROR"),
        ResponseStatus::Timeout => {
            ensure_not_interrupted()?;
            Err(CliError::Timeout(format!("No final response to {command}")).into())
        },
    }
}
