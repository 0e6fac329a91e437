//! ecfota CLI - DFOTA upgrades for Quectel EC800K/EG800K modules.
//!
//! ## Features
//!
//! - Start a delta firmware upgrade from an HTTP(S)/FTP URL and follow it
//! - Module identity, SIM, network and signal checks
//! - Raw AT commands
//! - DFOTA result-code catalogue
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use ecfota::{Modem, ModemConfig, SerialConfig, port::DEFAULT_BAUD};
use env_logger::Env;
use log::debug;

mod commands;
mod config;
mod serial;

use config::{Config, ModeSetting};
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// ecfota - DFOTA upgrade tool for Quectel EC800K/EG800K LTE modules.
///
/// Environment variables:
///   ECFOTA_PORT              - Default serial port
///   ECFOTA_BAUD              - Default baud rate (default: 115200)
///   ECFOTA_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "ecfota")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  ecfota test\n  ecfota fota http://example.com/delta.bin --mode auto\n  ecfota at 'AT+CSQ'")]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Serial port of the module's AT interface (auto-detected if not specified).
    #[arg(short, long, global = true, env = "ECFOTA_PORT")]
    port: Option<String>,

    /// Baud rate [default: 115200].
    #[arg(short, long, global = true, env = "ECFOTA_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "ECFOTA_NON_INTERACTIVE")]
    non_interactive: bool,

    /// List all available ports (including unknown types).
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the module answers and show its identity and network state.
    Test,

    /// Print the firmware version (AT+QGMR).
    Version,

    /// Download and apply a delta firmware package.
    Fota {
        /// HTTP(S) or FTP URL of the delta package (at most 700 characters).
        url: String,

        /// What the module does once the image is written.
        #[arg(long, value_enum)]
        mode: Option<ModeSetting>,

        /// Download timeout enforced by the module, in seconds [default: 50].
        #[arg(long, value_name = "SECS")]
        timeout: Option<u32>,

        /// How long to wait for the upgrade result, in seconds [default: 600].
        #[arg(long, value_name = "SECS")]
        max_wait: Option<u64>,

        /// Skip reading the firmware version back after success.
        #[arg(long)]
        no_verify: bool,
    },

    /// Query the module's upgrade status (AT+QFOTADL?).
    Status,

    /// Send a raw AT command and print the response.
    At {
        /// Command text, e.g. "AT+CSQ".
        command: String,

        /// Response timeout in milliseconds.
        #[arg(long, value_name = "MS", default_value_t = 2000)]
        timeout: u64,
    },

    /// Print the DFOTA result codes and the upgrade notifications.
    Codes,

    /// List available serial ports.
    ListPorts {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Errors with a dedicated process exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad arguments or an ambiguous environment (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Unusable configuration (exit code 3).
    #[error("{0}")]
    Config(String),
    /// The module could not be reached (exit code 4).
    #[error("{0}")]
    Device(String),
    /// The module reported a failed upgrade (exit code 5).
    #[error("{0}")]
    UpgradeFailed(String),
    /// No answer in time (exit code 6).
    #[error("{0}")]
    Timeout(String),
    /// Ctrl-C or a declined prompt (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::Device(_) => 4,
            Self::UpgradeFailed(_) => 5,
            Self::Timeout(_) => 6,
            Self::Cancelled(_) => 130,
        }
    }
}

fn library_exit_code(err: &ecfota::Error) -> i32 {
    use ecfota::Error;
    match err {
        Error::Io(_) | Error::Serial(_) | Error::NotConnected | Error::DeviceNotFound => 4,
        Error::UrlTooLong { .. } => 2,
        Error::NetworkNotRegistered(_) | Error::CommandFailed { .. } | Error::Protocol(_) => 5,
        Error::Timeout(_) => 6,
        Error::Interrupted => 130,
        Error::Unsupported(_) => 1,
    }
}

/// Map an error to the process exit code, looking through added context.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return cli_err.exit_code();
        }
        if let Some(lib_err) = cause.downcast_ref::<ecfota::Error>() {
            return library_exit_code(lib_err);
        }
    }
    1
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler() {
    let installed = ctrlc::set_handler(|| {
        // A second Ctrl-C gives up without waiting for cleanup
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
    });
    if let Err(e) = installed {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    ecfota::set_interrupt_checker(was_interrupted);
}

fn main() {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if std::env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    debug!(
        "ecfota v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code_for(&err));
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        if !path.exists() {
            return Err(CliError::Config(format!(
                "Config file {} does not exist",
                path.display()
            ))
            .into());
        }
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    install_interrupt_handler();

    match &cli.command {
        Commands::Test => commands::modem::cmd_test(cli, &mut config),
        Commands::Version => commands::modem::cmd_version(cli, &mut config),
        Commands::Fota {
            url,
            mode,
            timeout,
            max_wait,
            no_verify,
        } => {
            let options = commands::fota::FotaOptions::resolve(
                *mode,
                *timeout,
                *max_wait,
                *no_verify,
                &config.fota,
            );
            commands::fota::cmd_fota(cli, &mut config, url, &options)
        },
        Commands::Status => commands::modem::cmd_status(cli, &mut config),
        Commands::At { command, timeout } => {
            commands::modem::cmd_at(cli, &mut config, command, *timeout)
        },
        Commands::Codes => {
            commands::codes::cmd_codes();
            Ok(())
        },
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Baud rate: flag or environment, then config, then the default.
fn resolve_baud(cli: &Cli, config: &Config) -> u32 {
    cli.baud
        .or(config
            .port
            .connection
            .baud)
        .unwrap_or(DEFAULT_BAUD)
}

/// Get serial port from CLI args, config, detection or a prompt.
pub(crate) fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
    };

    let selected = select_serial_port(&options, config)?;

    // Ask to remember if not a known device and interactive mode
    if !selected.is_known && !cli.non_interactive {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}

/// Select a port and connect to the module behind it.
pub(crate) fn open_modem(cli: &Cli, config: &mut Config) -> Result<Modem> {
    let port = get_port(cli, config)?;
    let baud = resolve_baud(cli, config);
    if !cli.quiet {
        eprintln!(
            "{} Using {} at {baud} baud",
            style("🔌").cyan(),
            style(&port).green()
        );
    }

    let rts_cts = config
        .port
        .connection
        .rts_cts
        .unwrap_or(false);
    let serial = SerialConfig::new(&port, baud).with_rts_cts(rts_cts);
    Modem::open(&serial, ModemConfig::default()).with_context(|| format!("Failed to open {port}"))
}

/// Fail with [`CliError::Cancelled`] once Ctrl-C was pressed.
pub(crate) fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}
