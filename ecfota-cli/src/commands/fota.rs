//! Fota command implementation.

use {
    crate::{
        Cli, CliError,
        config::{Config, FotaConfig},
        ensure_not_interrupted, open_modem, use_fancy_output, was_interrupted,
    },
    anyhow::Result,
    console::style,
    ecfota::{
        FotaEvent, FotaOutcome, Modem, ProgressObserver, ResetMode, UpgradeRequest,
        codes::describe_fota_result,
        fota::{DEFAULT_DOWNLOAD_TIMEOUT_SECS, MAX_URL_LEN},
    },
    indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle},
    log::{info, warn},
    std::{
        thread,
        time::{Duration, Instant},
    },
};

/// Default wait for the `END` notification.
const DEFAULT_MAX_WAIT_SECS: u64 = 600;

/// Pause before reading the version back after success.
const SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Upgrade settings after merging flags with the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FotaOptions {
    pub(crate) mode: ResetMode,
    pub(crate) timeout_secs: u32,
    pub(crate) max_wait: Duration,
    pub(crate) verify: bool,
}

impl FotaOptions {
    /// Flags win over `[fota]` settings, which win over the defaults.
    pub(crate) fn resolve(
        mode: Option<crate::config::ModeSetting>,
        timeout: Option<u32>,
        max_wait: Option<u64>,
        no_verify: bool,
        config: &FotaConfig,
    ) -> Self {
        Self {
            mode: mode
                .or(config.mode)
                .map_or(ResetMode::default(), ResetMode::from),
            timeout_secs: timeout
                .or(config.timeout)
                .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            max_wait: Duration::from_secs(
                max_wait
                    .or(config.max_wait)
                    .unwrap_or(DEFAULT_MAX_WAIT_SECS),
            ),
            verify: !no_verify && config.verify.unwrap_or(true),
        }
    }
}

/// Reject URLs the module cannot take before touching any port.
pub(crate) fn validate_url(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(CliError::Usage("Upgrade URL must not be empty".to_string()).into());
    }
    let len = url.chars().count();
    if len > MAX_URL_LEN {
        return Err(CliError::Usage(format!(
            "Upgrade URL is {len} characters long; the module accepts at most {MAX_URL_LEN}"
        ))
        .into());
    }
    Ok(())
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}

/// Feed upgrade notifications into the progress bar.
fn progress_observer(pb: ProgressBar) -> ProgressObserver {
    Box::new(move |event: &FotaEvent| match *event {
        FotaEvent::Updating(percent) => {
            pb.set_message("Updating");
            pb.set_position(u64::from(percent.min(100)));
            if pb.is_hidden() {
                info!("Upgrade progress: {percent}%");
            }
        },
        FotaEvent::End(0) => pb.set_position(100),
        FotaEvent::End(code) => pb.set_message(format!("Result {code}")),
    })
}

/// Turn a finished wait into the command's result.
pub(crate) fn outcome_result(outcome: FotaOutcome, max_wait: Duration) -> Result<()> {
    match outcome {
        FotaOutcome::Succeeded => Ok(()),
        FotaOutcome::Failed { result_code } => Err(CliError::UpgradeFailed(format!(
            "Upgrade failed with code {result_code}: {}",
            describe_fota_result(result_code)
        ))
        .into()),
        FotaOutcome::TimedOut => Err(CliError::Timeout(format!(
            "No upgrade result within {}s; the module may still be working, check with `ecfota status`",
            max_wait.as_secs()
        ))
        .into()),
        FotaOutcome::Cancelled => {
            Err(CliError::Cancelled("Stopped waiting for the upgrade result".to_string()).into())
        },
    }
}

/// Sleep for `delay`; returns `false` if Ctrl-C cut it short.
fn settle(delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    while Instant::now() < deadline {
        if was_interrupted() {
            return false;
        }
        thread::sleep(Duration::from_millis(100));
    }
    !was_interrupted()
}

fn verify_version(modem: &mut Modem, before: Option<&str>, quiet: bool) {
    if !quiet {
        eprintln!(
            "{} Waiting {}s before reading the version back",
            style("⏳").yellow(),
            SETTLE_DELAY.as_secs()
        );
    }
    if !settle(SETTLE_DELAY) {
        return;
    }

    match modem.query_firmware_version() {
        Ok(after) if before == Some(after.as_str()) => {
            warn!("Firmware version unchanged ({after}); the module may need a reset to boot the new image");
        },
        Ok(after) => {
            if !quiet {
                eprintln!("{} Firmware now {}", style("✓").green(), style(&after).bold());
            }
        },
        Err(e) => warn!("Could not read the firmware version back: {e}"),
    }
}

/// Fota command implementation.
pub(crate) fn cmd_fota(cli: &Cli, config: &mut Config, url: &str, options: &FotaOptions) -> Result<()> {
    validate_url(url)?;
    let request = UpgradeRequest::new(url)
        .with_mode(options.mode)
        .with_timeout_secs(options.timeout_secs);

    let mut modem = open_modem(cli, config)?;
    ensure_not_interrupted()?;

    let before = modem
        .query_firmware_version()
        .ok();
    if !cli.quiet {
        if let Some(version) = &before {
            eprintln!("{} Current firmware: {}", style("ℹ").blue(), version);
        }
        eprintln!(
            "{} Submitting upgrade ({}, download timeout {}s)",
            style("📦").cyan(),
            options.mode,
            options.timeout_secs
        );
    }

    let pb = progress_bar(cli.quiet);
    pb.set_message("Downloading");
    if let Err(err) = modem.start_upgrade(&request, Some(progress_observer(pb.clone()))) {
        pb.abandon();
        return Err(err.into());
    }

    let outcome = modem.wait_for_upgrade_completion(options.max_wait);
    if outcome.is_success() {
        pb.finish_with_message("Complete");
    } else {
        pb.abandon_with_message(outcome.to_string());
    }
    outcome_result(outcome, options.max_wait)?;

    if !cli.quiet {
        eprintln!("\n{} Upgrade succeeded", style("🎉").green().bold());
    }
    if options.verify {
        verify_version(&mut modem, before.as_deref(), cli.quiet);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, crate::config::ModeSetting};

    fn code_of(err: &anyhow::Error) -> Option<&CliError> {
        err.downcast_ref::<CliError>()
    }

    #[test]
    fn test_resolve_defaults() {
        let options = FotaOptions::resolve(None, None, None, false, &FotaConfig::default());
        assert_eq!(options.mode, ResetMode::Manual);
        assert_eq!(options.timeout_secs, DEFAULT_DOWNLOAD_TIMEOUT_SECS);
        assert_eq!(options.max_wait, Duration::from_secs(DEFAULT_MAX_WAIT_SECS));
        assert!(options.verify);
    }

    #[test]
    fn test_resolve_flags_override_config() {
        let config = FotaConfig {
            mode: Some(ModeSetting::Manual),
            timeout: Some(120),
            max_wait: Some(900),
            verify: Some(true),
        };
        let options = FotaOptions::resolve(Some(ModeSetting::Auto), Some(30), None, true, &config);
        assert_eq!(options.mode, ResetMode::Automatic);
        assert_eq!(options.timeout_secs, 30);
        assert_eq!(options.max_wait, Duration::from_secs(900));
        assert!(!options.verify);
    }

    #[test]
    fn test_resolve_config_can_disable_verify() {
        let config = FotaConfig {
            verify: Some(false),
            ..FotaConfig::default()
        };
        assert!(!FotaOptions::resolve(None, None, None, false, &config).verify);
    }

    #[test]
    fn test_validate_url_limits() {
        assert!(validate_url("http://example.com/delta.bin").is_ok());

        let at_limit = format!("http://{}", "a".repeat(MAX_URL_LEN - 7));
        assert!(validate_url(&at_limit).is_ok());

        let too_long = format!("http://{}", "a".repeat(MAX_URL_LEN - 6));
        let err = validate_url(&too_long).unwrap_err();
        assert!(matches!(code_of(&err), Some(CliError::Usage(_))));
        assert!(err.to_string().contains("701"));

        assert!(validate_url("  ").is_err());
    }

    #[test]
    fn test_outcome_result_explains_codes() {
        let wait = Duration::from_secs(60);
        assert!(outcome_result(FotaOutcome::Succeeded, wait).is_ok());

        let err = outcome_result(FotaOutcome::Failed { result_code: 505 }, wait).unwrap_err();
        assert!(matches!(code_of(&err), Some(CliError::UpgradeFailed(_))));
        assert!(err.to_string().contains("Package check error"));

        let err = outcome_result(FotaOutcome::TimedOut, wait).unwrap_err();
        assert!(matches!(code_of(&err), Some(CliError::Timeout(_))));

        let err = outcome_result(FotaOutcome::Cancelled, wait).unwrap_err();
        assert!(matches!(code_of(&err), Some(CliError::Cancelled(_))));
    }

    #[test]
    fn test_observer_tracks_progress() {
        let pb = ProgressBar::hidden();
        let mut observer = progress_observer(pb.clone());
        observer(&FotaEvent::Updating(42));
        assert_eq!(pb.position(), 42);
        observer(&FotaEvent::Updating(250));
        assert_eq!(pb.position(), 100);
        observer(&FotaEvent::End(0));
        assert_eq!(pb.position(), 100);
    }
}
