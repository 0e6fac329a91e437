//! DFOTA upgrade session.
//!
//! An upgrade is submitted with `AT+QFOTADL` and then runs on the module on
//! its own; the host only learns about it from `+QIND: "FOTA",...`
//! notifications. [`FotaSession`] turns those notifications into state that
//! a foreground caller can block on:
//!
//! ```text
//!  Idle -> Preflight -> AwaitingDownload -> InProgress -> Succeeded
//!              |               |                 |
//!              +---------------+-----------------+-----> Failed
//! ```
//!
//! `UPDATING` and `END` only count once `AT+QFOTADL` is on its way; earlier
//! ones are leftovers from a previous run and are dropped.
//!
//! The reader thread feeds notifications through [`FotaSession::handle`];
//! [`FotaSession::wait_for_completion`] sleeps on a condition variable until
//! the `END` notification arrives.

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, error, info};

use crate::{at::urc::Urc, codes, is_interrupted_requested};

/// Longest `AT+QFOTADL` URL the module accepts.
pub const MAX_URL_LEN: usize = 700;

/// Download timeout, in seconds, passed to `AT+QFOTADL` by default.
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u32 = 50;

/// `result_code` value before any `END` has been seen.
pub const RESULT_UNKNOWN: i32 = -1;

const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Callback invoked on the reader thread for every progress event.
pub type ProgressObserver = Box<dyn FnMut(&FotaEvent) + Send>;

/// What the module does once the new image is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ResetMode {
    /// Wait for the host to reset the module (`0`).
    #[default]
    Manual,
    /// Reboot into the new firmware immediately (`1`).
    Automatic,
}

impl ResetMode {
    /// Value of the `<mode>` parameter.
    pub fn code(self) -> u8 {
        match self {
            Self::Manual => 0,
            Self::Automatic => 1,
        }
    }
}

impl fmt::Display for ResetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => f.write_str("manual reset"),
            Self::Automatic => f.write_str("automatic reset"),
        }
    }
}

/// Parameters of one `AT+QFOTADL` submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// HTTP(S) or FTP location of the delta package.
    pub url: String,
    /// Reset behaviour after the upgrade.
    pub mode: ResetMode,
    /// Download timeout, in seconds, enforced by the module.
    pub timeout_secs: u32,
}

impl UpgradeRequest {
    /// Request with manual reset and the default download timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mode: ResetMode::Manual,
            timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }

    /// Set the reset mode.
    #[must_use]
    pub fn with_mode(mut self, mode: ResetMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the download timeout.
    #[must_use]
    pub fn with_timeout_secs(mut self, timeout_secs: u32) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// URL length in characters.
    pub fn url_len(&self) -> usize {
        self.url
            .chars()
            .count()
    }

    /// `AT+QFOTADL="<url>",<mode>,<timeout>`
    pub fn command_text(&self) -> String {
        format!(
            "AT+QFOTADL=\"{}\",{},{}",
            self.url,
            self.mode
                .code(),
            self.timeout_secs
        )
    }
}

/// Where an upgrade currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UpgradePhase {
    /// No upgrade started.
    #[default]
    Idle,
    /// Checking version and registration before submitting.
    Preflight,
    /// `AT+QFOTADL` submitted, no progress seen yet.
    AwaitingDownload,
    /// At least one `UPDATING` notification arrived.
    InProgress,
    /// `END` with result `0`.
    Succeeded,
    /// Precondition, submission, or `END` failure.
    Failed,
}

impl UpgradePhase {
    /// Between submission start and `END`.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Preflight | Self::AwaitingDownload | Self::InProgress)
    }
}

/// Progress report passed to the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FotaEvent {
    /// Percentage from an `UPDATING` notification.
    Updating(u32),
    /// Result code from the `END` notification.
    End(i32),
}

impl FotaEvent {
    /// `"UPDATING"` or `"END"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Updating(_) => "UPDATING",
            Self::End(_) => "END",
        }
    }

    /// The numeric payload.
    pub fn value(&self) -> i64 {
        match *self {
            Self::Updating(p) => i64::from(p),
            Self::End(code) => i64::from(code),
        }
    }
}

/// How [`FotaSession::wait_for_completion`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FotaOutcome {
    /// `END` with result `0`.
    Succeeded,
    /// `END` with a nonzero result.
    Failed {
        /// Vendor result code, see [`codes::describe_fota_result`].
        result_code: i32,
    },
    /// No `END` before the deadline.
    TimedOut,
    /// Disconnected or interrupted while waiting.
    Cancelled,
}

impl FotaOutcome {
    /// Whether the module reported success.
    pub fn is_success(self) -> bool {
        self == Self::Succeeded
    }

    /// Result code, or [`RESULT_UNKNOWN`] when no `END` was seen.
    pub fn result_code(self) -> i32 {
        match self {
            Self::Succeeded => 0,
            Self::Failed { result_code } => result_code,
            Self::TimedOut | Self::Cancelled => RESULT_UNKNOWN,
        }
    }
}

impl fmt::Display for FotaOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("upgrade succeeded"),
            Self::Failed { result_code } => write!(
                f,
                "upgrade failed with code {result_code} ({})",
                codes::describe_fota_result(*result_code)
            ),
            Self::TimedOut => f.write_str("timed out waiting for upgrade result"),
            Self::Cancelled => f.write_str("wait cancelled"),
        }
    }
}

/// Point-in-time copy of the session state.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FotaSnapshot {
    /// URL of the current or last upgrade.
    pub url: Option<String>,
    /// Reset mode of the current or last upgrade.
    pub mode: ResetMode,
    /// Download timeout of the current or last upgrade.
    pub timeout_secs: u32,
    /// Whether `END` has been seen.
    pub complete: bool,
    /// Last `END` code, [`RESULT_UNKNOWN`] until then.
    pub result_code: i32,
    /// Last reported percentage.
    pub progress: Option<u32>,
    /// Current phase.
    pub phase: UpgradePhase,
    /// Boot markers seen while the upgrade was active.
    pub boot_events: u32,
}

#[derive(Debug)]
struct SessionState {
    url: Option<String>,
    mode: ResetMode,
    timeout_secs: u32,
    complete: bool,
    result_code: i32,
    progress: Option<u32>,
    phase: UpgradePhase,
    boot_events: u32,
    /// `END` recorded but the observer has not seen it yet.
    reporting: bool,
    closed: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            url: None,
            mode: ResetMode::Manual,
            timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            complete: false,
            result_code: RESULT_UNKNOWN,
            progress: None,
            phase: UpgradePhase::Idle,
            boot_events: 0,
            reporting: false,
            closed: false,
        }
    }
}

/// Upgrade state shared between the reader thread and the caller.
#[derive(Default)]
pub struct FotaSession {
    state: Mutex<SessionState>,
    done: Condvar,
    observer: Mutex<Option<ProgressObserver>>,
}

impl fmt::Debug for FotaSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FotaSession")
            .field("state", &*self.lock())
            .finish_non_exhaustive()
    }
}

impl FotaSession {
    /// Create an idle session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for a new upgrade and enter [`UpgradePhase::Preflight`].
    pub fn begin(&self, request: &UpgradeRequest, observer: Option<ProgressObserver>) {
        *self
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = observer;

        let mut state = self.lock();
        let closed = state.closed;
        *state = SessionState {
            url: Some(
                request
                    .url
                    .clone(),
            ),
            mode: request.mode,
            timeout_secs: request.timeout_secs,
            phase: UpgradePhase::Preflight,
            closed,
            ..SessionState::default()
        };
    }

    /// Move to `phase` without touching the result.
    ///
    /// Once `END` has been recorded the phase is final until the next
    /// [`FotaSession::begin`].
    pub fn set_phase(&self, phase: UpgradePhase) {
        let mut state = self.lock();
        if state.complete {
            debug!("FOTA already finished as {:?}, keeping it over {phase:?}", state.phase);
            return;
        }
        debug!("FOTA phase {:?} -> {phase:?}", state.phase);
        state.phase = phase;
    }

    /// Current phase.
    pub fn phase(&self) -> UpgradePhase {
        self.lock()
            .phase
    }

    /// Apply one notification.
    ///
    /// Only `UPDATING` and `END` change state, and only once `AT+QFOTADL`
    /// has gone out (or after an earlier `END`, so a repeated one is still
    /// recorded). Anything else is logged. Called on the reader thread.
    pub fn handle(&self, urc: &Urc) {
        let event = {
            let mut state = self.lock();
            let submitted = state.complete
                || matches!(
                    state.phase,
                    UpgradePhase::AwaitingDownload | UpgradePhase::InProgress
                );
            match *urc {
                Urc::Updating { .. } | Urc::End { .. } if !submitted => {
                    debug!("Ignoring {urc} while {:?}", state.phase);
                    None
                }
                Urc::Updating { percent } => {
                    state.progress = Some(percent);
                    if !state.complete {
                        state.phase = UpgradePhase::InProgress;
                    }
                    info!("FOTA progress: {percent}%");
                    Some(FotaEvent::Updating(percent))
                }
                Urc::End { result_code } => {
                    state.complete = true;
                    state.reporting = true;
                    state.result_code = result_code;
                    if result_code == 0 {
                        state.phase = UpgradePhase::Succeeded;
                        info!("FOTA finished successfully");
                    } else {
                        state.phase = UpgradePhase::Failed;
                        error!(
                            "FOTA finished with code {result_code}: {}",
                            codes::describe_fota_result(result_code)
                        );
                    }
                    Some(FotaEvent::End(result_code))
                }
                Urc::Generic { ref raw } => {
                    info!("URC: {raw}");
                    None
                }
                Urc::BootEvent { ref raw } => {
                    if state
                        .phase
                        .is_active()
                    {
                        state.boot_events += 1;
                    }
                    info!("Boot event: {raw}");
                    None
                }
            }
        };

        if let Some(event) = event {
            let mut observer = self
                .observer
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(callback) = observer.as_mut() {
                callback(&event);
            }
            drop(observer);
            // Waiters wake after the observer has seen END
            if matches!(event, FotaEvent::End(_)) {
                self.lock()
                    .reporting = false;
                self.done
                    .notify_all();
            }
        }
    }

    /// Block until `END`, `max_wait` elapses, the session is closed, or the
    /// host asks to stop.
    ///
    /// Never changes session state; an `END` arriving later is still
    /// recorded.
    pub fn wait_for_completion(&self, max_wait: Duration) -> FotaOutcome {
        let deadline = Instant::now() + max_wait;
        let mut state = self.lock();
        loop {
            if state.complete && !state.reporting {
                return if state.result_code == 0 {
                    FotaOutcome::Succeeded
                } else {
                    FotaOutcome::Failed {
                        result_code: state.result_code,
                    }
                };
            }
            if state.closed || is_interrupted_requested() {
                return FotaOutcome::Cancelled;
            }

            let now = Instant::now();
            if now >= deadline {
                return FotaOutcome::TimedOut;
            }

            state = self
                .done
                .wait_timeout(state, (deadline - now).min(WAIT_SLICE))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> FotaSnapshot {
        let state = self.lock();
        FotaSnapshot {
            url: state
                .url
                .clone(),
            mode: state.mode,
            timeout_secs: state.timeout_secs,
            complete: state.complete,
            result_code: state.result_code,
            progress: state.progress,
            phase: state.phase,
            boot_events: state.boot_events,
        }
    }

    /// Wake every waiter with [`FotaOutcome::Cancelled`].
    pub fn close(&self) {
        self.lock()
            .closed = true;
        self.done
            .notify_all();
    }

    /// Allow waiting again after a reconnect.
    pub fn reopen(&self) {
        self.lock()
            .closed = false;
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
