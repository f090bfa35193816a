//! Espanso service readiness.
//!
//! - `handshake`: CLI present → (install once) → daemon running → (start)
//! - `status_cache`: cached `status` output and start-failure suppression
//! - `diagnostics`: non-invasive connection re-checks with their own TTL
//! - `control`: one-shot passthroughs (autostart, restart, packages, ...)
//! - `installer`: the Windows download-and-run step

mod control;
mod diagnostics;
mod handshake;
mod installer;
mod status_cache;

pub use control::{DoctorReport, MatchOutcome, MatchStatus, PackageListing, PackageOp, ServiceControl};
pub use diagnostics::{ConnectionDiagnostics, DEFAULT_CONNECTION_TTL, VERSION_STEP_LABEL};
pub use handshake::{
    HandshakeOptions, ServiceHandshake, CLI_STEP_LABEL, MANUAL_START_HINT, SERVICE_STEP_LABEL,
};
pub use installer::{Installer, WindowsInstaller, INSTALLER_FILE_NAME, INSTALLER_URL};
pub use status_cache::{ServiceState, StatusCache, DEFAULT_STATUS_TTL, UNAVAILABLE_STATUS};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of one readiness step.
///
/// `Warning` means "not ready yet, retry later"; `Error` means an install or
/// start genuinely failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Warning,
    Error,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Success => write!(f, "success"),
            StepStatus::Warning => write!(f, "warning"),
            StepStatus::Error => write!(f, "error"),
        }
    }
}

/// The `{status, detail}` shape every readiness and control call returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub status: StepStatus,
    pub detail: String,
}

impl Report {
    pub fn new(status: StepStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn success(detail: impl Into<String>) -> Self {
        Self::new(StepStatus::Success, detail)
    }

    pub fn warning(detail: impl Into<String>) -> Self {
        Self::new(StepStatus::Warning, detail)
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self::new(StepStatus::Error, detail)
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

/// One labelled, timestamped step of a handshake or diagnostics run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub label: String,
    pub status: StepStatus,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl StepOutcome {
    pub fn new(label: impl Into<String>, report: Report) -> Self {
        Self {
            label: label.into(),
            status: report.status,
            detail: report.detail,
            timestamp: Utc::now(),
        }
    }
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} - {}", self.label, self.status, self.detail)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable espanso CLI used by the service tests.

    use crate::cli::{CommandExecutor, CommandResult, DetachedProcess};
    use crate::error::{CompanionError, Result};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fake daemon: `--version` succeeds when `installed`, `status` reports
    /// running once started (if `start_works`), `start` spawns only when
    /// `installed`.
    pub struct FakeEspanso {
        pub installed: AtomicBool,
        pub running: AtomicBool,
        pub start_works: AtomicBool,
        pub start_requests: AtomicUsize,
        pub status_checks: AtomicUsize,
        pub calls: Mutex<Vec<Vec<String>>>,
        pub responses: Mutex<Vec<(Vec<String>, CommandResult)>>,
    }

    impl FakeEspanso {
        pub fn new(installed: bool, running: bool, start_works: bool) -> Self {
            Self {
                installed: AtomicBool::new(installed),
                running: AtomicBool::new(running),
                start_works: AtomicBool::new(start_works),
                start_requests: AtomicUsize::new(0),
                status_checks: AtomicUsize::new(0),
                calls: Mutex::new(Vec::new()),
                responses: Mutex::new(Vec::new()),
            }
        }

        /// Fixed response for an exact argument list.
        pub fn respond(&self, args: &[&str], result: CommandResult) {
            let args = args.iter().map(|a| a.to_string()).collect();
            self.responses.lock().unwrap().push((args, result));
        }

        pub fn starts(&self) -> usize {
            self.start_requests.load(Ordering::SeqCst)
        }

        pub fn status_count(&self) -> usize {
            self.status_checks.load(Ordering::SeqCst)
        }

        pub fn call_log(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandExecutor for FakeEspanso {
        fn execute(&self, args: &[&str], _timeout: Duration, _cwd: Option<&Path>) -> CommandResult {
            let owned: Vec<String> = args.iter().map(|a| a.to_string()).collect();
            self.calls.lock().unwrap().push(owned.clone());

            if let Some((_, result)) = self
                .responses
                .lock()
                .unwrap()
                .iter()
                .find(|(expected, _)| *expected == owned)
            {
                return result.clone();
            }

            if !self.installed.load(Ordering::SeqCst) {
                return CommandResult::failure("espanso: executable not found");
            }

            match args {
                ["--version"] => CommandResult::new(0, "espanso 2.2.1\n", ""),
                ["status"] => {
                    self.status_checks.fetch_add(1, Ordering::SeqCst);
                    if self.running.load(Ordering::SeqCst) {
                        CommandResult::new(0, "Espanso running\n", "")
                    } else {
                        CommandResult::new(1, "espanso is not running\n", "")
                    }
                }
                _ => CommandResult::new(0, "ok", ""),
            }
        }

        fn execute_detached(&self, args: &[&str], _cwd: Option<&Path>) -> Result<DetachedProcess> {
            assert_eq!(args, ["start"]);
            self.start_requests.fetch_add(1, Ordering::SeqCst);
            if !self.installed.load(Ordering::SeqCst) {
                return Err(CompanionError::Unavailable(
                    "espanso start: executable not found".into(),
                ));
            }
            if self.start_works.load(Ordering::SeqCst) {
                self.running.store(true, Ordering::SeqCst);
            }
            Ok(DetachedProcess::untracked(4242))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_status_serializes_lowercase() {
        let json = serde_json::to_string(&StepStatus::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
    }

    #[test]
    fn test_step_outcome_from_report() {
        let step = StepOutcome::new("Ensure Espanso CLI", Report::error("missing"));
        assert_eq!(step.status, StepStatus::Error);
        assert_eq!(step.detail, "missing");
        assert_eq!(step.to_string(), "Ensure Espanso CLI: error - missing");
    }
}
