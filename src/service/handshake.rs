//! Startup handshake with the espanso daemon.
//!
//! Two phases, run in order:
//! 1. CLI availability (`--version`), installing once if allowed
//! 2. Daemon status (`status`), starting it detached if allowed
//!
//! A failed start is remembered in the [`StatusCache`] so that dashboard
//! refreshes inside the retry window neither poll nor re-launch the daemon.
//! The window itself belongs to the cache.

use super::{Installer, Report, StatusCache, StepOutcome, StepStatus};
use crate::cli::{CommandExecutor, DetachedProcess, PROBE_TIMEOUT};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const CLI_STEP_LABEL: &str = "Ensure Espanso CLI";
pub const SERVICE_STEP_LABEL: &str = "Espanso service running";

/// Appended to every start failure the user has to act on.
pub const MANUAL_START_HINT: &str = "run 'espanso start' manually";

const SUPPRESSED_DETAIL: &str = "Espanso service unavailable; start manually with 'espanso start'";

/// Handshake tuning.
#[derive(Debug, Clone)]
pub struct HandshakeOptions {
    /// Status polls after launching the daemon (at least 1)
    pub status_attempts: u32,
    /// Sleep between polls, not before the first
    pub status_delay: Duration,
    /// Timeout for `--version` and `status`
    pub probe_timeout: Duration,
}

impl Default for HandshakeOptions {
    fn default() -> Self {
        Self {
            status_attempts: 3,
            status_delay: Duration::from_secs(2),
            probe_timeout: PROBE_TIMEOUT,
        }
    }
}

pub struct ServiceHandshake {
    cli: Arc<dyn CommandExecutor>,
    cache: Arc<StatusCache>,
    installer: Arc<dyn Installer>,
    options: HandshakeOptions,
    last_report: Mutex<Vec<StepOutcome>>,
    /// Most recent `espanso start`, kept until the next one replaces it
    launched: Mutex<Option<DetachedProcess>>,
}

impl ServiceHandshake {
    pub fn new(
        cli: Arc<dyn CommandExecutor>,
        cache: Arc<StatusCache>,
        installer: Arc<dyn Installer>,
        mut options: HandshakeOptions,
    ) -> Self {
        options.status_attempts = options.status_attempts.max(1);
        Self {
            cli,
            cache,
            installer,
            options,
            last_report: Mutex::new(Vec::new()),
            launched: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &Arc<StatusCache> {
        &self.cache
    }

    pub fn options(&self) -> &HandshakeOptions {
        &self.options
    }

    /// PID of the last `espanso start` this handshake launched.
    pub fn launched_pid(&self) -> Option<u32> {
        self.launched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(DetachedProcess::pid)
    }

    /// Run both phases once, installing and starting as needed.
    ///
    /// Meant for application startup. The returned steps also replace
    /// [`last_report`](Self::last_report).
    pub fn ensure_service_ready(&self) -> Vec<StepOutcome> {
        info!("Running espanso service handshake");

        let cli_step = StepOutcome::new(CLI_STEP_LABEL, self.report_cli_status(true));
        log_step(&cli_step);

        let service_step = StepOutcome::new(SERVICE_STEP_LABEL, self.report_service_status(true));
        log_step(&service_step);

        let steps = vec![cli_step, service_step];
        *self
            .last_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = steps.clone();
        steps
    }

    /// Steps of the most recent [`ensure_service_ready`](Self::ensure_service_ready).
    pub fn last_report(&self) -> Vec<StepOutcome> {
        self.last_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Phase A: is the CLI callable?
    pub fn report_cli_status(&self, install_if_missing: bool) -> Report {
        let result = self
            .cli
            .execute(&["--version"], self.options.probe_timeout, None);

        if result.success() {
            let version = result.stdout.trim();
            return Report::success(if version.is_empty() {
                "Espanso CLI ready"
            } else {
                version
            });
        }

        let detail = result.error_output().to_string();
        if install_if_missing {
            return self.install_cli(&detail);
        }

        Report::warning(if detail.is_empty() {
            "Espanso CLI unavailable".to_string()
        } else {
            detail
        })
    }

    fn install_cli(&self, detail: &str) -> Report {
        if !self.cache.begin_install() {
            return Report::error(if detail.is_empty() {
                "Espanso installer already attempted"
            } else {
                detail
            });
        }

        if !self.installer.supported() {
            return Report::error("Auto-install supported only on Windows");
        }

        let installer = match self.installer.download() {
            Ok(path) => path,
            Err(e) => return Report::error(format!("Failed to download installer: {}", e)),
        };

        let result = self.installer.run(&installer);
        if !result.success() {
            let output = result.error_output();
            let message = if output.is_empty() {
                format!("Exit code {}", result.exit_code)
            } else {
                output.to_string()
            };
            return Report::error(format!("Espanso installer failed: {}", message));
        }

        let name = installer
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Report::success(format!("Installer executed ({})", name))
    }

    /// Phase B: is the daemon running?
    pub fn report_service_status(&self, start_if_missing: bool) -> Report {
        let result = self.cli.execute(&["status"], self.options.probe_timeout, None);
        self.cache.record_status(&result);

        if result.reports_running() {
            self.cache.mark_ready();
            let output = result.combined_output();
            return Report::success(if output.is_empty() {
                "Espanso running"
            } else {
                output
            });
        }

        if start_if_missing {
            return self.start_service();
        }

        if self.cache.should_skip_status_checks() {
            return Report::warning(SUPPRESSED_DETAIL);
        }

        let output = result.combined_output();
        Report::warning(if output.is_empty() {
            "Espanso service not running"
        } else {
            output
        })
    }

    fn start_service(&self) -> Report {
        if self.cache.is_ready() {
            return Report::success("Espanso daemon already running");
        }

        if self.cache.should_skip_status_checks() {
            debug!("Start suppressed: previous start failed inside the retry window");
            return Report::warning(SUPPRESSED_DETAIL);
        }

        info!("Starting espanso daemon");
        match self.cli.execute_detached(&["start"], None) {
            Ok(process) => {
                let mut launched = self
                    .launched
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Some(previous) = launched.as_mut() {
                    if let Some(code) = previous.try_exit_code() {
                        debug!("Previous start (PID {}) exited with {}", previous.pid(), code);
                    }
                }
                *launched = Some(process);
            }
            Err(e) => {
                self.cache.record_start_failure();
                return Report::error(format!(
                    "Failed to start Espanso: {}; {}",
                    e, MANUAL_START_HINT
                ));
            }
        }

        if self.wait_for_running() {
            self.cache.mark_ready();
            return Report::success("Espanso daemon started");
        }

        self.cache.record_start_failure();
        Report::error(format!("Service failed to start; {}", MANUAL_START_HINT))
    }

    /// Poll `status` sequentially until it reports running or attempts run out.
    fn wait_for_running(&self) -> bool {
        for attempt in 0..self.options.status_attempts {
            if attempt > 0 && !self.options.status_delay.is_zero() {
                thread::sleep(self.options.status_delay);
            }

            let result = self.cli.execute(&["status"], self.options.probe_timeout, None);
            self.cache.record_status(&result);

            if result.reports_running() {
                debug!("Daemon reported running after {} poll(s)", attempt + 1);
                return true;
            }
        }
        false
    }
}

fn log_step(step: &StepOutcome) {
    match step.status {
        StepStatus::Success => info!("[handshake] {}", step),
        StepStatus::Warning => warn!("[handshake] {}", step),
        StepStatus::Error => error!("[handshake] {}", step),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::CommandResult;
    use crate::error::{CompanionError, Result};
    use crate::service::testing::FakeEspanso;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeInstaller {
        supported: bool,
        download_ok: bool,
        exit_code: i32,
        downloads: AtomicUsize,
    }

    impl FakeInstaller {
        fn unsupported() -> Self {
            Self::new(false, true, 0)
        }

        fn new(supported: bool, download_ok: bool, exit_code: i32) -> Self {
            Self {
                supported,
                download_ok,
                exit_code,
                downloads: AtomicUsize::new(0),
            }
        }
    }

    impl Installer for FakeInstaller {
        fn supported(&self) -> bool {
            self.supported
        }

        fn download(&self) -> Result<PathBuf> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            if self.download_ok {
                Ok(PathBuf::from("/tmp/espanso-setup.exe"))
            } else {
                Err(CompanionError::InstallFailed("HTTP 404".into()))
            }
        }

        fn run(&self, _installer: &Path) -> CommandResult {
            CommandResult::new(self.exit_code, "", "")
        }
    }

    fn options(attempts: u32) -> HandshakeOptions {
        HandshakeOptions {
            status_attempts: attempts,
            status_delay: Duration::ZERO,
            probe_timeout: Duration::from_secs(5),
        }
    }

    fn handshake(
        fake: &Arc<FakeEspanso>,
        installer: FakeInstaller,
        opts: HandshakeOptions,
    ) -> ServiceHandshake {
        with_window(fake, installer, opts, Duration::from_secs(60))
    }

    fn with_window(
        fake: &Arc<FakeEspanso>,
        installer: FakeInstaller,
        opts: HandshakeOptions,
        window: Duration,
    ) -> ServiceHandshake {
        let cache = Arc::new(StatusCache::new(Duration::from_secs(10), window));
        ServiceHandshake::new(fake.clone(), cache, Arc::new(installer), opts)
    }

    #[test]
    fn test_cli_present_reports_version() {
        let fake = Arc::new(FakeEspanso::new(true, true, true));
        let hs = handshake(&fake, FakeInstaller::unsupported(), options(3));

        let report = hs.report_cli_status(false);
        assert_eq!(report, Report::success("espanso 2.2.1"));
    }

    #[test]
    fn test_cli_missing_without_install_is_warning() {
        let fake = Arc::new(FakeEspanso::new(false, false, false));
        let hs = handshake(&fake, FakeInstaller::unsupported(), options(3));

        let report = hs.report_cli_status(false);
        assert_eq!(report.status, StepStatus::Warning);
        assert_eq!(report.detail, "espanso: executable not found");
        assert!(!hs.cache().install_attempted());
    }

    #[test]
    fn test_install_unsupported_platform() {
        let fake = Arc::new(FakeEspanso::new(false, false, false));
        let hs = handshake(&fake, FakeInstaller::unsupported(), options(3));

        let report = hs.report_cli_status(true);
        assert_eq!(report, Report::error("Auto-install supported only on Windows"));
        assert!(hs.cache().install_attempted());
    }

    #[test]
    fn test_install_attempted_only_once() {
        let fake = Arc::new(FakeEspanso::new(false, false, false));
        let installer = Arc::new(FakeInstaller::new(true, false, 0));
        let cache = Arc::new(StatusCache::default());
        let hs = ServiceHandshake::new(
            fake.clone(),
            cache,
            installer.clone(),
            options(3),
        );

        let first = hs.report_cli_status(true);
        assert_eq!(first.status, StepStatus::Error);
        assert!(first.detail.starts_with("Failed to download installer"));

        let second = hs.report_cli_status(true);
        assert_eq!(second.status, StepStatus::Error);
        assert_eq!(second.detail, "espanso: executable not found");
        assert_eq!(installer.downloads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_install_nonzero_exit() {
        let fake = Arc::new(FakeEspanso::new(false, false, false));
        let hs = handshake(&fake, FakeInstaller::new(true, true, 2), options(3));

        let report = hs.report_cli_status(true);
        assert_eq!(report, Report::error("Espanso installer failed: Exit code 2"));
    }

    #[test]
    fn test_install_success_names_installer() {
        let fake = Arc::new(FakeEspanso::new(false, false, false));
        let hs = handshake(&fake, FakeInstaller::new(true, true, 0), options(3));

        let report = hs.report_cli_status(true);
        assert_eq!(report, Report::success("Installer executed (espanso-setup.exe)"));
    }

    #[test]
    fn test_running_daemon_skips_start() {
        let fake = Arc::new(FakeEspanso::new(true, false, true));
        fake.respond(&["status"], CommandResult::new(0, "Espanso running", ""));
        let hs = handshake(&fake, FakeInstaller::unsupported(), options(3));

        let report = hs.report_service_status(true);
        assert_eq!(report, Report::success("Espanso running"));
        assert_eq!(fake.starts(), 0);
        assert!(hs.cache().is_ready());
    }

    #[test]
    fn test_ensure_ready_twice_starts_once() {
        let fake = Arc::new(FakeEspanso::new(true, true, true));
        let hs = handshake(&fake, FakeInstaller::unsupported(), options(3));

        let first = hs.ensure_service_ready();
        let second = hs.ensure_service_ready();
        assert!(first.iter().all(|s| s.status == StepStatus::Success));
        assert!(second.iter().all(|s| s.status == StepStatus::Success));
        assert_eq!(fake.starts(), 0);
    }

    #[test]
    fn test_start_once_when_requested() {
        let fake = Arc::new(FakeEspanso::new(true, false, true));
        let hs = handshake(&fake, FakeInstaller::unsupported(), options(3));

        assert_eq!(hs.launched_pid(), None);
        let first = hs.report_service_status(true);
        assert_eq!(first, Report::success("Espanso daemon started"));
        assert_eq!(fake.starts(), 1);
        assert_eq!(hs.launched_pid(), Some(4242));

        let second = hs.report_service_status(true);
        assert_eq!(second.status, StepStatus::Success);
        assert_eq!(fake.starts(), 1);
    }

    #[test]
    fn test_status_without_start_is_warning() {
        let fake = Arc::new(FakeEspanso::new(true, false, true));
        let hs = handshake(&fake, FakeInstaller::unsupported(), options(3));

        let report = hs.report_service_status(false);
        assert_eq!(report, Report::warning("espanso is not running"));
        assert_eq!(fake.starts(), 0);
    }

    #[test]
    fn test_failed_start_polls_each_attempt() {
        let fake = Arc::new(FakeEspanso::new(true, false, false));
        let hs = handshake(&fake, FakeInstaller::unsupported(), options(4));

        let report = hs.report_service_status(true);
        assert_eq!(report.status, StepStatus::Error);
        assert!(report.detail.contains(MANUAL_START_HINT));
        // One initial check plus four polls
        assert_eq!(fake.status_count(), 5);
        assert!(hs.cache().should_skip_status_checks());
    }

    #[test]
    fn test_failed_start_suppressed_then_retried_after_window() {
        let fake = Arc::new(FakeEspanso::new(true, false, false));
        let hs = with_window(
            &fake,
            FakeInstaller::unsupported(),
            options(3),
            Duration::from_millis(150),
        );
        assert_eq!(hs.cache().retry_window(), Duration::from_millis(150));

        assert_eq!(hs.report_service_status(true).status, StepStatus::Error);
        assert_eq!(fake.starts(), 1);

        // Inside the window: warning, no new start
        let suppressed = hs.report_service_status(true);
        assert_eq!(suppressed.status, StepStatus::Warning);
        assert!(suppressed.detail.contains("start manually"));
        let passive = hs.report_service_status(false);
        assert_eq!(passive.status, StepStatus::Warning);
        assert!(passive.detail.contains("start manually"));
        assert_eq!(fake.starts(), 1);

        thread::sleep(Duration::from_millis(200));

        // Window elapsed: a new start is allowed
        assert_eq!(hs.report_service_status(true).status, StepStatus::Error);
        assert_eq!(fake.starts(), 2);
    }

    #[test]
    fn test_cli_absent_scenario() {
        let fake = Arc::new(FakeEspanso::new(false, false, false));
        let hs = handshake(&fake, FakeInstaller::unsupported(), options(3));

        let steps = hs.ensure_service_ready();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].label, CLI_STEP_LABEL);
        assert_eq!(steps[0].status, StepStatus::Error);
        assert_eq!(steps[1].label, SERVICE_STEP_LABEL);
        assert_eq!(steps[1].status, StepStatus::Error);
        assert!(steps[1].detail.contains(MANUAL_START_HINT));
        assert_eq!(hs.last_report(), steps);
        assert!(hs.cache().should_skip_status_checks());
    }

    #[test]
    fn test_cli_absent_with_successful_install() {
        let fake = Arc::new(FakeEspanso::new(false, false, false));
        let hs = handshake(&fake, FakeInstaller::new(true, true, 0), options(3));

        let steps = hs.ensure_service_ready();
        assert_eq!(steps[0].status, StepStatus::Success);
        // The fake never becomes installed, so the start still fails
        assert_eq!(steps[1].status, StepStatus::Error);
    }

    #[test]
    fn test_phase_a_runs_before_phase_b() {
        let fake = Arc::new(FakeEspanso::new(true, true, true));
        let hs = handshake(&fake, FakeInstaller::unsupported(), options(3));

        hs.ensure_service_ready();
        let calls = fake.call_log();
        assert_eq!(calls[0], vec!["--version".to_string()]);
        assert_eq!(calls[1], vec!["status".to_string()]);
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let fake = Arc::new(FakeEspanso::new(true, false, true));
        let hs = handshake(&fake, FakeInstaller::unsupported(), options(0));
        assert_eq!(hs.options().status_attempts, 1);
        assert_eq!(hs.report_service_status(true).status, StepStatus::Success);
    }
}
