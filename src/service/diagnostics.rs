//! Connection re-checks for dashboard refreshes.
//!
//! Unlike the startup handshake these never install or start anything, and
//! a run whose critical steps did not error is reused for `ttl`.

use super::{
    Report, ServiceHandshake, StepOutcome, StepStatus, CLI_STEP_LABEL, SERVICE_STEP_LABEL,
};
use crate::cli::CommandExecutor;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

pub const VERSION_STEP_LABEL: &str = "Check Espanso version";

/// Default reuse window for a verified run.
pub const DEFAULT_CONNECTION_TTL: Duration = Duration::from_secs(30);

#[derive(Default)]
struct DiagnosticsState {
    steps: Vec<StepOutcome>,
    verified_at: Option<Instant>,
}

pub struct ConnectionDiagnostics {
    handshake: Arc<ServiceHandshake>,
    cli: Arc<dyn CommandExecutor>,
    ttl: Duration,
    state: Mutex<DiagnosticsState>,
}

impl ConnectionDiagnostics {
    pub fn new(handshake: Arc<ServiceHandshake>, cli: Arc<dyn CommandExecutor>, ttl: Duration) -> Self {
        Self {
            handshake,
            cli,
            ttl,
            state: Mutex::new(DiagnosticsState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, DiagnosticsState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed with the startup handshake so the first refresh is not a re-run.
    pub fn seed(&self, steps: Vec<StepOutcome>) {
        let mut state = self.state();
        state.verified_at = critical_passed(&steps).then(Instant::now);
        state.steps = steps;
    }

    /// Steps of the last run, cached or not.
    pub fn last_steps(&self) -> Vec<StepOutcome> {
        self.state().steps.clone()
    }

    pub fn is_fresh(&self) -> bool {
        self.state()
            .verified_at
            .is_some_and(|at| at.elapsed() < self.ttl)
    }

    /// Re-check CLI and daemon, or return the cached steps while fresh.
    pub fn run(&self) -> Vec<StepOutcome> {
        if self.is_fresh() {
            debug!("Connection verified recently; reusing diagnostics");
            return self.last_steps();
        }

        let steps = vec![
            StepOutcome::new(CLI_STEP_LABEL, self.handshake.report_cli_status(false)),
            StepOutcome::new(SERVICE_STEP_LABEL, self.handshake.report_service_status(false)),
            StepOutcome::new(VERSION_STEP_LABEL, self.check_version()),
        ];

        let mut state = self.state();
        if critical_passed(&steps) {
            state.verified_at = Some(Instant::now());
        }
        state.steps = steps.clone();
        steps
    }

    fn check_version(&self) -> Report {
        let result = self
            .cli
            .execute(&["--version"], self.handshake.options().probe_timeout, None);
        if result.success() {
            let version = result.stdout.trim();
            return Report::success(if version.is_empty() {
                "Espanso CLI ready"
            } else {
                version
            });
        }
        let detail = result.error_output();
        Report::error(if detail.is_empty() {
            "Espanso CLI missing"
        } else {
            detail
        })
    }
}

fn critical_passed(steps: &[StepOutcome]) -> bool {
    steps
        .iter()
        .filter(|s| s.label == CLI_STEP_LABEL || s.label == SERVICE_STEP_LABEL)
        .all(|s| s.status != StepStatus::Error)
}
