//! Shared readiness state and the cached `status` result.
//!
//! One mutex guards the whole [`ServiceState`]. Callers run the CLI first
//! and only then take the lock to record what happened; the lock is never
//! held across a command.

use crate::cli::CommandResult;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

/// How long a `status` result is served without asking the CLI again.
pub const DEFAULT_STATUS_TTL: Duration = Duration::from_secs(10);

/// stderr of the synthetic snapshot served before any `status` ran.
pub const UNAVAILABLE_STATUS: &str = "Espanso status unavailable";

#[derive(Debug, Clone)]
struct CachedStatus {
    result: CommandResult,
    at: Instant,
}

/// Readiness bookkeeping for the lifetime of the process.
#[derive(Debug, Clone, Default)]
pub struct ServiceState {
    pub service_ready: bool,
    /// Flips to true at most once per process
    pub install_attempted: bool,
    /// Set when the last start attempt failed
    pub start_failed_at: Option<Instant>,
    last_status: Option<CachedStatus>,
}

impl ServiceState {
    pub fn start_failed(&self) -> bool {
        self.start_failed_at.is_some()
    }

    pub fn last_status(&self) -> Option<&CommandResult> {
        self.last_status.as_ref().map(|cached| &cached.result)
    }
}

pub struct StatusCache {
    state: Mutex<ServiceState>,
    ttl: Duration,
    retry_window: Duration,
}

impl StatusCache {
    pub fn new(ttl: Duration, retry_window: Duration) -> Self {
        Self {
            state: Mutex::new(ServiceState::default()),
            ttl,
            retry_window,
        }
    }

    fn state(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn retry_window(&self) -> Duration {
        self.retry_window
    }

    /// Copy of the current state, for reporting.
    pub fn state_snapshot(&self) -> ServiceState {
        self.state().clone()
    }

    /// Remember the latest raw `status` output.
    pub fn record_status(&self, result: &CommandResult) {
        self.state().last_status = Some(CachedStatus {
            result: result.trimmed(),
            at: Instant::now(),
        });
    }

    /// The cached result if it is younger than the TTL.
    pub fn fresh_status(&self) -> Option<CommandResult> {
        let state = self.state();
        state
            .last_status
            .as_ref()
            .filter(|cached| cached.at.elapsed() < self.ttl)
            .map(|cached| cached.result.clone())
    }

    /// Last cached result regardless of age, or a synthetic failure.
    pub fn status_snapshot(&self) -> CommandResult {
        self.state()
            .last_status()
            .cloned()
            .unwrap_or_else(|| CommandResult::failure(UNAVAILABLE_STATUS))
    }

    /// True while a recorded start failure is inside the retry window.
    ///
    /// Callers serve [`status_snapshot`](Self::status_snapshot) instead of
    /// invoking the CLI while this holds.
    pub fn should_skip_status_checks(&self) -> bool {
        self.state()
            .start_failed_at
            .is_some_and(|at| at.elapsed() < self.retry_window)
    }

    pub fn is_ready(&self) -> bool {
        self.state().service_ready
    }

    /// The daemon reported running: ready, and any failure is forgotten.
    pub fn mark_ready(&self) {
        let mut state = self.state();
        state.service_ready = true;
        state.start_failed_at = None;
    }

    pub fn record_start_failure(&self) {
        let mut state = self.state();
        state.start_failed_at = Some(Instant::now());
        debug!(
            "Recorded start failure; suppressing start attempts for {:?}",
            self.retry_window
        );
    }

    /// Claim the single install attempt. Returns false if it was already used.
    pub fn begin_install(&self) -> bool {
        let mut state = self.state();
        if state.install_attempted {
            return false;
        }
        state.install_attempted = true;
        true
    }

    pub fn install_attempted(&self) -> bool {
        self.state().install_attempted
    }
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new(DEFAULT_STATUS_TTL, Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_snapshot_before_any_status() {
        let cache = StatusCache::default();
        let snapshot = cache.status_snapshot();
        assert_eq!(snapshot.exit_code, 1);
        assert_eq!(snapshot.stdout, "");
        assert_eq!(snapshot.stderr, UNAVAILABLE_STATUS);
        assert!(cache.fresh_status().is_none());
    }

    #[test]
    fn test_record_status_is_trimmed_and_fresh() {
        let cache = StatusCache::default();
        cache.record_status(&CommandResult::new(0, "espanso is running\n", ""));

        let fresh = cache.fresh_status().unwrap();
        assert_eq!(fresh.stdout, "espanso is running");
        assert_eq!(cache.status_snapshot(), fresh);
    }

    #[test]
    fn test_status_expires_after_ttl() {
        let cache = StatusCache::new(Duration::from_millis(50), Duration::from_secs(60));
        cache.record_status(&CommandResult::new(0, "running", ""));
        assert!(cache.fresh_status().is_some());

        thread::sleep(Duration::from_millis(80));
        assert!(cache.fresh_status().is_none());
        // The snapshot outlives the TTL
        assert_eq!(cache.status_snapshot().stdout, "running");
    }

    #[test]
    fn test_skip_only_inside_retry_window() {
        let cache = StatusCache::new(DEFAULT_STATUS_TTL, Duration::from_millis(60));
        assert!(!cache.should_skip_status_checks());

        cache.record_start_failure();
        assert!(cache.should_skip_status_checks());

        thread::sleep(Duration::from_millis(90));
        assert!(!cache.should_skip_status_checks());
        assert!(cache.state_snapshot().start_failed());
    }

    #[test]
    fn test_mark_ready_clears_failure() {
        let cache = StatusCache::default();
        cache.record_start_failure();
        cache.mark_ready();

        let state = cache.state_snapshot();
        assert!(state.service_ready);
        assert!(!state.start_failed());
        assert!(!cache.should_skip_status_checks());
    }

    #[test]
    fn test_install_claimed_once() {
        let cache = StatusCache::default();
        assert!(!cache.install_attempted());
        assert!(cache.begin_install());
        assert!(!cache.begin_install());
        assert!(cache.install_attempted());
    }
}
