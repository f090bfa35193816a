//! Application context.
//!
//! Built once at startup and passed to whatever serves the UI. It owns the
//! shared readiness state and the optional suggestion and refresh
//! collaborators, so there are no process-wide singletons.

use crate::cli::{CliRunner, CommandExecutor, CommandResult};
use crate::config::Config;
use crate::refresh::{DebouncedRefresh, EventRecord, FileEvent, SnippetReloader};
use crate::service::{
    ConnectionDiagnostics, Installer, ServiceControl, ServiceHandshake, StatusCache, StepOutcome,
    WindowsInstaller,
};
use crate::suggestions::{PendingStore, SuggestionHub, SuggestionQueue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// What the dashboard shows about the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStatus {
    pub connected: bool,
    /// "Connected" or "CLI unavailable"
    pub status_message: String,
    pub cli_status: String,
    /// Served from the snapshot because a recent start failed
    pub skipped: bool,
    /// Served from the TTL cache
    pub from_cache: bool,
}

impl DashboardStatus {
    fn from_result(result: &CommandResult, skipped: bool, from_cache: bool) -> Self {
        let connected = result.success();
        let output = result.combined_output();
        Self {
            connected,
            status_message: if connected { "Connected" } else { "CLI unavailable" }.to_string(),
            cli_status: if output.is_empty() { "Ready" } else { output }.to_string(),
            skipped,
            from_cache,
        }
    }
}

pub struct AppContext {
    config: Config,
    cli: Arc<dyn CommandExecutor>,
    cache: Arc<StatusCache>,
    handshake: Arc<ServiceHandshake>,
    diagnostics: ConnectionDiagnostics,
    control: ServiceControl,
    suggestions: Option<SuggestionHub>,
    refresh: Option<DebouncedRefresh>,
}

impl AppContext {
    /// Wire the real espanso CLI and installer. Pending suggestions persist
    /// in the data directory when one can be determined.
    pub fn new(config: Config) -> Self {
        let cli = Arc::new(CliRunner::new(config.cli.executable.as_deref()));
        let mut queue = SuggestionQueue::new();
        match Config::data_dir() {
            Ok(dir) => queue = queue.with_persistence(PendingStore::in_dir(&dir)),
            Err(e) => warn!("Pending suggestions will not persist: {}", e),
        }
        let hub = SuggestionHub::new(None, Arc::new(queue), config.suggestions.clone());
        Self::with_parts(config, cli, Arc::new(WindowsInstaller::new())).with_suggestions(hub)
    }

    pub fn with_parts(
        config: Config,
        cli: Arc<dyn CommandExecutor>,
        installer: Arc<dyn Installer>,
    ) -> Self {
        let options = config.handshake_options();
        let cache = Arc::new(StatusCache::new(
            config.service.status_ttl(),
            config.service.retry_window(),
        ));
        let handshake = Arc::new(ServiceHandshake::new(
            cli.clone(),
            cache.clone(),
            installer,
            options,
        ));
        let diagnostics = ConnectionDiagnostics::new(
            handshake.clone(),
            cli.clone(),
            config.service.connection_ttl(),
        );
        let control = ServiceControl::new(cli.clone(), config.cli.command_timeout());
        // In-memory until a persistent hub replaces it
        let suggestions = SuggestionHub::new(
            None,
            Arc::new(SuggestionQueue::new()),
            config.suggestions.clone(),
        );

        Self {
            config,
            cli,
            cache,
            handshake,
            diagnostics,
            control,
            suggestions: Some(suggestions),
            refresh: None,
        }
    }

    pub fn with_suggestions(mut self, hub: SuggestionHub) -> Self {
        self.suggestions = Some(hub);
        self
    }

    /// Debounce snippet reloads by the `[watcher]` quiet period.
    pub fn with_watcher(self, runtime: Handle, reloader: Arc<dyn SnippetReloader>) -> Self {
        let refresh = DebouncedRefresh::new(runtime, self.config.watcher.debounce(), reloader);
        self.with_refresh(refresh)
    }

    pub fn with_refresh(mut self, refresh: DebouncedRefresh) -> Self {
        self.refresh = Some(refresh);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn status_cache(&self) -> &Arc<StatusCache> {
        &self.cache
    }

    pub fn handshake(&self) -> &Arc<ServiceHandshake> {
        &self.handshake
    }

    pub fn control(&self) -> &ServiceControl {
        &self.control
    }

    pub fn suggestions(&self) -> Option<&SuggestionHub> {
        self.suggestions.as_ref()
    }

    /// Run the startup handshake once and seed the connection diagnostics
    /// with its outcome. Starts the suggestion engine if enabled.
    pub fn startup(&self) -> Vec<StepOutcome> {
        let steps = self.handshake.ensure_service_ready();
        self.diagnostics.seed(steps.clone());

        if let Some(hub) = &self.suggestions {
            let settings = hub.settings();
            if settings.enabled && hub.available() {
                if let Err(e) = hub.start(settings) {
                    warn!("Suggestions disabled for this session: {}", e);
                }
            }
        }
        steps
    }

    /// Daemon status for a dashboard refresh.
    ///
    /// Serves the snapshot while a start failure is being suppressed, the
    /// cached result while it is fresh, and only otherwise asks the CLI.
    pub fn dashboard_status(&self) -> DashboardStatus {
        if self.cache.should_skip_status_checks() {
            debug!("Start failure suppression active; serving status snapshot");
            return DashboardStatus::from_result(&self.cache.status_snapshot(), true, false);
        }

        if let Some(cached) = self.cache.fresh_status() {
            return DashboardStatus::from_result(&cached, false, true);
        }

        let result = self
            .cli
            .execute(&["status"], self.config.cli.probe_timeout(), None);
        self.cache.record_status(&result);
        DashboardStatus::from_result(&result.trimmed(), false, false)
    }

    /// Connection checks, reused while a recent run is still verified.
    pub fn connection_steps(&self) -> Vec<StepOutcome> {
        self.diagnostics.run()
    }

    /// Forward a watcher event to the debounced refresh, if wired.
    pub fn on_file_event(&self, event: &FileEvent) {
        if let Some(refresh) = &self.refresh {
            refresh.on_file_event(event);
        }
    }

    pub fn recent_events(&self) -> Vec<EventRecord> {
        self.refresh
            .as_ref()
            .map(|refresh| refresh.recent_events())
            .unwrap_or_default()
    }

    /// Stop companion-owned background work. The espanso daemon is left
    /// running.
    pub fn shutdown(&self) {
        info!("Shutting down (espanso service will remain running)");
        if let Some(hub) = &self.suggestions {
            hub.stop();
        }
        if let Some(refresh) = &self.refresh {
            refresh.cancel();
        }
    }
}
