//! Debounced snippet reload after match/config file changes.
//!
//! Editors tend to write a file several times in a row, so each change only
//! re-arms a timer. The reload runs once the files have been quiet for the
//! debounce delay. The timer is a single tokio task: arming aborts the
//! previous task before spawning the next, so a burst never grows more than
//! one outstanding task.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

/// Capacity of the recent-events log.
pub const MAX_RECENT_EVENTS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
}

impl std::fmt::Display for FileEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileEventKind::Created => write!(f, "created"),
            FileEventKind::Modified => write!(f, "modified"),
            FileEventKind::Deleted => write!(f, "deleted"),
        }
    }
}

/// A change reported by the file watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
    pub is_directory: bool,
}

impl FileEvent {
    pub fn new(path: impl Into<PathBuf>, kind: FileEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
            is_directory: false,
        }
    }
}

/// Entry of the recent-events log shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub kind: FileEventKind,
    /// File name only, or "unknown"
    pub file: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&FileEvent> for EventRecord {
    fn from(event: &FileEvent) -> Self {
        Self {
            kind: event.kind,
            file: event
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unknown".to_string()),
            timestamp: Utc::now(),
        }
    }
}

/// Rebuilds the snippet cache.
pub trait SnippetReloader: Send + Sync {
    fn reload_snippets(&self) -> Result<()>;
}

impl<F> SnippetReloader for F
where
    F: Fn() -> Result<()> + Send + Sync,
{
    fn reload_snippets(&self) -> Result<()> {
        self()
    }
}

pub struct DebouncedRefresh {
    runtime: Handle,
    delay: Duration,
    reloader: Arc<dyn SnippetReloader>,
    recent: Mutex<VecDeque<EventRecord>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    reloads: Arc<AtomicUsize>,
}

impl DebouncedRefresh {
    pub fn new(runtime: Handle, delay: Duration, reloader: Arc<dyn SnippetReloader>) -> Self {
        Self {
            runtime,
            delay,
            reloader,
            recent: Mutex::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
            timer: Mutex::new(None),
            reloads: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Log the event now and push the reload back by the full delay.
    pub fn on_file_event(&self, event: &FileEvent) {
        {
            let mut recent = self.recent.lock().unwrap_or_else(|p| p.into_inner());
            recent.push_front(EventRecord::from(event));
            recent.truncate(MAX_RECENT_EVENTS);
        }
        debug!("File {}: {}", event.kind, event.path.display());

        let mut timer = self.timer();
        if let Some(previous) = timer.take() {
            previous.abort();
        }

        let delay = self.delay;
        let reloader = self.reloader.clone();
        let reloads = self.reloads.clone();
        *timer = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            reload(reloader, reloads).await;
        }));
    }

    /// Most recent first.
    pub fn recent_events(&self) -> Vec<EventRecord> {
        self.recent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Reloads that have run, successful or not.
    pub fn reload_count(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn is_armed(&self) -> bool {
        self.timer().as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Drop a pending reload without running it.
    pub fn cancel(&self) {
        if let Some(handle) = self.timer().take() {
            handle.abort();
            debug!("Pending snippet reload cancelled");
        }
    }
}

impl Drop for DebouncedRefresh {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Run the reload off the async workers; failures never reach the watcher.
async fn reload(reloader: Arc<dyn SnippetReloader>, reloads: Arc<AtomicUsize>) {
    let result = tokio::task::spawn_blocking(move || reloader.reload_snippets()).await;
    reloads.fetch_add(1, Ordering::SeqCst);

    match result {
        Ok(Ok(())) => debug!("Snippet cache reloaded"),
        Ok(Err(e)) => warn!("Snippet reload failed: {}", e),
        Err(e) if e.is_panic() => error!("Snippet reload panicked"),
        Err(e) => warn!("Snippet reload aborted: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompanionError;
    use tokio::time::sleep;

    const DELAY: Duration = Duration::from_millis(100);

    fn counting() -> (Arc<AtomicUsize>, Arc<dyn SnippetReloader>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let reloader = move || -> Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        (calls, Arc::new(reloader))
    }

    fn modified(name: &str) -> FileEvent {
        FileEvent::new(format!("/home/user/.config/espanso/match/{}", name), FileEventKind::Modified)
    }

    #[tokio::test]
    async fn test_burst_reloads_once_after_quiet_period() {
        let (calls, reloader) = counting();
        let refresh = DebouncedRefresh::new(Handle::current(), DELAY, reloader);

        for _ in 0..5 {
            refresh.on_file_event(&modified("base.yml"));
            sleep(Duration::from_millis(30)).await;
        }
        // 30ms after the last event: still quiet
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(refresh.is_armed());

        sleep(DELAY * 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(refresh.reload_count(), 1);
        assert!(!refresh.is_armed());
    }

    #[tokio::test]
    async fn test_separate_bursts_reload_separately() {
        let (calls, reloader) = counting();
        let refresh = DebouncedRefresh::new(Handle::current(), DELAY, reloader);

        refresh.on_file_event(&modified("a.yml"));
        sleep(DELAY * 2).await;
        refresh.on_file_event(&modified("b.yml"));
        sleep(DELAY * 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_prevents_reload() {
        let (calls, reloader) = counting();
        let refresh = DebouncedRefresh::new(Handle::current(), DELAY, reloader);

        refresh.on_file_event(&modified("base.yml"));
        refresh.cancel();
        sleep(DELAY * 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        // The event is still logged
        assert_eq!(refresh.recent_events().len(), 1);
    }

    #[tokio::test]
    async fn test_reload_errors_and_panics_are_swallowed() {
        let failing = || -> Result<()> { Err(CompanionError::Unavailable("match dir gone".into())) };
        let refresh = DebouncedRefresh::new(Handle::current(), Duration::from_millis(10), Arc::new(failing));
        refresh.on_file_event(&modified("base.yml"));
        sleep(Duration::from_millis(100)).await;
        assert_eq!(refresh.reload_count(), 1);

        let panicking = || -> Result<()> { panic!("bad yaml") };
        let refresh = DebouncedRefresh::new(Handle::current(), Duration::from_millis(10), Arc::new(panicking));
        refresh.on_file_event(&modified("base.yml"));
        sleep(Duration::from_millis(100)).await;
        assert_eq!(refresh.reload_count(), 1);

        // Still usable afterwards
        refresh.on_file_event(&modified("base.yml"));
        sleep(Duration::from_millis(100)).await;
        assert_eq!(refresh.reload_count(), 2);
    }

    #[tokio::test]
    async fn test_recent_events_capped_newest_first() {
        let (_, reloader) = counting();
        let refresh = DebouncedRefresh::new(Handle::current(), DELAY, reloader);

        for i in 0..MAX_RECENT_EVENTS + 5 {
            refresh.on_file_event(&modified(&format!("file{}.yml", i)));
        }
        refresh.on_file_event(&FileEvent {
            path: PathBuf::from("/"),
            kind: FileEventKind::Deleted,
            is_directory: true,
        });

        let events = refresh.recent_events();
        assert_eq!(events.len(), MAX_RECENT_EVENTS);
        assert_eq!(events[0].file, "unknown");
        assert_eq!(events[0].kind, FileEventKind::Deleted);
        assert_eq!(events[1].file, format!("file{}.yml", MAX_RECENT_EVENTS + 4));
        refresh.cancel();
    }

    #[test]
    fn test_event_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&FileEventKind::Created).unwrap(), "\"created\"");
    }
}
