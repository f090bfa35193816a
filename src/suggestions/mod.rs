//! Phrase suggestions from an optional analysis engine.
//!
//! The engine watches typing and reports repeated phrases; the
//! [`SuggestionQueue`] de-duplicates them and holds them until the user
//! accepts, rejects or blocks each one. [`SuggestionHub`] owns the engine
//! lifecycle and keeps the engine's view of blocked/handled hashes current.

mod queue;
mod trigger;

pub use queue::{
    normalize_phrase, CreatedSnippet, Decision, DecisionOutcome, NewSnippet, PendingStore,
    PendingSuggestion, SnippetStore, SuggestionQueue, MAX_PENDING, PENDING_FILE_NAME,
    SNIPPET_LABEL,
};
pub use trigger::{derive_trigger, TRIGGER_PREFIX};

use crate::error::{CompanionError, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

/// Engine settings, stored as the `[suggestions]` config table and handed
/// to the engine as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionSettings {
    pub enabled: bool,
    /// Shortest phrase, in words, worth suggesting
    pub min_words: u32,
    /// Shortest phrase, in characters, worth suggesting
    pub min_chars: u32,
    /// Repetitions before a phrase is suggested
    pub repetition_threshold: u32,
    /// Applications to watch (empty = all)
    pub whitelist: Vec<String>,
    /// Applications never to watch
    pub blacklist: Vec<String>,
    /// Hashes never to suggest again
    pub blocked: Vec<String>,
    /// Hashes already decided on
    pub handled: Vec<String>,
}

impl Default for SuggestionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            min_words: 3,
            min_chars: 10,
            repetition_threshold: 3,
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            blocked: Vec::new(),
            handled: Vec::new(),
        }
    }
}

impl SuggestionSettings {
    /// Clamp thresholds to values the engine can work with.
    pub fn sanitized(mut self) -> Self {
        self.min_words = self.min_words.max(1);
        self.min_chars = self.min_chars.max(5);
        self.repetition_threshold = self.repetition_threshold.max(2);
        self
    }
}

/// One suggestion as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestionEvent {
    pub hash: String,
    pub phrase: String,
    pub occurrence_count: u32,
    /// RFC 3339, as produced by the engine
    pub timestamp: String,
}

/// Called by the engine from its own thread.
pub type SuggestionCallback = Arc<dyn Fn(SuggestionEvent) + Send + Sync>;

/// The analysis engine as seen from the companion.
pub trait SuggestionEngine: Send + Sync {
    fn start(&self, callback: SuggestionCallback, settings: &SuggestionSettings) -> Result<()>;
    fn stop(&self);
    fn update_settings(&self, settings: &SuggestionSettings);
}

/// Engine status for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineState {
    pub available: bool,
    pub running: bool,
    pub error: Option<String>,
    pub pending: usize,
}

struct HubState {
    settings: SuggestionSettings,
    running: bool,
    error: Option<String>,
}

pub struct SuggestionHub {
    engine: Option<Arc<dyn SuggestionEngine>>,
    queue: Arc<SuggestionQueue>,
    state: Mutex<HubState>,
}

impl SuggestionHub {
    /// Seeds the queue's blocked/handled sets from `settings`.
    pub fn new(
        engine: Option<Arc<dyn SuggestionEngine>>,
        queue: Arc<SuggestionQueue>,
        settings: SuggestionSettings,
    ) -> Self {
        let settings = settings.sanitized();
        queue.seed(settings.blocked.clone(), settings.handled.clone());
        Self {
            engine,
            queue,
            state: Mutex::new(HubState {
                settings,
                running: false,
                error: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn queue(&self) -> &Arc<SuggestionQueue> {
        &self.queue
    }

    pub fn available(&self) -> bool {
        self.engine.is_some()
    }

    pub fn settings(&self) -> SuggestionSettings {
        self.state().settings.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn state_summary(&self) -> EngineState {
        let state = self.state();
        EngineState {
            available: self.available(),
            running: state.running,
            error: state.error.clone(),
            pending: self.queue.len(),
        }
    }

    /// Start the engine with `settings`, re-seeding blocked/handled from it.
    pub fn start(&self, settings: SuggestionSettings) -> Result<()> {
        let settings = settings.sanitized();
        self.queue
            .seed(settings.blocked.clone(), settings.handled.clone());
        self.state().settings = settings.clone();

        let Some(engine) = &self.engine else {
            let error = CompanionError::Unavailable("Suggestion engine not available".into());
            self.state().error = Some(error.to_string());
            return Err(error);
        };

        let queue = self.queue.clone();
        let callback: SuggestionCallback = Arc::new(move |event: SuggestionEvent| {
            queue.on_suggestion(
                &event.hash,
                &event.phrase,
                event.occurrence_count,
                &event.timestamp,
            );
        });

        match engine.start(callback, &settings) {
            Ok(()) => {
                info!("Suggestion engine started");
                let mut state = self.state();
                state.running = true;
                state.error = None;
                Ok(())
            }
            Err(e) => {
                warn!("Suggestion engine failed to start: {}", e);
                let mut state = self.state();
                state.running = false;
                state.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn stop(&self) {
        let was_running = std::mem::replace(&mut self.state().running, false);
        if let (true, Some(engine)) = (was_running, &self.engine) {
            engine.stop();
            info!("Suggestion engine stopped");
        }
    }

    /// Store new user settings and start or stop the engine to match.
    ///
    /// Blocked/handled lists are owned by the queue and survive the update.
    pub fn update_settings(&self, settings: SuggestionSettings) -> SuggestionSettings {
        let mut settings = settings.sanitized();
        settings.blocked = self.queue.blocked();
        settings.handled = self.queue.handled();

        let running = {
            let mut state = self.state();
            state.settings = settings.clone();
            state.running
        };

        match (settings.enabled, running) {
            (true, false) => {
                if self.engine.is_some() {
                    // Failure is recorded in the state summary
                    let _ = self.start(settings.clone());
                }
            }
            (false, true) => self.stop(),
            (true, true) => self.push_settings(&settings),
            (false, false) => {}
        }
        settings
    }

    /// Decide on a pending suggestion by id and decision name.
    pub fn decide(&self, id: &str, decision: &str) -> Result<DecisionOutcome> {
        let decision: Decision = decision.parse()?;
        let outcome = self.queue.decide(id, decision)?;

        let settings = {
            let mut state = self.state();
            state.settings.blocked = self.queue.blocked();
            state.settings.handled = self.queue.handled();
            state.settings.clone()
        };
        if self.is_running() {
            self.push_settings(&settings);
        }
        Ok(outcome)
    }

    fn push_settings(&self, settings: &SuggestionSettings) {
        if let Some(engine) = &self.engine {
            engine.update_settings(settings);
        }
    }
}
