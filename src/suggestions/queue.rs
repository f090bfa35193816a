//! Pending phrase suggestions and the decisions made on them.
//!
//! The engine thread pushes suggestions while the user decides on others, so
//! the pending list and the blocked/handled hash sets share one lock and
//! every mutation happens inside a single critical section.

use super::trigger::derive_trigger;
use crate::error::{CompanionError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Oldest entries are evicted beyond this.
pub const MAX_PENDING: usize = 50;

/// Label attached to snippets created from accepted suggestions.
pub const SNIPPET_LABEL: &str = "SnippetSense";

pub const PENDING_FILE_NAME: &str = "suggestions_pending.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSuggestion {
    pub id: String,
    pub hash: String,
    pub phrase: String,
    pub normalized_phrase: String,
    pub occurrence_count: u32,
    pub created_at: DateTime<Utc>,
}

impl PendingSuggestion {
    fn key(&self) -> (&str, &str) {
        (&self.hash, &self.normalized_phrase)
    }
}

/// Lowercase, collapse whitespace runs to one space, trim.
pub fn normalize_phrase(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Reject,
    Block,
}

impl FromStr for Decision {
    type Err = CompanionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "accept" => Ok(Decision::Accept),
            "reject" => Ok(Decision::Reject),
            // "never" is what older settings files and frontends send
            "block" | "never" => Ok(Decision::Block),
            other => Err(CompanionError::InvalidInput(format!(
                "Unsupported decision: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Accept => write!(f, "accept"),
            Decision::Reject => write!(f, "reject"),
            Decision::Block => write!(f, "block"),
        }
    }
}

/// Snippet requested for an accepted suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewSnippet {
    pub trigger: String,
    pub replacement: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedSnippet {
    pub trigger: String,
}

/// Where accepted suggestions become snippets.
pub trait SnippetStore: Send + Sync {
    /// Triggers already in use, for collision avoidance.
    fn existing_triggers(&self) -> Vec<String>;

    /// Persist a snippet. Duplicate-trigger rejection is the store's job.
    fn create_snippet(&self, snippet: &NewSnippet) -> Result<CreatedSnippet>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionOutcome {
    pub decision: Decision,
    pub hash: String,
    pub detail: String,
    /// Set for accepted suggestions
    pub trigger: Option<String>,
}

/// JSON file holding the pending queue across restarts.
///
/// I/O failures are logged and otherwise ignored; losing the queue only
/// means suggestions resurface from the engine later.
#[derive(Debug, Clone)]
pub struct PendingStore {
    path: PathBuf,
}

impl PendingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `suggestions_pending.json` inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(PENDING_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Vec<PendingSuggestion> {
        if !self.path.exists() {
            return Vec::new();
        }

        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Failed to read {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Ignoring malformed {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    pub fn save(&self, pending: &[PendingSuggestion]) {
        if let Err(e) = self.write(pending) {
            warn!("Failed to save pending suggestions to {}: {}", self.path.display(), e);
        }
    }

    fn write(&self, pending: &[PendingSuggestion]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(pending)
            .map_err(|e| CompanionError::InvalidInput(e.to_string()))?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

#[derive(Default)]
struct QueueState {
    pending: Vec<PendingSuggestion>,
    blocked: HashSet<String>,
    handled: HashSet<String>,
}

impl QueueState {
    fn is_pending(&self, hash: &str, normalized: &str) -> bool {
        self.pending.iter().any(|p| p.key() == (hash, normalized))
    }

    fn evict_overflow(&mut self) {
        if self.pending.len() > MAX_PENDING {
            let overflow = self.pending.len() - MAX_PENDING;
            self.pending.drain(..overflow);
            debug!("Evicted {} oldest suggestion(s)", overflow);
        }
    }
}

#[derive(Default)]
pub struct SuggestionQueue {
    state: Mutex<QueueState>,
    store: Option<Arc<dyn SnippetStore>>,
    persistence: Option<PendingStore>,
}

impl SuggestionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: Arc<dyn SnippetStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Persist the queue to `persistence`, loading whatever it already holds.
    ///
    /// Loaded entries are de-duplicated and capped like live ones.
    pub fn with_persistence(mut self, persistence: PendingStore) -> Self {
        let loaded = persistence.load();
        {
            let mut state = self.state();
            for entry in loaded {
                if !state.is_pending(&entry.hash, &entry.normalized_phrase) {
                    state.pending.push(entry);
                }
            }
            state.evict_overflow();
            debug!("Loaded {} pending suggestion(s)", state.pending.len());
        }
        self.persistence = Some(persistence);
        self
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, state: &QueueState) {
        if let Some(persistence) = &self.persistence {
            persistence.save(&state.pending);
        }
    }

    /// Replace the blocked and handled sets, typically from saved settings.
    pub fn seed<B, H>(&self, blocked: B, handled: H)
    where
        B: IntoIterator<Item = String>,
        H: IntoIterator<Item = String>,
    {
        let mut state = self.state();
        state.blocked = blocked.into_iter().collect();
        state.handled = handled.into_iter().collect();
    }

    /// Ingest one engine suggestion. Returns whether it was queued.
    ///
    /// `timestamp` is RFC 3339 (a zone-less ISO timestamp is read as UTC);
    /// anything else is replaced by the current time.
    pub fn on_suggestion(
        &self,
        hash: &str,
        phrase: &str,
        occurrence_count: u32,
        timestamp: &str,
    ) -> bool {
        if hash.is_empty() {
            return false;
        }
        let normalized = normalize_phrase(phrase);

        let mut state = self.state();
        if state.blocked.contains(hash) || state.handled.contains(hash) {
            return false;
        }
        if state.is_pending(hash, &normalized) {
            return false;
        }

        state.pending.push(PendingSuggestion {
            id: Uuid::new_v4().simple().to_string(),
            hash: hash.to_string(),
            phrase: phrase.to_string(),
            normalized_phrase: normalized,
            occurrence_count,
            created_at: parse_timestamp(timestamp),
        });
        state.evict_overflow();
        self.persist(&state);
        true
    }

    /// Snapshot in arrival order.
    pub fn list_pending(&self) -> Vec<PendingSuggestion> {
        self.state().pending.clone()
    }

    pub fn len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn blocked(&self) -> Vec<String> {
        sorted(&self.state().blocked)
    }

    pub fn handled(&self) -> Vec<String> {
        sorted(&self.state().handled)
    }

    /// Apply a decision to the pending entry `id`.
    ///
    /// An unknown id changes nothing. If the snippet store rejects an
    /// accepted suggestion, the entry goes back to where it was.
    pub fn decide(&self, id: &str, decision: Decision) -> Result<DecisionOutcome> {
        let mut state = self.state();
        let index = state
            .pending
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| CompanionError::NotFound(format!("Suggestion not found: {}", id)))?;
        let entry = state.pending.remove(index);

        let outcome = match decision {
            Decision::Accept => match self.create_snippet(&entry) {
                Ok(trigger) => {
                    state.handled.insert(entry.hash.clone());
                    info!("Accepted suggestion {} as {}", entry.id, trigger);
                    DecisionOutcome {
                        decision,
                        hash: entry.hash,
                        detail: "Snippet created".to_string(),
                        trigger: Some(trigger),
                    }
                }
                Err(e) => {
                    warn!("Snippet creation failed for suggestion {}: {}", entry.id, e);
                    state.pending.insert(index, entry);
                    return Err(e);
                }
            },
            Decision::Block => {
                state.blocked.insert(entry.hash.clone());
                state.handled.insert(entry.hash.clone());
                info!("Blocked suggestion hash {}", entry.hash);
                DecisionOutcome {
                    decision,
                    hash: entry.hash,
                    detail: "Phrase will no longer trigger suggestions".to_string(),
                    trigger: None,
                }
            }
            Decision::Reject => {
                state.handled.insert(entry.hash.clone());
                DecisionOutcome {
                    decision,
                    hash: entry.hash,
                    detail: "Suggestion dismissed".to_string(),
                    trigger: None,
                }
            }
        };

        self.persist(&state);
        Ok(outcome)
    }

    fn create_snippet(&self, entry: &PendingSuggestion) -> Result<String> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| CompanionError::Unavailable("No snippet store configured".into()))?;

        let existing: HashSet<String> = store.existing_triggers().into_iter().collect();
        let snippet = NewSnippet {
            trigger: derive_trigger(&entry.phrase, &existing),
            replacement: entry.phrase.clone(),
            label: SNIPPET_LABEL.to_string(),
        };
        let created = store.create_snippet(&snippet)?;
        Ok(created.trigger)
    }
}

fn sorted(set: &HashSet<String>) -> Vec<String> {
    let mut items: Vec<String> = set.iter().cloned().collect();
    items.sort();
    items
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.with_timezone(&Utc);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return naive.and_utc();
    }
    Utc::now()
}
