//! Trigger tokens for accepted suggestions.

use std::collections::HashSet;

pub const TRIGGER_PREFIX: char = ':';

const CHARS_PER_WORD: usize = 2;
const MAX_BASE_CHARS: usize = 6;
const MIN_TRIGGER_CHARS: usize = 3;
const FALLBACK_WORD: &str = "snippet";
const FALLBACK_MARKER: &str = "ss";

/// Derive a short trigger from `phrase` that is not in `existing`.
///
/// The first two characters of each word, at most six in total, behind a
/// `:`. "thank you very much" becomes `:thyove`. Too-short results fall back
/// to `:ss` plus the start of the phrase, and collisions get a numeric
/// suffix starting at 1.
pub fn derive_trigger(phrase: &str, existing: &HashSet<String>) -> String {
    let cleaned: String = phrase
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    let cleaned = cleaned.trim();

    let mut words: Vec<&str> = cleaned.split_whitespace().collect();
    if words.is_empty() {
        words.push(FALLBACK_WORD);
    }

    let stem: String = words
        .iter()
        .flat_map(|word| word.chars().take(CHARS_PER_WORD))
        .take(MAX_BASE_CHARS)
        .collect();
    let mut base = format!("{}{}", TRIGGER_PREFIX, stem);

    if base.chars().count() < MIN_TRIGGER_CHARS {
        let head: String = cleaned
            .chars()
            .filter(|c| !c.is_whitespace())
            .take(MIN_TRIGGER_CHARS)
            .collect();
        base = format!("{}{}{}", TRIGGER_PREFIX, FALLBACK_MARKER, head);
    }

    let mut candidate = base.clone();
    let mut suffix = 1u32;
    while existing.contains(&candidate) {
        candidate = format!("{}{}", base, suffix);
        suffix += 1;
    }
    candidate
}
