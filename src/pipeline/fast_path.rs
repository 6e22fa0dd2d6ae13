//! Static phrase → tool table for unambiguous commands

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Router phrases that map to a fixed tool call
pub const DEFAULT_FAST_PATHS: &[(&str, &str)] = &[
    ("musik stoppen", "stop_music"),
    ("nächstes lied bitte", "next_track"),
    ("musik fortsetzen", "resume_music"),
    ("leere die warteschlange", "clear_queue"),
    ("was läuft gerade", "whats_playing"),
    ("timer abbrechen", "cancel_timer"),
];

/// Tool call served by the fast path
#[derive(Debug, Clone, PartialEq)]
pub struct FastPathCall {
    /// Tool name
    pub tool: String,
    /// Fixed arguments; the room is added at execution time
    pub args: Map<String, Value>,
}

/// Canonical phrases mapped straight to tool calls
#[derive(Debug, Clone, Default)]
pub struct FastPathTable {
    entries: HashMap<String, FastPathCall>,
}

impl FastPathTable {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Table of [`DEFAULT_FAST_PATHS`]
    #[must_use]
    pub fn defaults() -> Self {
        let mut table = Self::new();
        for (phrase, tool) in DEFAULT_FAST_PATHS {
            table.insert(phrase, tool, Map::new());
        }
        table
    }

    /// Map `phrase` to a tool call
    pub fn insert(&mut self, phrase: &str, tool: &str, args: Map<String, Value>) {
        self.entries.insert(
            phrase.trim().to_lowercase(),
            FastPathCall {
                tool: tool.to_string(),
                args,
            },
        );
    }

    /// Tool call for a phrase
    #[must_use]
    pub fn get(&self, phrase: &str) -> Option<&FastPathCall> {
        self.entries.get(&phrase.trim().to_lowercase())
    }

    /// Number of phrases
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::default_routes;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let table = FastPathTable::defaults();
        assert_eq!(table.get("Musik Stoppen").unwrap().tool, "stop_music");
        assert!(table.get("musik starten").is_none());
    }

    #[test]
    fn test_default_phrases_are_router_examples() {
        let phrases: Vec<String> = default_routes().into_values().flatten().collect();
        for (phrase, _) in DEFAULT_FAST_PATHS {
            assert!(phrases.iter().any(|p| p == phrase), "{phrase} is not a route example");
        }
    }
}
