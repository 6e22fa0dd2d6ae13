//! Per-room event correlation
//!
//! A command arrives in pieces: the satellite announces the wake word, then
//! transcription and speaker identification finish independently and in
//! either order. The correlator joins them into one [`ReadyIntent`] per
//! session. A new wake in a room always discards whatever that room had
//! collected so far.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Partially assembled command for one room
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingIntent {
    /// Transcript, once it arrived
    pub transcript: Option<String>,
    /// Speaker label, once it arrived
    pub speaker: Option<String>,
}

/// A complete command, handed to resolution exactly once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyIntent {
    /// Room the command was spoken in
    pub room: String,
    /// Transcript text
    pub text: String,
    /// Speaker label
    pub speaker: String,
}

/// Result of applying an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Still waiting for more input
    Pending,
    /// Both parts present; the pending entry has been removed
    Ready(ReadyIntent),
    /// Blank transcript; the session should end without resolution
    Abort {
        /// Room whose session ends
        room: String,
    },
}

/// Table of pending intents keyed by room
#[derive(Debug, Default)]
pub struct EventCorrelator {
    pending: Mutex<HashMap<String, PendingIntent>>,
}

impl EventCorrelator {
    /// Create an empty correlator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new session in `room`, discarding any incomplete intent
    pub fn wake(&self, room: &str) {
        let previous = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(room.to_string(), PendingIntent::default());

        if previous.is_some_and(|p| p != PendingIntent::default()) {
            tracing::debug!(room, "discarded incomplete intent on new wake");
        }
    }

    /// Record the transcript for `room`
    ///
    /// A blank transcript drops the room's entry and aborts the session.
    pub fn transcript(&self, room: &str, text: &str) -> Transition {
        if text.trim().is_empty() {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(room);
            tracing::info!(room, "empty transcript, aborting session");
            return Transition::Abort {
                room: room.to_string(),
            };
        }

        self.update(room, |p| p.transcript = Some(text.trim().to_string()))
    }

    /// Record the identified speaker for `room`
    pub fn speaker(&self, room: &str, speaker_id: &str) -> Transition {
        self.update(room, |p| p.speaker = Some(speaker_id.to_string()))
    }

    /// Forget the room's pending intent when its session ends
    pub fn end(&self, room: &str) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(room);
    }

    /// Snapshot of a room's pending intent
    #[must_use]
    pub fn pending(&self, room: &str) -> Option<PendingIntent> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room)
            .cloned()
    }

    /// Number of rooms with a pending intent
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no room has a pending intent
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `mutate` and hand the intent off if it became complete
    ///
    /// Mutation, readiness check and removal happen under one lock so a room
    /// can never be dispatched twice.
    fn update(&self, room: &str, mutate: impl FnOnce(&mut PendingIntent)) -> Transition {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);

        let entry = pending.entry(room.to_string()).or_insert_with(|| {
            tracing::debug!(room, "event arrived before wake, creating entry");
            PendingIntent::default()
        });
        mutate(entry);

        if entry.transcript.is_none() || entry.speaker.is_none() {
            return Transition::Pending;
        }

        let Some(PendingIntent {
            transcript: Some(text),
            speaker: Some(speaker),
        }) = pending.remove(room)
        else {
            return Transition::Pending;
        };

        Transition::Ready(ReadyIntent {
            room: room.to_string(),
            text,
            speaker,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(room: &str, text: &str, speaker: &str) -> Transition {
        Transition::Ready(ReadyIntent {
            room: room.to_string(),
            text: text.to_string(),
            speaker: speaker.to_string(),
        })
    }

    #[test]
    fn test_speaker_then_transcript() {
        let c = EventCorrelator::new();
        c.wake("kitchen");
        assert_eq!(c.speaker("kitchen", "bob"), Transition::Pending);
        assert_eq!(
            c.transcript("kitchen", "turn off light"),
            ready("kitchen", "turn off light", "bob")
        );
        assert!(c.pending("kitchen").is_none());
    }

    #[test]
    fn test_transcript_then_speaker() {
        let c = EventCorrelator::new();
        c.wake("bad");
        assert_eq!(c.transcript("bad", "licht an"), Transition::Pending);
        assert_eq!(c.speaker("bad", "anna"), ready("bad", "licht an", "anna"));
        assert!(c.is_empty());
    }

    #[test]
    fn test_second_wake_discards_partial_state() {
        let c = EventCorrelator::new();
        c.wake("kitchen");
        assert_eq!(c.transcript("kitchen", "first command"), Transition::Pending);
        c.wake("kitchen");
        assert_eq!(c.speaker("kitchen", "bob"), Transition::Pending);
        assert_eq!(
            c.pending("kitchen"),
            Some(PendingIntent {
                transcript: None,
                speaker: Some("bob".to_string())
            })
        );
    }

    #[test]
    fn test_blank_transcript_aborts() {
        let c = EventCorrelator::new();
        c.wake("kitchen");
        c.speaker("kitchen", "bob");
        assert_eq!(
            c.transcript("kitchen", "   "),
            Transition::Abort {
                room: "kitchen".to_string()
            }
        );
        assert!(c.pending("kitchen").is_none());
    }

    #[test]
    fn test_events_without_wake_create_entry() {
        let c = EventCorrelator::new();
        assert_eq!(c.transcript("flur", "licht aus"), Transition::Pending);
        assert_eq!(c.speaker("flur", "unknown"), ready("flur", "licht aus", "unknown"));
    }

    #[test]
    fn test_rooms_are_independent() {
        let c = EventCorrelator::new();
        c.wake("kitchen");
        c.wake("bad");
        c.transcript("kitchen", "licht aus");
        c.speaker("bad", "anna");
        assert_eq!(c.len(), 2);
        assert_eq!(c.speaker("kitchen", "bob"), ready("kitchen", "licht aus", "bob"));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_end_discards_pending() {
        let c = EventCorrelator::new();
        c.wake("kitchen");
        c.transcript("kitchen", "licht aus");
        c.end("kitchen");
        assert_eq!(c.speaker("kitchen", "bob"), Transition::Pending);
    }

    #[test]
    fn test_transcript_is_trimmed() {
        let c = EventCorrelator::new();
        c.speaker("kitchen", "bob");
        assert_eq!(
            c.transcript("kitchen", "  licht aus \n"),
            ready("kitchen", "licht aus", "bob")
        );
    }

    #[test]
    fn test_concurrent_completion_dispatches_once() {
        use std::sync::Arc;

        let c = Arc::new(EventCorrelator::new());
        for _ in 0..50 {
            c.wake("kitchen");
            let a = {
                let c = Arc::clone(&c);
                std::thread::spawn(move || c.transcript("kitchen", "licht aus"))
            };
            let b = {
                let c = Arc::clone(&c);
                std::thread::spawn(move || c.speaker("kitchen", "bob"))
            };
            let results = [a.join().unwrap(), b.join().unwrap()];
            let dispatched = results
                .iter()
                .filter(|t| matches!(t, Transition::Ready(_)))
                .count();
            assert_eq!(dispatched, 1);
        }
    }
}
