//! Embedding-backed lookup tables
//!
//! The [`SemanticCache`] remembers which tool call answered an utterance and
//! the [`SemanticRouter`] sorts utterances into coarse routes. Both keep a
//! JSON document in a [`DocumentStore`] as the durable copy of their table
//! and rewrite it in full after every mutation.

mod cache;
mod router;

pub use cache::{CacheEntry, CacheHit, CacheLookup, SemanticCache, normalize_key};
pub use router::{
    DEFAULT_MATCH_THRESHOLD, DEFAULT_ROUTES, RouteMatch, SemanticRouter, TeachOutcome,
    default_routes,
};

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::storage::{DocumentStore, decode_document};

/// Outcome of reading a table document at startup
enum Loaded<T> {
    /// Document present and valid
    Found(T),
    /// Document absent or corrupt; start from defaults and write them back
    Missing,
    /// Store unreachable; start from defaults without overwriting it
    Unavailable,
}

async fn load_document<T: DeserializeOwned>(store: &dyn DocumentStore, key: &str) -> Loaded<T> {
    match store.get(key).await {
        Ok(raw) => match decode_document(key, raw.as_deref()) {
            Some(doc) => Loaded::Found(doc),
            None => Loaded::Missing,
        },
        Err(e) => {
            tracing::error!(key, error = %e, "document store unavailable, starting from defaults");
            Loaded::Unavailable
        }
    }
}

/// Serializes full-document writes of one table
///
/// Each mutation bumps the table's generation; a snapshot older than the
/// last one written is dropped so a slow writer cannot roll the document
/// back.
struct Persister {
    store: Arc<dyn DocumentStore>,
    key: String,
    written: Mutex<u64>,
}

impl Persister {
    fn new(store: Arc<dyn DocumentStore>, key: String) -> Self {
        Self {
            store,
            key,
            written: Mutex::new(0),
        }
    }

    /// Write a snapshot; failures are logged and the in-memory table stays
    /// authoritative
    async fn write(&self, generation: u64, body: Vec<u8>) {
        let mut written = self.written.lock().await;
        if *written >= generation {
            tracing::debug!(key = %self.key, generation, "skipping stale snapshot");
            return;
        }

        match self.store.put(&self.key, body).await {
            Ok(()) => {
                *written = generation;
                tracing::debug!(key = %self.key, generation, "table persisted");
            }
            Err(e) => {
                tracing::error!(key = %self.key, error = %e, "failed to persist table");
            }
        }
    }
}
