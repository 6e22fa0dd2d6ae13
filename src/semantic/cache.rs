//! Semantic tool cache
//!
//! Maps utterances to the tool call that answered them. Lookups try the
//! literal key first and then the nearest fuzzy neighbour. Tools registered
//! as exact-only are never matched fuzzily because their arguments (search
//! terms, durations, levels) do not carry over to similar sentences.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{Loaded, Persister, load_document};
use crate::embedding::{EmbeddingIndex, Encoder};
use crate::storage::DocumentStore;
use crate::{Error, Result};

/// Cached tool call for one utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Tool name
    pub tool: String,
    /// Room-agnostic arguments
    #[serde(default)]
    pub args: Map<String, Value>,
    /// Reachable only by exact key match
    #[serde(default)]
    pub exact_only: bool,
}

/// A cache hit
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    /// Stored utterance that matched
    pub utterance: String,
    /// Tool name
    pub tool: String,
    /// Stored arguments
    pub args: Map<String, Value>,
    /// 1.0 for exact hits, cosine similarity otherwise
    pub score: f32,
}

/// Result of [`SemanticCache::get`]
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// A usable entry was found
    Hit(CacheHit),
    /// Nothing usable; carries the best similarity seen
    Miss {
        /// Highest cosine similarity observed, 0.0 with an empty index
        best_score: f32,
    },
}

impl CacheLookup {
    /// Score of the hit, or the best score of the miss
    #[must_use]
    pub fn score(&self) -> f32 {
        match self {
            Self::Hit(hit) => hit.score,
            Self::Miss { best_score } => *best_score,
        }
    }

    /// The hit, if any
    #[must_use]
    pub fn into_hit(self) -> Option<CacheHit> {
        match self {
            Self::Hit(hit) => Some(hit),
            Self::Miss { .. } => None,
        }
    }
}

/// Cache key for an utterance
#[must_use]
pub fn normalize_key(utterance: &str) -> String {
    utterance.trim().to_lowercase()
}

struct CacheState {
    entries: IndexMap<String, CacheEntry>,
    /// One row per entry that is not exact-only, in entry order
    index: EmbeddingIndex<String>,
    generation: u64,
}

/// Utterance → tool cache with exact and fuzzy lookup
pub struct SemanticCache {
    encoder: Arc<dyn Encoder>,
    exact_tools: HashSet<String>,
    state: RwLock<CacheState>,
    persister: Persister,
}

impl SemanticCache {
    /// Load the cache table from `store`
    ///
    /// Entries whose `exact_only` flag disagrees with `exact_tools` are
    /// corrected and the table is written back. A missing or corrupt
    /// document starts an empty table that is persisted immediately.
    ///
    /// # Errors
    ///
    /// Returns error if the stored utterances cannot be encoded
    pub async fn load(
        encoder: Arc<dyn Encoder>,
        store: Arc<dyn DocumentStore>,
        key: impl Into<String>,
        exact_tools: HashSet<String>,
    ) -> Result<Self> {
        let key = key.into();

        let loaded = load_document::<IndexMap<String, CacheEntry>>(store.as_ref(), &key).await;
        let (mut entries, mut dirty) = match loaded {
            Loaded::Found(entries) => {
                tracing::info!(key = %key, entries = entries.len(), "loaded tool cache");
                (entries, false)
            }
            Loaded::Missing => {
                tracing::warn!(key = %key, "no usable tool cache found, starting fresh");
                (IndexMap::new(), true)
            }
            Loaded::Unavailable => (IndexMap::new(), false),
        };

        let healed = heal_flags(&mut entries, &exact_tools);
        if healed > 0 {
            tracing::info!(healed, "updated stale exact_only flags to match the tool registry");
            dirty = true;
        }

        let index = build_index(encoder.as_ref(), &entries).await?;

        let cache = Self {
            encoder,
            exact_tools,
            state: RwLock::new(CacheState {
                entries,
                index,
                generation: 1,
            }),
            persister: Persister::new(store, key),
        };

        if dirty {
            cache.persist().await;
        }

        Ok(cache)
    }

    /// Look up a tool call for `query`
    ///
    /// Exact key matches return score 1.0 regardless of `threshold` or the
    /// entry's `exact_only` flag. Otherwise the nearest fuzzy entry is
    /// returned when its similarity reaches `threshold`.
    ///
    /// # Errors
    ///
    /// Returns error if the query cannot be encoded
    pub async fn get(&self, query: &str, threshold: f32) -> Result<CacheLookup> {
        let key = normalize_key(query);

        {
            let state = self.state.read().await;
            if let Some(entry) = state.entries.get(&key) {
                return Ok(CacheLookup::Hit(CacheHit {
                    utterance: key,
                    tool: entry.tool.clone(),
                    args: entry.args.clone(),
                    score: 1.0,
                }));
            }
            if state.index.is_empty() {
                return Ok(CacheLookup::Miss { best_score: 0.0 });
            }
        }

        let vector = self.encoder.encode(&key).await?;

        let state = self.state.read().await;
        let Some((matched, score)) = state.index.best_match(&vector) else {
            return Ok(CacheLookup::Miss { best_score: 0.0 });
        };

        if score >= threshold
            && let Some(entry) = state.entries.get(matched)
            && !entry.exact_only
        {
            tracing::debug!(query = %key, matched = %matched, score, "fuzzy cache match");
            return Ok(CacheLookup::Hit(CacheHit {
                utterance: matched.clone(),
                tool: entry.tool.clone(),
                args: entry.args.clone(),
                score,
            }));
        }

        Ok(CacheLookup::Miss { best_score: score })
    }

    /// Remember that `utterance` was answered by `tool` with `args`
    ///
    /// Returns `false` when the utterance is already cached; existing
    /// entries are never overwritten.
    ///
    /// # Errors
    ///
    /// Returns error if the utterance is blank or cannot be encoded
    pub async fn add(&self, utterance: &str, tool: &str, args: Map<String, Value>) -> Result<bool> {
        let key = normalize_key(utterance);
        if key.is_empty() {
            return Err(Error::InvalidInput("cannot cache an empty utterance".to_string()));
        }

        if self.state.read().await.entries.contains_key(&key) {
            return Ok(false);
        }

        let exact_only = self.exact_tools.contains(tool);
        let vector = if exact_only {
            None
        } else {
            Some(self.encoder.encode(&key).await?)
        };

        {
            let mut state = self.state.write().await;
            // Another room may have learned it while we were encoding
            if state.entries.contains_key(&key) {
                return Ok(false);
            }
            if let Some(vector) = &vector {
                state.index.push(vector, key.clone())?;
            }
            state.entries.insert(
                key.clone(),
                CacheEntry {
                    tool: tool.to_string(),
                    args,
                    exact_only,
                },
            );
            state.generation += 1;
        }

        tracing::info!(utterance = %key, tool, exact_only, "learned new phrase");
        self.persist().await;
        Ok(true)
    }

    /// Stored entry for an utterance
    pub async fn entry(&self, utterance: &str) -> Option<CacheEntry> {
        self.state
            .read()
            .await
            .entries
            .get(&normalize_key(utterance))
            .cloned()
    }

    /// Number of cached utterances
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Whether nothing is cached
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    /// Number of entries eligible for fuzzy matching
    pub async fn fuzzy_len(&self) -> usize {
        self.state.read().await.index.len()
    }

    async fn persist(&self) {
        let (generation, body) = {
            let state = self.state.read().await;
            (state.generation, serde_json::to_vec_pretty(&state.entries))
        };

        match body {
            Ok(body) => self.persister.write(generation, body).await,
            Err(e) => tracing::error!(error = %e, "failed to serialize tool cache"),
        }
    }
}

/// Align every entry's flag with the registry, returning how many changed
fn heal_flags(entries: &mut IndexMap<String, CacheEntry>, exact_tools: &HashSet<String>) -> usize {
    let mut healed = 0;
    for (utterance, entry) in entries.iter_mut() {
        let should_be_exact = exact_tools.contains(&entry.tool);
        if entry.exact_only != should_be_exact {
            tracing::debug!(
                utterance = %utterance,
                tool = %entry.tool,
                exact_only = should_be_exact,
                "healing cache flag"
            );
            entry.exact_only = should_be_exact;
            healed += 1;
        }
    }
    healed
}

async fn build_index(
    encoder: &dyn Encoder,
    entries: &IndexMap<String, CacheEntry>,
) -> Result<EmbeddingIndex<String>> {
    let keys: Vec<&str> = entries
        .iter()
        .filter(|(_, entry)| !entry.exact_only)
        .map(|(key, _)| key.as_str())
        .collect();

    if keys.is_empty() {
        return Ok(EmbeddingIndex::new());
    }

    let vectors = encoder.encode_batch(&keys).await?;
    EmbeddingIndex::from_vectors(vectors, keys.into_iter().map(str::to_string).collect())
}
