//! Semantic router
//!
//! Classifies an utterance into a coarse route (`media`, `timers`,
//! `home_control`, ...) by its nearest example phrase. Routes narrow the tool
//! set offered to the fallback model and feed the fast path.

use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::RwLock;

use super::{Loaded, Persister, load_document};
use crate::embedding::{EmbeddingIndex, Encoder};
use crate::storage::DocumentStore;
use crate::{Error, Result};

/// Default similarity a route match must reach
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.55;

/// Example phrases used when no route table has been stored yet
pub const DEFAULT_ROUTES: &[(&str, &[&str])] = &[
    (
        "media",
        &[
            "spiele musik im wohnzimmer",
            "mach das radio an",
            "nächstes lied bitte",
            "musik stoppen",
            "setze die lautstärke auf 50 prozent",
            "was läuft gerade",
            "leere die warteschlange",
            "musik fortsetzen",
        ],
    ),
    (
        "timers",
        &[
            "stell einen timer auf 5 minuten",
            "wecke mich in 10 minuten",
            "wie viel zeit ist noch auf dem timer",
            "timer abbrechen",
            "stoppe den alarm",
        ],
    ),
    (
        "home_control",
        &[
            "mach das licht in der küche an",
            "licht aus",
            "stell die heizung auf 22 grad",
            "aktiviere die szene schlafen",
            "mir ist kalt",
            "deckenleuchte büro aus",
            "schreibtischlampe aus",
            "tischlampe aus",
            "lichterkette aus",
            "lichterkette an",
            "thermostat auf 20 grad",
            "dimme das licht",
        ],
    ),
];

/// Best route candidate for a query
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch {
    /// Owning route of the nearest phrase
    pub route: String,
    /// Nearest example phrase
    pub phrase: String,
    /// Cosine similarity to that phrase
    pub score: f32,
}

/// Result of [`SemanticRouter::teach`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeachOutcome {
    /// Phrase added to the route
    Learned {
        /// Route taught
        route: String,
        /// Normalized phrase
        utterance: String,
    },
    /// Phrase already belongs to this route
    AlreadyKnown {
        /// Route taught
        route: String,
        /// Normalized phrase
        utterance: String,
    },
    /// Phrase belongs to another route; nothing changed
    Conflict {
        /// Route that already owns the phrase
        existing_route: String,
        /// Normalized phrase
        utterance: String,
    },
}

#[derive(Debug, Clone)]
struct RouteRow {
    route: String,
    phrase: String,
}

struct RouterState {
    routes: IndexMap<String, Vec<String>>,
    index: EmbeddingIndex<RouteRow>,
    generation: u64,
}

impl RouterState {
    /// Outcome for a phrase that is already taught, if it is
    fn existing(&self, route: &str, utterance: &str) -> Option<TeachOutcome> {
        let (owner, _) = self
            .routes
            .iter()
            .find(|(_, phrases)| phrases.iter().any(|p| p.to_lowercase() == utterance))?;

        Some(if owner == route {
            TeachOutcome::AlreadyKnown {
                route: route.to_string(),
                utterance: utterance.to_string(),
            }
        } else {
            TeachOutcome::Conflict {
                existing_route: owner.clone(),
                utterance: utterance.to_string(),
            }
        })
    }
}

/// Embedding router over example phrases pooled from all routes
pub struct SemanticRouter {
    encoder: Arc<dyn Encoder>,
    threshold: f32,
    state: RwLock<RouterState>,
    persister: Persister,
}

/// Default route table as an owned map
#[must_use]
pub fn default_routes() -> IndexMap<String, Vec<String>> {
    DEFAULT_ROUTES
        .iter()
        .map(|(route, phrases)| {
            (
                (*route).to_string(),
                phrases.iter().map(|p| (*p).to_string()).collect(),
            )
        })
        .collect()
}

impl SemanticRouter {
    /// Load the route table from `store`
    ///
    /// A missing or corrupt document starts from [`DEFAULT_ROUTES`] and
    /// writes them back.
    ///
    /// # Errors
    ///
    /// Returns error if the example phrases cannot be encoded
    pub async fn load(
        encoder: Arc<dyn Encoder>,
        store: Arc<dyn DocumentStore>,
        key: impl Into<String>,
        threshold: f32,
    ) -> Result<Self> {
        let key = key.into();

        let loaded = load_document::<IndexMap<String, Vec<String>>>(store.as_ref(), &key).await;
        let (routes, dirty) = match loaded {
            Loaded::Found(routes) => {
                tracing::info!(key = %key, routes = routes.len(), "loaded route table");
                (routes, false)
            }
            Loaded::Missing => {
                tracing::warn!(key = %key, "no usable route table found, using defaults");
                (default_routes(), true)
            }
            Loaded::Unavailable => (default_routes(), false),
        };

        let rows: Vec<RouteRow> = routes
            .iter()
            .flat_map(|(route, phrases)| {
                phrases.iter().map(move |phrase| RouteRow {
                    route: route.clone(),
                    phrase: phrase.clone(),
                })
            })
            .collect();

        let index = if rows.is_empty() {
            EmbeddingIndex::new()
        } else {
            let texts: Vec<&str> = rows.iter().map(|r| r.phrase.as_str()).collect();
            let vectors = encoder.encode_batch(&texts).await?;
            EmbeddingIndex::from_vectors(vectors, rows)?
        };

        tracing::info!(phrases = index.len(), "route index built");

        let router = Self {
            encoder,
            threshold,
            state: RwLock::new(RouterState {
                routes,
                index,
                generation: 1,
            }),
            persister: Persister::new(store, key),
        };

        if dirty {
            router.persist().await;
        }

        Ok(router)
    }

    /// Similarity a match must reach to count as routed
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Nearest example phrase regardless of threshold
    ///
    /// # Errors
    ///
    /// Returns error if the query cannot be encoded
    pub async fn match_details(&self, query: &str) -> Result<Option<RouteMatch>> {
        if self.state.read().await.index.is_empty() {
            return Ok(None);
        }

        let vector = self.encoder.encode(&query.trim().to_lowercase()).await?;

        let state = self.state.read().await;
        Ok(state.index.best_match(&vector).map(|(row, score)| RouteMatch {
            route: row.route.clone(),
            phrase: row.phrase.clone(),
            score,
        }))
    }

    /// Route of `query`, if the nearest phrase reaches the threshold
    ///
    /// # Errors
    ///
    /// Returns error if the query cannot be encoded
    pub async fn classify(&self, query: &str) -> Result<Option<String>> {
        let best = self.match_details(query).await?;
        Ok(best.filter(|m| m.score >= self.threshold).map(|m| m.route))
    }

    /// Teach `utterance` as an example of `route`
    ///
    /// A phrase owned by another route is reported as a conflict and leaves
    /// the table unchanged.
    ///
    /// # Errors
    ///
    /// Returns error if either argument is blank or the phrase cannot be
    /// encoded
    pub async fn teach(&self, route: &str, utterance: &str) -> Result<TeachOutcome> {
        let route = route.trim().to_lowercase();
        let utterance = utterance.trim().to_lowercase();
        if route.is_empty() || utterance.is_empty() {
            return Err(Error::InvalidInput("route and utterance are required".to_string()));
        }

        if let Some(outcome) = self.state.read().await.existing(&route, &utterance) {
            tracing::info!(?outcome, "phrase already taught");
            return Ok(outcome);
        }

        let vector = self.encoder.encode(&utterance).await?;

        {
            let mut state = self.state.write().await;
            if let Some(outcome) = state.existing(&route, &utterance) {
                return Ok(outcome);
            }
            state.index.push(
                &vector,
                RouteRow {
                    route: route.clone(),
                    phrase: utterance.clone(),
                },
            )?;
            state
                .routes
                .entry(route.clone())
                .or_default()
                .push(utterance.clone());
            state.generation += 1;
        }

        tracing::info!(route = %route, utterance = %utterance, "taught new route phrase");
        self.persist().await;

        Ok(TeachOutcome::Learned { route, utterance })
    }

    /// Snapshot of the route table
    pub async fn routes(&self) -> IndexMap<String, Vec<String>> {
        self.state.read().await.routes.clone()
    }

    /// Number of indexed example phrases
    pub async fn len(&self) -> usize {
        self.state.read().await.index.len()
    }

    /// Whether no example phrases are indexed
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.index.is_empty()
    }

    async fn persist(&self) {
        let (generation, body) = {
            let state = self.state.read().await;
            (state.generation, serde_json::to_vec_pretty(&state.routes))
        };

        match body {
            Ok(body) => self.persister.write(generation, body).await,
            Err(e) => tracing::error!(error = %e, "failed to serialize route table"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(routes: &[(&str, &[&str])]) -> RouterState {
        RouterState {
            routes: routes
                .iter()
                .map(|(r, p)| ((*r).to_string(), p.iter().map(|s| (*s).to_string()).collect()))
                .collect(),
            index: EmbeddingIndex::new(),
            generation: 1,
        }
    }

    #[test]
    fn test_existing_conflict() {
        let s = state(&[("home_control", &["licht aus"]), ("timers", &[])]);
        assert_eq!(
            s.existing("timers", "licht aus"),
            Some(TeachOutcome::Conflict {
                existing_route: "home_control".to_string(),
                utterance: "licht aus".to_string()
            })
        );
    }

    #[test]
    fn test_existing_is_case_insensitive() {
        let s = state(&[("home_control", &["Deckenleuchte Büro aus"])]);
        assert!(matches!(
            s.existing("home_control", "deckenleuchte büro aus"),
            Some(TeachOutcome::AlreadyKnown { .. })
        ));
        assert!(s.existing("home_control", "tischlampe an").is_none());
    }

    #[test]
    fn test_default_routes() {
        let routes = default_routes();
        assert_eq!(routes.len(), 3);
        assert!(routes["home_control"].contains(&"licht aus".to_string()));
        // phrases are unique across routes
        let total: usize = routes.values().map(Vec::len).sum();
        let unique: std::collections::HashSet<&String> = routes.values().flatten().collect();
        assert_eq!(total, unique.len());
    }
}
