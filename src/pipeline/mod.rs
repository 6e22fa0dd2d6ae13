//! Tiered intent resolution
//!
//! A ready intent is sanitized and then offered to an ordered list of
//! [`Resolver`]s. The first tier that produces a [`Resolution`] wins:
//!
//! 1. [`CacheResolver`]: exact or fuzzy match of a previously learned phrase
//! 2. [`FastPathResolver`]: canonical router phrase mapped to a fixed tool
//! 3. [`FallbackResolver`]: language model with a route-narrowed tool set
//!
//! Tool calls made by the fallback are learned into the cache so the next
//! identical utterance never reaches the model.

mod fast_path;
mod tiers;

pub use fast_path::{DEFAULT_FAST_PATHS, FastPathCall, FastPathTable};
pub use tiers::{CacheResolver, FallbackResolver, FastPathResolver};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::OnceCell;

use crate::Result;
use crate::broker::SatelliteAction;
use crate::correlator::ReadyIntent;
use crate::home::DeviceGateway;
use crate::llm::ChatModel;
use crate::sanitizer::Sanitizer;
use crate::semantic::{RouteMatch, SemanticCache, SemanticRouter};
use crate::tools::{ToolExecutor, ToolOutcome, ToolRegistry};

/// Reply used when nothing produced usable text
pub const DEFAULT_FALLBACK_REPLY: &str = "Das habe ich nicht verstanden.";

/// Similarity thresholds of the tiers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Minimum cache similarity for a fuzzy hit
    pub cache: f32,
    /// Router score the fast path must exceed
    pub fast_path: f32,
    /// Router score above which the fallback's tools are narrowed
    pub routing: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cache: 0.92,
            fast_path: 0.85,
            routing: 0.6,
        }
    }
}

/// Tier that produced a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Semantic cache
    Cache,
    /// Static fast-path table
    FastPath,
    /// Language-model fallback
    Fallback,
    /// No tier resolved the intent
    Unresolved,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cache => "cache",
            Self::FastPath => "fast_path",
            Self::Fallback => "fallback",
            Self::Unresolved => "unresolved",
        })
    }
}

/// A tool call made while resolving
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedCall {
    /// Tool name
    pub tool: String,
    /// Arguments as executed, including the room
    pub arguments: Map<String, Value>,
    /// Whether the tool succeeded
    pub success: bool,
}

/// Outcome of resolving one intent
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Spoken reply
    pub reply: String,
    /// Satellite side effects
    pub actions: Vec<SatelliteAction>,
    /// Tier that resolved the intent
    pub tier: Tier,
    /// Tool calls made by the tier
    pub executed: Vec<ExecutedCall>,
}

impl Resolution {
    /// Resolution from a single tool run
    #[must_use]
    pub fn from_tool(
        tier: Tier,
        tool: &str,
        arguments: Map<String, Value>,
        outcome: ToolOutcome,
    ) -> Self {
        Self {
            reply: outcome.reply,
            actions: outcome.actions,
            tier,
            executed: vec![ExecutedCall {
                tool: tool.to_string(),
                arguments,
                success: outcome.success,
            }],
        }
    }

    /// Text-only resolution
    #[must_use]
    pub fn text(tier: Tier, reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            actions: Vec::new(),
            tier,
            executed: Vec::new(),
        }
    }
}

/// An intent on its way through the tiers
///
/// The router is consulted at most once per intent, however many tiers ask.
#[derive(Debug)]
pub struct IntentRequest {
    /// Room the command was spoken in
    pub room: String,
    /// Sanitized transcript
    pub text: String,
    /// Speaker label
    pub speaker: String,
    route: OnceCell<Option<RouteMatch>>,
}

impl IntentRequest {
    /// Create a request for already sanitized text
    #[must_use]
    pub fn new(
        room: impl Into<String>,
        text: impl Into<String>,
        speaker: impl Into<String>,
    ) -> Self {
        Self {
            room: room.into(),
            text: text.into(),
            speaker: speaker.into(),
            route: OnceCell::new(),
        }
    }

    /// Nearest route phrase, computed on first use
    ///
    /// Router failures are logged and treated as "no match".
    pub async fn route(&self, router: &SemanticRouter) -> Option<&RouteMatch> {
        self.route
            .get_or_init(|| async {
                match router.match_details(&self.text).await {
                    Ok(Some(m)) => {
                        tracing::info!(
                            route = %m.route,
                            phrase = %m.phrase,
                            score = m.score,
                            "route match"
                        );
                        Some(m)
                    }
                    Ok(None) => None,
                    Err(e) => {
                        tracing::warn!(error = %e, "routing failed");
                        None
                    }
                }
            })
            .await
            .as_ref()
    }
}

/// One resolution tier
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Tier this resolver implements
    fn tier(&self) -> Tier;

    /// Resolve the request, or `Ok(None)` to pass it to the next tier
    async fn try_resolve(&self, request: &IntentRequest) -> Result<Option<Resolution>>;
}

/// Shared collaborators of the standard tiers
#[derive(Clone)]
pub struct Collaborators {
    /// Transcript sanitizer
    pub sanitizer: Arc<Sanitizer>,
    /// Tool cache
    pub cache: Arc<SemanticCache>,
    /// Route classifier
    pub router: Arc<SemanticRouter>,
    /// Tool runner
    pub executor: Arc<ToolExecutor>,
    /// Tool definitions
    pub registry: Arc<ToolRegistry>,
    /// Fallback model
    pub chat: Arc<dyn ChatModel>,
    /// Device gateway for prompt context
    pub gateway: Arc<dyn DeviceGateway>,
}

/// Sanitize → tiers → learn
pub struct ResolutionPipeline {
    sanitizer: Arc<Sanitizer>,
    cache: Arc<SemanticCache>,
    resolvers: Vec<Box<dyn Resolver>>,
    fallback_reply: String,
}

impl ResolutionPipeline {
    /// Pipeline over an explicit resolver list, tried in order
    #[must_use]
    pub fn new(
        sanitizer: Arc<Sanitizer>,
        cache: Arc<SemanticCache>,
        resolvers: Vec<Box<dyn Resolver>>,
        fallback_reply: impl Into<String>,
    ) -> Self {
        Self {
            sanitizer,
            cache,
            resolvers,
            fallback_reply: fallback_reply.into(),
        }
    }

    /// Cache, fast path and fallback in their standard order
    #[must_use]
    pub fn standard(
        parts: Collaborators,
        thresholds: Thresholds,
        fallback_reply: impl Into<String>,
    ) -> Self {
        let resolvers: Vec<Box<dyn Resolver>> = vec![
            Box::new(CacheResolver::new(
                Arc::clone(&parts.cache),
                Arc::clone(&parts.executor),
                thresholds.cache,
            )),
            Box::new(FastPathResolver::new(
                Arc::clone(&parts.router),
                Arc::clone(&parts.executor),
                FastPathTable::defaults(),
                thresholds.fast_path,
            )),
            Box::new(FallbackResolver::new(
                parts.router,
                parts.chat,
                parts.gateway,
                parts.registry,
                parts.executor,
                thresholds.routing,
            )),
        ];

        Self::new(parts.sanitizer, parts.cache, resolvers, fallback_reply)
    }

    /// Resolve a complete intent into a reply and side effects
    ///
    /// Tier errors are logged and the next tier is tried; the reply is never
    /// empty.
    pub async fn resolve(&self, intent: &ReadyIntent) -> Resolution {
        let text = self.sanitizer.sanitize(&intent.text);
        if text != intent.text.to_lowercase() {
            tracing::info!(
                room = %intent.room,
                original = %intent.text,
                sanitized = %text,
                "transcript corrected"
            );
        }

        let request = IntentRequest::new(&intent.room, text, &intent.speaker);

        let mut resolution = Resolution::text(Tier::Unresolved, String::new());
        for resolver in &self.resolvers {
            let tier = resolver.tier();
            match resolver.try_resolve(&request).await {
                Ok(Some(resolved)) => {
                    tracing::info!(room = %request.room, %tier, "intent resolved");
                    resolution = resolved;
                    break;
                }
                Ok(None) => tracing::debug!(room = %request.room, %tier, "tier passed"),
                Err(e) => {
                    tracing::warn!(
                        room = %request.room,
                        %tier,
                        error = %e,
                        "tier failed, trying next"
                    );
                }
            }
        }

        if resolution.tier == Tier::Fallback {
            self.learn(&request.text, &resolution.executed).await;
        }

        if resolution.reply.trim().is_empty() {
            resolution.reply.clone_from(&self.fallback_reply);
        }

        resolution
    }

    /// Cache every successful fallback tool call under the utterance
    async fn learn(&self, utterance: &str, executed: &[ExecutedCall]) {
        for call in executed.iter().filter(|c| c.success) {
            let mut args = call.arguments.clone();
            args.remove("room");

            if let Err(e) = self.cache.add(utterance, &call.tool, args).await {
                tracing::warn!(utterance, tool = %call.tool, error = %e, "failed to learn phrase");
            }
        }
    }
}
