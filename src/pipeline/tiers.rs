//! Standard resolution tiers

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{ExecutedCall, FastPathTable, IntentRequest, Resolution, Resolver, Tier};
use crate::Result;
use crate::home::DeviceGateway;
use crate::llm::{ChatMessage, ChatModel};
use crate::semantic::{CacheLookup, SemanticCache, SemanticRouter};
use crate::tools::{ToolExecutor, ToolRegistry};

fn with_room(mut args: Map<String, Value>, room: &str) -> Map<String, Value> {
    args.insert("room".to_string(), Value::String(room.to_string()));
    args
}

/// Serves previously learned phrases from the semantic cache
pub struct CacheResolver {
    cache: Arc<SemanticCache>,
    executor: Arc<ToolExecutor>,
    threshold: f32,
}

impl CacheResolver {
    /// Create a cache tier accepting fuzzy hits at `threshold`
    #[must_use]
    pub fn new(cache: Arc<SemanticCache>, executor: Arc<ToolExecutor>, threshold: f32) -> Self {
        Self {
            cache,
            executor,
            threshold,
        }
    }
}

#[async_trait]
impl Resolver for CacheResolver {
    fn tier(&self) -> Tier {
        Tier::Cache
    }

    async fn try_resolve(&self, request: &IntentRequest) -> Result<Option<Resolution>> {
        let hit = match self.cache.get(&request.text, self.threshold).await? {
            CacheLookup::Hit(hit) => hit,
            CacheLookup::Miss { best_score } => {
                tracing::debug!(text = %request.text, best_score, "cache miss");
                return Ok(None);
            }
        };

        tracing::info!(
            text = %request.text,
            matched = %hit.utterance,
            tool = %hit.tool,
            score = hit.score,
            "cache hit, bypassing fallback"
        );

        let args = with_room(hit.args, &request.room);
        let outcome = self.executor.execute(&hit.tool, &args).await;
        Ok(Some(Resolution::from_tool(Tier::Cache, &hit.tool, args, outcome)))
    }
}

/// Runs fixed tool calls for canonical router phrases
pub struct FastPathResolver {
    router: Arc<SemanticRouter>,
    executor: Arc<ToolExecutor>,
    table: FastPathTable,
    threshold: f32,
}

impl FastPathResolver {
    /// Create a fast-path tier requiring a router score above `threshold`
    #[must_use]
    pub fn new(
        router: Arc<SemanticRouter>,
        executor: Arc<ToolExecutor>,
        table: FastPathTable,
        threshold: f32,
    ) -> Self {
        Self {
            router,
            executor,
            table,
            threshold,
        }
    }
}

#[async_trait]
impl Resolver for FastPathResolver {
    fn tier(&self) -> Tier {
        Tier::FastPath
    }

    async fn try_resolve(&self, request: &IntentRequest) -> Result<Option<Resolution>> {
        let Some(route) = request.route(&self.router).await else {
            return Ok(None);
        };
        if route.score <= self.threshold {
            return Ok(None);
        }
        let Some(call) = self.table.get(&route.phrase) else {
            return Ok(None);
        };

        tracing::info!(
            phrase = %route.phrase,
            tool = %call.tool,
            score = route.score,
            "fast path hit"
        );

        let args = with_room(call.args.clone(), &request.room);
        let outcome = self.executor.execute(&call.tool, &args).await;
        Ok(Some(Resolution::from_tool(Tier::FastPath, &call.tool, args, outcome)))
    }
}

/// Delegates to the language model with a route-narrowed tool set
pub struct FallbackResolver {
    router: Arc<SemanticRouter>,
    chat: Arc<dyn ChatModel>,
    gateway: Arc<dyn DeviceGateway>,
    registry: Arc<ToolRegistry>,
    executor: Arc<ToolExecutor>,
    routing_threshold: f32,
}

impl FallbackResolver {
    /// Create a fallback tier narrowing tools when the route score exceeds
    /// `routing_threshold`
    #[must_use]
    pub fn new(
        router: Arc<SemanticRouter>,
        chat: Arc<dyn ChatModel>,
        gateway: Arc<dyn DeviceGateway>,
        registry: Arc<ToolRegistry>,
        executor: Arc<ToolExecutor>,
        routing_threshold: f32,
    ) -> Self {
        Self {
            router,
            chat,
            gateway,
            registry,
            executor,
            routing_threshold,
        }
    }
}

#[async_trait]
impl Resolver for FallbackResolver {
    fn tier(&self) -> Tier {
        Tier::Fallback
    }

    async fn try_resolve(&self, request: &IntentRequest) -> Result<Option<Resolution>> {
        let route = request
            .route(&self.router)
            .await
            .filter(|m| m.score > self.routing_threshold)
            .map(|m| m.route.as_str());

        let tools = self.registry.for_route(route);
        match route {
            Some(route) => {
                tracing::info!(
                    route,
                    tools = tools.len(),
                    "narrowed tools for fallback"
                );
            }
            None => tracing::info!(tools = tools.len(), "no confident route, offering all tools"),
        }

        let context = self
            .gateway
            .device_context(&request.text, &request.room, route)
            .await;
        let messages = [
            ChatMessage::system(system_prompt(&context, &request.speaker, &request.room)),
            ChatMessage::user(&request.text),
        ];

        let reply = self.chat.complete(&messages, &tools).await?;

        let mut resolution = Resolution::text(Tier::Fallback, String::new());
        let mut replies = Vec::new();

        for call in reply.tool_calls {
            if !tools.iter().any(|t| t.name() == call.name) {
                tracing::warn!(
                    tool = %call.name,
                    "model called a tool it was not offered, ignoring"
                );
                continue;
            }

            let mut args = call.arguments;
            args.entry("room")
                .or_insert_with(|| Value::String(request.room.clone()));

            let outcome = self.executor.execute(&call.name, &args).await;
            if !outcome.reply.trim().is_empty() {
                replies.push(outcome.reply);
            }
            resolution.actions.extend(outcome.actions);
            resolution.executed.push(ExecutedCall {
                tool: call.name,
                arguments: args,
                success: outcome.success,
            });
        }

        resolution.reply = if replies.is_empty() {
            reply.content.unwrap_or_default()
        } else {
            replies.join(" ")
        };

        Ok(Some(resolution))
    }
}

fn system_prompt(device_context: &str, speaker: &str, room: &str) -> String {
    format!(
        "You are a smart home assistant.\n\
         Devices:\n{device_context}\n\
         Current Speaker: {speaker}\n\
         Control devices or answer questions based on status. \
         You must answer in german and keep the answers brief. \
         You mustn't include any entity ids in the response text. \
         Address the user by their name if it is known.\n\
         The user is currently in room: {room}"
    )
}
