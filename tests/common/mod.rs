//! Shared test utilities
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use voice_orchestrator::broker::Publisher;
use voice_orchestrator::home::DeviceGateway;
use voice_orchestrator::llm::{ChatMessage, ChatModel, ChatReply, ToolCall, ToolDefinition};
use voice_orchestrator::pipeline::{Collaborators, ResolutionPipeline, Thresholds};
use voice_orchestrator::semantic::{SemanticCache, SemanticRouter};
use voice_orchestrator::storage::MemoryStore;
use voice_orchestrator::tools::{ToolExecutor, ToolRegistry};
use voice_orchestrator::{Result, Sanitizer};

pub const CACHE_KEY: &str = "tool_cache.json";
pub const ROUTES_KEY: &str = "routes.json";

/// Keywords used by [`KeywordEncoder::standard`]
pub const KEYWORDS: &[&str] = &["licht", "musik", "timer", "stoppen", "heizung", "queen"];

/// Deterministic encoder: one dimension per keyword contained in the text
pub struct KeywordEncoder {
    keywords: Vec<String>,
    calls: AtomicUsize,
}

impl KeywordEncoder {
    pub fn new(keywords: &[&str]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn standard() -> Arc<Self> {
        Arc::new(Self::new(KEYWORDS))
    }

    /// Number of texts encoded so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let text = text.to_lowercase();
        self.keywords
            .iter()
            .map(|k| if text.contains(k.as_str()) { 1.0 } else { 0.0 })
            .collect()
    }
}

#[async_trait]
impl voice_orchestrator::embedding::Encoder for KeywordEncoder {
    async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Gateway that records service calls and serves canned states
pub struct RecordingGateway {
    calls: Mutex<Vec<(String, String, Value)>>,
    states: Mutex<HashMap<String, Value>>,
    context_routes: Mutex<Vec<Option<String>>>,
    vocabulary: Vec<String>,
    succeed: AtomicBool,
    state_delay: Mutex<Duration>,
}

impl RecordingGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            states: Mutex::new(HashMap::new()),
            context_routes: Mutex::new(Vec::new()),
            vocabulary: vec!["küche".to_string(), "wohnzimmer".to_string()],
            succeed: AtomicBool::new(true),
            state_delay: Mutex::new(Duration::ZERO),
        })
    }

    pub fn set_state(&self, entity_id: &str, state: Value) {
        self.states.lock().unwrap().insert(entity_id.to_string(), state);
    }

    /// Delay every state read by `delay`
    pub fn set_state_delay(&self, delay: Duration) {
        *self.state_delay.lock().unwrap() = delay;
    }

    pub fn set_succeed(&self, succeed: bool) {
        self.succeed.store(succeed, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(String, String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    /// Routes passed to `device_context`, in call order
    pub fn context_routes(&self) -> Vec<Option<String>> {
        self.context_routes.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceGateway for RecordingGateway {
    async fn call_service(&self, domain: &str, service: &str, payload: Value) -> bool {
        self.calls
            .lock()
            .unwrap()
            .push((domain.to_string(), service.to_string(), payload));
        self.succeed.load(Ordering::SeqCst)
    }

    async fn get_state(&self, entity_id: &str) -> Option<Value> {
        let delay = *self.state_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.states.lock().unwrap().get(entity_id).cloned()
    }

    async fn voice_vocabulary(&self) -> Vec<String> {
        self.vocabulary.clone()
    }

    async fn device_context(&self, _text: &str, _room: &str, route: Option<&str>) -> String {
        self.context_routes
            .lock()
            .unwrap()
            .push(route.map(ToString::to_string));
        "{\"entity_id\": \"light.kueche\", \"name\": \"Küche\", \"state\": \"on\"}".to_string()
    }
}

/// What the scripted model does when called
#[derive(Debug, Clone, Copy)]
pub enum ChatMode {
    Reply,
    Panic,
    Delay(Duration),
}

/// A request seen by [`ScriptedChat`]
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<String>,
}

/// Model returning queued replies (an empty reply once the queue is drained)
pub struct ScriptedChat {
    replies: Mutex<VecDeque<ChatReply>>,
    requests: Mutex<Vec<ChatRequest>>,
    mode: ChatMode,
}

impl ScriptedChat {
    pub fn new(replies: Vec<ChatReply>) -> Arc<Self> {
        Self::with_mode(replies, ChatMode::Reply)
    }

    pub fn with_mode(replies: Vec<ChatReply>, mode: ChatMode) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            mode,
        })
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatReply> {
        self.requests.lock().unwrap().push(ChatRequest {
            messages: messages.to_vec(),
            tools: tools.iter().map(|t| t.name().to_string()).collect(),
        });

        match self.mode {
            ChatMode::Reply => {}
            ChatMode::Panic => panic!("scripted model failure"),
            ChatMode::Delay(delay) => tokio::time::sleep(delay).await,
        }

        Ok(self.replies.lock().unwrap().pop_front().unwrap_or_default())
    }
}

/// Text-only model reply
pub fn text_reply(text: &str) -> ChatReply {
    ChatReply {
        content: Some(text.to_string()),
        tool_calls: Vec::new(),
    }
}

/// Model reply requesting a single tool call
pub fn tool_reply(name: &str, arguments: Value) -> ChatReply {
    let arguments: Map<String, Value> = match arguments {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    ChatReply {
        content: None,
        tool_calls: vec![ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments,
        }],
    }
}

/// Publisher that records every message as parsed JSON
#[derive(Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<(String, Value)>>,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<(String, Value)> {
        self.messages.lock().unwrap().clone()
    }

    /// Payloads published on `topic`
    pub fn on(&self, topic: &str) -> Vec<Value> {
        self.messages()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload)
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let payload: Value = serde_json::from_slice(&payload)?;
        self.messages.lock().unwrap().push((topic.to_string(), payload));
        Ok(())
    }
}

/// A pipeline wired to in-memory fakes
pub struct Harness {
    pub encoder: Arc<KeywordEncoder>,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<RecordingGateway>,
    pub chat: Arc<ScriptedChat>,
    pub cache: Arc<SemanticCache>,
    pub router: Arc<SemanticRouter>,
    pub pipeline: Arc<ResolutionPipeline>,
}

impl Harness {
    pub async fn new(chat: Arc<ScriptedChat>) -> Self {
        Self::with_gateway(chat, RecordingGateway::new()).await
    }

    pub async fn with_gateway(chat: Arc<ScriptedChat>, gateway: Arc<RecordingGateway>) -> Self {
        let encoder = KeywordEncoder::standard();
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ToolRegistry::embedded_default().unwrap());

        let router = Arc::new(
            SemanticRouter::load(encoder.clone(), store.clone(), ROUTES_KEY, 0.55)
                .await
                .unwrap(),
        );
        let cache = Arc::new(
            SemanticCache::load(
                encoder.clone(),
                store.clone(),
                CACHE_KEY,
                registry.exact_only_names(),
            )
            .await
            .unwrap(),
        );
        let executor = Arc::new(ToolExecutor::new(gateway.clone()).with_router(router.clone()));

        let pipeline = Arc::new(ResolutionPipeline::standard(
            Collaborators {
                sanitizer: Arc::new(Sanitizer::default()),
                cache: cache.clone(),
                router: router.clone(),
                executor,
                registry,
                chat: chat.clone(),
                gateway: gateway.clone(),
            },
            Thresholds::default(),
            "Das habe ich nicht verstanden.",
        ));

        Self {
            encoder,
            store,
            gateway,
            chat,
            cache,
            router,
            pipeline,
        }
    }
}

/// Build a JSON argument map
pub fn args(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Payload with only a room
pub fn room_payload(room: &str) -> Value {
    json!({ "room": room })
}
