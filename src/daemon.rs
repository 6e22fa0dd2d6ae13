//! Daemon - the orchestrator service
//!
//! Consumes broker events on a single loop, correlates them per room and
//! dispatches complete intents as independent tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::broker::{self, InboundEvent, MqttBroker, OutboundMessage, Publisher, Topics};
use crate::config::Config;
use crate::correlator::{EventCorrelator, ReadyIntent, Transition};
use crate::embedding::{Encoder, HttpEncoder};
use crate::home::{DeviceGateway, HomeAssistantClient};
use crate::llm::{ChatModel, OpenAiChatClient};
use crate::pipeline::{Collaborators, ResolutionPipeline, Thresholds};
use crate::sanitizer::Sanitizer;
use crate::semantic::{SemanticCache, SemanticRouter};
use crate::session::VolumeDucker;
use crate::storage::{DocumentStore, FileStore, S3Config, S3Store};
use crate::tools::{ToolExecutor, ToolRegistry};
use crate::{Error, Result};

/// Routes broker events through the correlator and supervises resolution
pub struct IntentDispatcher {
    correlator: EventCorrelator,
    pipeline: Arc<ResolutionPipeline>,
    publisher: Arc<dyn Publisher>,
    topics: Topics,
    ducker: Option<Arc<VolumeDucker>>,
    intent_timeout: Duration,
}

impl IntentDispatcher {
    /// Create a dispatcher publishing replies through `publisher`
    #[must_use]
    pub fn new(
        pipeline: Arc<ResolutionPipeline>,
        publisher: Arc<dyn Publisher>,
        topics: Topics,
        intent_timeout: Duration,
    ) -> Self {
        Self {
            correlator: EventCorrelator::new(),
            pipeline,
            publisher,
            topics,
            ducker: None,
            intent_timeout,
        }
    }

    /// Duck media players while a session is open
    #[must_use]
    pub fn with_ducker(mut self, ducker: Arc<VolumeDucker>) -> Self {
        self.ducker = Some(ducker);
        self
    }

    /// Pending intents, for inspection
    #[must_use]
    pub const fn correlator(&self) -> &EventCorrelator {
        &self.correlator
    }

    /// Apply one event
    ///
    /// The state transition happens before this returns; any follow-up work
    /// runs on a spawned task whose handle is returned.
    pub fn handle(&self, event: InboundEvent) -> Option<JoinHandle<()>> {
        match event {
            InboundEvent::Wake { room } => {
                tracing::info!(room = %room, "session started");
                self.correlator.wake(&room);
                self.ducker.as_ref().map(|ducker| {
                    let ducker = Arc::clone(ducker);
                    let epoch = ducker.open(&room);
                    tokio::spawn(async move { ducker.duck_session(&room, epoch).await })
                })
            }
            InboundEvent::SessionEnd { room } => {
                tracing::info!(room = %room, "session ended");
                self.correlator.end(&room);
                self.ducker.as_ref().map(|ducker| {
                    let ducker = Arc::clone(ducker);
                    ducker.close(&room);
                    tokio::spawn(async move { ducker.restore_saved(&room).await })
                })
            }
            InboundEvent::Transcript { room, text } => {
                tracing::debug!(room = %room, text = %text, "transcript received");
                let transition = self.correlator.transcript(&room, &text);
                self.follow_up(transition)
            }
            InboundEvent::SpeakerIdentified { room, speaker_id } => {
                tracing::debug!(room = %room, speaker = %speaker_id, "speaker identified");
                let transition = self.correlator.speaker(&room, &speaker_id);
                self.follow_up(transition)
            }
        }
    }

    fn follow_up(&self, transition: Transition) -> Option<JoinHandle<()>> {
        match transition {
            Transition::Pending => None,
            Transition::Ready(intent) => Some(self.spawn_resolution(intent)),
            Transition::Abort { room } => {
                tracing::info!(room = %room, "empty transcript, ending session");
                let publisher = Arc::clone(&self.publisher);
                let topics = self.topics.clone();
                Some(tokio::spawn(async move {
                    end_session(publisher.as_ref(), &topics, &room).await;
                }))
            }
        }
    }

    /// Resolve on a worker task; a panicking worker still ends the session
    fn spawn_resolution(&self, intent: ReadyIntent) -> JoinHandle<()> {
        let pipeline = Arc::clone(&self.pipeline);
        let publisher = Arc::clone(&self.publisher);
        let topics = self.topics.clone();
        let timeout = self.intent_timeout;

        tokio::spawn(async move {
            let room = intent.room.clone();
            let worker = tokio::spawn(resolve_and_reply(
                pipeline,
                Arc::clone(&publisher),
                topics.clone(),
                intent,
                timeout,
            ));

            if let Err(e) = worker.await {
                tracing::error!(room = %room, error = %e, "intent task failed");
                end_session(publisher.as_ref(), &topics, &room).await;
            }
        })
    }
}

async fn resolve_and_reply(
    pipeline: Arc<ResolutionPipeline>,
    publisher: Arc<dyn Publisher>,
    topics: Topics,
    intent: ReadyIntent,
    timeout: Duration,
) {
    tracing::info!(
        room = %intent.room,
        speaker = %intent.speaker,
        text = %intent.text,
        "resolving intent"
    );

    let Ok(resolution) = tokio::time::timeout(timeout, pipeline.resolve(&intent)).await else {
        tracing::error!(room = %intent.room, timeout = ?timeout, "intent resolution timed out");
        end_session(publisher.as_ref(), &topics, &intent.room).await;
        return;
    };

    tracing::info!(
        room = %intent.room,
        tier = %resolution.tier,
        reply = %resolution.reply,
        "intent resolved"
    );

    if !resolution.actions.is_empty() {
        let message = OutboundMessage::SatelliteAction {
            room: intent.room.clone(),
            actions: resolution.actions,
        };
        if let Err(e) = broker::send(publisher.as_ref(), &topics, &message).await {
            tracing::warn!(room = %intent.room, error = %e, "failed to publish satellite action");
        }
    }

    let message = OutboundMessage::TtsGenerate {
        room: intent.room.clone(),
        text: resolution.reply,
    };
    if let Err(e) = broker::send(publisher.as_ref(), &topics, &message).await {
        tracing::error!(room = %intent.room, error = %e, "failed to publish reply");
        end_session(publisher.as_ref(), &topics, &intent.room).await;
    }
}

async fn end_session(publisher: &dyn Publisher, topics: &Topics, room: &str) {
    let message = OutboundMessage::SessionEnd { room: room.to_string() };
    if let Err(e) = broker::send(publisher, topics, &message).await {
        tracing::error!(room, error = %e, "failed to publish session end");
    }
}

/// The orchestrator daemon
pub struct Daemon {
    config: Config,
    sanitizer: Arc<Sanitizer>,
    cache: Arc<SemanticCache>,
    router: Arc<SemanticRouter>,
    gateway: Arc<dyn DeviceGateway>,
    pipeline: Arc<ResolutionPipeline>,
}

impl Daemon {
    /// Connect collaborators and load the cache and route tables
    ///
    /// # Errors
    ///
    /// Returns error if a collaborator cannot be configured or the stored
    /// phrases cannot be encoded
    pub async fn new(config: Config) -> Result<Self> {
        let store = build_store(&config)?;

        let encoder = build_encoder(&config)?;

        let registry = Arc::new(match &config.resolver.tools_file {
            Some(path) => ToolRegistry::load(path)?,
            None => ToolRegistry::embedded_default()?,
        });
        tracing::info!(tools = registry.len(), "tool registry loaded");

        let router = Arc::new(
            SemanticRouter::load(
                Arc::clone(&encoder),
                Arc::clone(&store),
                &config.storage.routes_key,
                config.resolver.router_threshold,
            )
            .await?,
        );
        let cache = Arc::new(
            SemanticCache::load(
                encoder,
                store,
                &config.storage.cache_key,
                registry.exact_only_names(),
            )
            .await?,
        );

        let gateway = build_gateway(&config)?;

        let chat: Arc<dyn ChatModel> = Arc::new(OpenAiChatClient::new(
            &config.llm.url,
            &config.llm.model,
            config.llm.api_key.clone(),
            config.llm.timeout,
        )?);

        let executor = Arc::new(
            ToolExecutor::new(Arc::clone(&gateway))
                .with_router(Arc::clone(&router))
                .with_timeout(config.resolver.tool_timeout),
        );

        let sanitizer = Arc::new(Sanitizer::new(
            config.resolver.sanitizer_threshold,
            config.resolver.min_vocabulary_len,
        ));

        let thresholds = Thresholds {
            cache: config.resolver.cache_threshold,
            fast_path: config.resolver.fast_path_threshold,
            routing: config.resolver.routing_threshold,
        };
        let pipeline = Arc::new(ResolutionPipeline::standard(
            Collaborators {
                sanitizer: Arc::clone(&sanitizer),
                cache: Arc::clone(&cache),
                router: Arc::clone(&router),
                executor,
                registry,
                chat,
                gateway: Arc::clone(&gateway),
            },
            thresholds,
            config.resolver.fallback_reply.clone(),
        ));

        Ok(Self {
            config,
            sanitizer,
            cache,
            router,
            gateway,
            pipeline,
        })
    }

    /// Transcript sanitizer
    #[must_use]
    pub const fn sanitizer(&self) -> &Arc<Sanitizer> {
        &self.sanitizer
    }

    /// Learned tool cache
    #[must_use]
    pub const fn cache(&self) -> &Arc<SemanticCache> {
        &self.cache
    }

    /// Route classifier
    #[must_use]
    pub const fn router(&self) -> &Arc<SemanticRouter> {
        &self.router
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Reload the sanitizer vocabulary from the device gateway
    ///
    /// An empty result keeps the previous vocabulary.
    pub async fn refresh_vocabulary(&self) {
        refresh_vocabulary(self.gateway.as_ref(), &self.sanitizer).await;
    }

    /// Run until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the event loop cannot be started
    pub async fn run(self) -> Result<()> {
        self.refresh_vocabulary().await;

        let refresh_every = self.config.resolver.vocabulary_refresh;
        if !refresh_every.is_zero() {
            let gateway = Arc::clone(&self.gateway);
            let sanitizer = Arc::clone(&self.sanitizer);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(refresh_every);
                // Skip the first immediate tick
                interval.tick().await;

                loop {
                    interval.tick().await;
                    refresh_vocabulary(gateway.as_ref(), &sanitizer).await;
                }
            });
        }

        let topics = Topics::new(&self.config.mqtt.topic_prefix);
        let (publisher, mut events) = MqttBroker::connect(
            &self.config.mqtt.host,
            self.config.mqtt.port,
            &self.config.mqtt.client_id,
            self.config.mqtt.keep_alive,
            topics.clone(),
        );

        let mut dispatcher = IntentDispatcher::new(
            Arc::clone(&self.pipeline),
            Arc::new(publisher),
            topics.clone(),
            self.config.resolver.intent_timeout,
        );
        if let Some(volume) = self.config.resolver.duck_volume {
            let ducker = VolumeDucker::new(Arc::clone(&self.gateway), volume);
            dispatcher = dispatcher.with_ducker(Arc::new(ducker));
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(()).await;
            }
        });

        tracing::info!(prefix = %self.config.mqtt.topic_prefix, "orchestrator running");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("shutdown requested");
                    break;
                }
                (topic, payload) = events.next_message() => {
                    match broker::parse_event(&topics, &topic, &payload) {
                        Ok(Some(event)) => {
                            dispatcher.handle(event);
                        }
                        Ok(None) => {
                            tracing::debug!(
                                topic = %topic,
                                "ignoring message on unknown topic"
                            );
                        }
                        Err(e) => {
                            tracing::warn!(
                                topic = %topic,
                                error = %e,
                                "dropping malformed message"
                            );
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

async fn refresh_vocabulary(gateway: &dyn DeviceGateway, sanitizer: &Sanitizer) {
    let words = gateway.voice_vocabulary().await;
    if words.is_empty() {
        tracing::warn!("device gateway returned no vocabulary, keeping previous");
        return;
    }
    sanitizer.replace_vocabulary(&words);
    tracing::info!(entries = sanitizer.vocabulary_len(), "sanitizer vocabulary refreshed");
}

/// Document store selected by the storage config
///
/// # Errors
///
/// Returns error if the object storage settings are invalid
pub fn build_store(config: &Config) -> Result<Arc<dyn DocumentStore>> {
    if let Some(dir) = &config.storage.local_dir {
        tracing::info!(dir = %dir.display(), "using filesystem document store");
        return Ok(Arc::new(FileStore::new(dir)));
    }

    tracing::info!(
        endpoint = %config.storage.endpoint,
        bucket = %config.storage.bucket,
        "using object storage"
    );
    Ok(Arc::new(S3Store::new(S3Config {
        endpoint: config.storage.endpoint.clone(),
        bucket: config.storage.bucket.clone(),
        region: config.storage.region.clone(),
        access_key: config.storage.access_key.clone(),
        secret_key: config.storage.secret_key.clone(),
    })?))
}

/// Embedding client for the configured provider
///
/// # Errors
///
/// Returns error if the HTTP client cannot be built
pub fn build_encoder(config: &Config) -> Result<Arc<dyn Encoder>> {
    Ok(Arc::new(HttpEncoder::new(
        &config.embedding.url,
        &config.embedding.model,
        config.embedding.api_key.clone(),
    )?))
}

/// Home Assistant client
///
/// # Errors
///
/// Returns error if no token is configured or the client cannot be built
pub fn build_gateway(config: &Config) -> Result<Arc<dyn DeviceGateway>> {
    let token = config
        .home_assistant
        .token
        .clone()
        .ok_or_else(|| Error::Config("HA_TOKEN required".to_string()))?;
    Ok(Arc::new(HomeAssistantClient::new(
        &config.home_assistant.url,
        token,
        &config.home_assistant.label,
        config.home_assistant.timeout,
    )?))
}
