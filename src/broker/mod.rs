//! Message-broker topics and payloads
//!
//! Voice satellites talk to the orchestrator over a handful of topics, each
//! carrying a small JSON object keyed by `room`. Inbound messages become
//! [`InboundEvent`]s for the correlator; outbound messages are built as
//! [`OutboundMessage`]s and handed to a [`Publisher`].

mod mqtt;

pub use mqtt::{MqttBroker, MqttEvents, MqttPublisher};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Speaker label used when identification did not resolve anyone
pub const UNKNOWN_SPEAKER: &str = "unknown";

/// Default topic prefix
pub const DEFAULT_TOPIC_PREFIX: &str = "voice";

/// Topic names under a common prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_PREFIX)
    }
}

impl Topics {
    /// Create topic names under `prefix` (e.g. `voice` gives `voice/wake`)
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    fn topic(&self, name: &str) -> String {
        format!("{}/{name}", self.prefix)
    }

    /// Session start, published by the satellite on wake word
    #[must_use]
    pub fn wake(&self) -> String {
        self.topic("wake")
    }

    /// Session end, consumed and published
    #[must_use]
    pub fn session_end(&self) -> String {
        self.topic("session/end")
    }

    /// Speech-to-text result
    #[must_use]
    pub fn transcript(&self) -> String {
        self.topic("transcript")
    }

    /// Speaker identification result
    #[must_use]
    pub fn speaker_identified(&self) -> String {
        self.topic("speaker/identified")
    }

    /// Hardware-facing side effects for the satellite
    #[must_use]
    pub fn satellite_action(&self) -> String {
        self.topic("satellite/action")
    }

    /// Final spoken response for synthesis
    #[must_use]
    pub fn tts_generate(&self) -> String {
        self.topic("tts/generate")
    }

    /// Topics the orchestrator subscribes to
    #[must_use]
    pub fn subscriptions(&self) -> [String; 4] {
        [
            self.wake(),
            self.session_end(),
            self.transcript(),
            self.speaker_identified(),
        ]
    }
}

/// Event received from a satellite
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Wake word detected, a new session begins
    Wake {
        /// Room of the satellite
        room: String,
    },
    /// Session finished
    SessionEnd {
        /// Room of the satellite
        room: String,
    },
    /// Transcribed utterance
    Transcript {
        /// Room of the satellite
        room: String,
        /// Transcript text, possibly empty
        text: String,
    },
    /// Speaker identified
    SpeakerIdentified {
        /// Room of the satellite
        room: String,
        /// Speaker label
        speaker_id: String,
    },
}

impl InboundEvent {
    /// Room the event belongs to
    #[must_use]
    pub fn room(&self) -> &str {
        match self {
            Self::Wake { room }
            | Self::SessionEnd { room }
            | Self::Transcript { room, .. }
            | Self::SpeakerIdentified { room, .. } => room,
        }
    }
}

#[derive(Deserialize)]
struct RoomPayload {
    room: String,
}

#[derive(Deserialize)]
struct TranscriptPayload {
    room: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct SpeakerPayload {
    room: String,
    #[serde(default)]
    speaker_id: Option<String>,
}

/// Decode a broker message into an event
///
/// Returns `Ok(None)` for topics the orchestrator does not handle.
///
/// # Errors
///
/// Returns error if the payload is not valid JSON for the topic or names an
/// empty room
pub fn parse_event(topics: &Topics, topic: &str, payload: &[u8]) -> Result<Option<InboundEvent>> {
    let event = if topic == topics.wake() {
        let p: RoomPayload = serde_json::from_slice(payload)?;
        InboundEvent::Wake { room: p.room }
    } else if topic == topics.session_end() {
        let p: RoomPayload = serde_json::from_slice(payload)?;
        InboundEvent::SessionEnd { room: p.room }
    } else if topic == topics.transcript() {
        let p: TranscriptPayload = serde_json::from_slice(payload)?;
        InboundEvent::Transcript {
            room: p.room,
            text: p.text,
        }
    } else if topic == topics.speaker_identified() {
        let p: SpeakerPayload = serde_json::from_slice(payload)?;
        let speaker_id = p
            .speaker_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_SPEAKER.to_string());
        InboundEvent::SpeakerIdentified {
            room: p.room,
            speaker_id,
        }
    } else {
        return Ok(None);
    };

    if event.room().trim().is_empty() {
        return Err(Error::Broker(format!("empty room on {topic}")));
    }

    Ok(Some(event))
}

/// Client-facing side effect attached to a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SatelliteAction {
    /// Media volume was changed (percent)
    Volume {
        /// New level, 0-100
        level: u8,
    },
    /// A timer was started
    Timer {
        /// Duration in seconds
        seconds: u64,
    },
}

/// Message published by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Side effects for the satellite, sent before the spoken reply
    SatelliteAction {
        /// Target room
        room: String,
        /// Actions to perform
        actions: Vec<SatelliteAction>,
    },
    /// Spoken reply
    TtsGenerate {
        /// Target room
        room: String,
        /// Text to synthesize
        text: String,
    },
    /// Terminate the room's session
    SessionEnd {
        /// Target room
        room: String,
    },
}

impl OutboundMessage {
    /// Topic this message is published on
    #[must_use]
    pub fn topic(&self, topics: &Topics) -> String {
        match self {
            Self::SatelliteAction { .. } => topics.satellite_action(),
            Self::TtsGenerate { .. } => topics.tts_generate(),
            Self::SessionEnd { .. } => topics.session_end(),
        }
    }

    /// JSON payload
    #[must_use]
    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::SatelliteAction { room, actions } => {
                serde_json::json!({ "room": room, "actions": actions })
            }
            Self::TtsGenerate { room, text } => serde_json::json!({ "room": room, "text": text }),
            Self::SessionEnd { room } => serde_json::json!({ "room": room }),
        }
    }
}

/// Publishes raw payloads to the broker
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `payload` on `topic`
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// Serialize and publish an outbound message
///
/// # Errors
///
/// Returns error if the publisher fails
pub async fn send(
    publisher: &dyn Publisher,
    topics: &Topics,
    message: &OutboundMessage,
) -> Result<()> {
    let topic = message.topic(topics);
    let payload = serde_json::to_vec(&message.payload())?;
    tracing::debug!(topic = %topic, "publishing");
    publisher.publish(&topic, payload).await
}
