//! Configuration management for the voice orchestrator
//!
//! Every field resolves as environment variable > TOML file > default.

pub mod file;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use self::file::OrchestratorConfigFile;
use crate::{Error, Result};

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Message broker
    pub mqtt: MqttConfig,
    /// Table document storage
    pub storage: StorageConfig,
    /// Home Assistant gateway
    pub home_assistant: HomeAssistantConfig,
    /// Fallback language model
    pub llm: LlmConfig,
    /// Embedding provider
    pub embedding: EmbeddingConfig,
    /// Resolution tuning
    pub resolver: ResolverConfig,
}

/// MQTT broker connection
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker host (`MQTT_HOST`)
    pub host: String,
    /// Broker port (`MQTT_PORT`)
    pub port: u16,
    /// Client id (`MQTT_CLIENT_ID`)
    pub client_id: String,
    /// Topic prefix (`MQTT_TOPIC_PREFIX`)
    pub topic_prefix: String,
    /// Keep-alive interval
    pub keep_alive: Duration,
}

/// Where the cache and route documents live
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// S3-compatible endpoint (`S3_ENDPOINT`)
    pub endpoint: String,
    /// Bucket (`S3_BUCKET`)
    pub bucket: String,
    /// Signing region (`S3_REGION`)
    pub region: String,
    /// Access key id (`S3_ACCESS_KEY`)
    pub access_key: String,
    /// Secret key (`S3_SECRET_KEY`)
    pub secret_key: SecretString,
    /// Tool cache document key
    pub cache_key: String,
    /// Route table document key
    pub routes_key: String,
    /// Use this directory instead of object storage (`STORAGE_DIR`)
    pub local_dir: Option<PathBuf>,
}

/// Home Assistant connection
#[derive(Debug, Clone)]
pub struct HomeAssistantConfig {
    /// Base URL (`HA_URL`)
    pub url: String,
    /// Long-lived access token (`HA_TOKEN`)
    pub token: Option<SecretString>,
    /// Entity label exposed to voice control (`HA_LABEL`)
    pub label: String,
    /// Request timeout
    pub timeout: Duration,
}

/// OpenAI-compatible chat endpoint
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL (`LLM_URL`)
    pub url: String,
    /// Model tag (`LLM_MODEL`)
    pub model: String,
    /// API key (`LLM_API_KEY`)
    pub api_key: Option<SecretString>,
    /// Request timeout
    pub timeout: Duration,
}

/// OpenAI-compatible embeddings endpoint
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Base URL (`EMBEDDING_URL`)
    pub url: String,
    /// Model (`EMBEDDING_MODEL`)
    pub model: String,
    /// API key (`EMBEDDING_API_KEY`)
    pub api_key: Option<SecretString>,
}

/// Thresholds, timeouts and replies of the resolution pipeline
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Fuzzy cache hit threshold
    pub cache_threshold: f32,
    /// Router score the fast path must exceed
    pub fast_path_threshold: f32,
    /// Router score above which fallback tools are narrowed
    pub routing_threshold: f32,
    /// Router classification threshold
    pub router_threshold: f32,
    /// Sanitizer replacement threshold
    pub sanitizer_threshold: f64,
    /// Minimum vocabulary entry length
    pub min_vocabulary_len: usize,
    /// Upper bound for resolving one intent
    pub intent_timeout: Duration,
    /// Upper bound for one tool call
    pub tool_timeout: Duration,
    /// How often the vocabulary is refreshed
    pub vocabulary_refresh: Duration,
    /// Reply when nothing produced text
    pub fallback_reply: String,
    /// Tool definitions file (`TOOLS_FILE`); embedded defaults when unset
    pub tools_file: Option<PathBuf>,
    /// Ducked media volume; `None` disables ducking
    pub duck_volume: Option<f64>,
}

impl Config {
    /// Load configuration from the environment and the TOML file
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file is unusable or the merged
    /// values are invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path)?;
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed file with environment lookups
    ///
    /// # Errors
    ///
    /// Returns error if the merged values are invalid
    #[allow(clippy::needless_pass_by_value, clippy::too_many_lines)]
    pub fn from_sources(
        fc: OrchestratorConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let parsed = |key: &str| -> Option<u64> { parse_env(&env, key) };

        let mqtt = MqttConfig {
            host: env("MQTT_HOST")
                .or(fc.mqtt.host)
                .unwrap_or_else(|| "localhost".to_string()),
            port: parse_env(&env, "MQTT_PORT").or(fc.mqtt.port).unwrap_or(1883),
            client_id: env("MQTT_CLIENT_ID")
                .or(fc.mqtt.client_id)
                .unwrap_or_else(|| "voice-orchestrator".to_string()),
            topic_prefix: env("MQTT_TOPIC_PREFIX")
                .or(fc.mqtt.topic_prefix)
                .unwrap_or_else(|| crate::broker::DEFAULT_TOPIC_PREFIX.to_string()),
            keep_alive: Duration::from_secs(fc.mqtt.keep_alive_secs.unwrap_or(30)),
        };

        let storage = StorageConfig {
            endpoint: env("S3_ENDPOINT")
                .or(fc.storage.endpoint)
                .unwrap_or_else(|| "http://localhost:3900".to_string()),
            bucket: env("S3_BUCKET")
                .or(fc.storage.bucket)
                .unwrap_or_else(|| "voice-commands".to_string()),
            region: env("S3_REGION")
                .or(fc.storage.region)
                .unwrap_or_else(|| "garage".to_string()),
            access_key: env("S3_ACCESS_KEY").or(fc.storage.access_key).unwrap_or_default(),
            secret_key: SecretString::from(
                env("S3_SECRET_KEY")
                    .or(fc.storage.secret_key)
                    .unwrap_or_default(),
            ),
            cache_key: fc
                .storage
                .cache_key
                .unwrap_or_else(|| "tool_cache.json".to_string()),
            routes_key: fc.storage.routes_key.unwrap_or_else(|| "routes.json".to_string()),
            local_dir: env("STORAGE_DIR").or(fc.storage.local_dir).map(PathBuf::from),
        };

        let home_assistant = HomeAssistantConfig {
            url: env("HA_URL")
                .or(fc.home_assistant.url)
                .unwrap_or_else(|| "http://homeassistant.local:8123".to_string()),
            token: env("HA_TOKEN").or(fc.home_assistant.token).map(SecretString::from),
            label: env("HA_LABEL")
                .or(fc.home_assistant.label)
                .unwrap_or_else(|| crate::home::DEFAULT_ENTITY_LABEL.to_string()),
            timeout: Duration::from_secs(fc.home_assistant.timeout_secs.unwrap_or(10)),
        };

        let llm_url = env("LLM_URL")
            .or(fc.llm.url)
            .unwrap_or_else(|| "http://localhost:11434/v1".to_string());

        let embedding = EmbeddingConfig {
            url: env("EMBEDDING_URL")
                .or(fc.embedding.url)
                .unwrap_or_else(|| llm_url.clone()),
            model: env("EMBEDDING_MODEL")
                .or(fc.embedding.model)
                .unwrap_or_else(|| "all-minilm".to_string()),
            api_key: env("EMBEDDING_API_KEY")
                .or(fc.embedding.api_key)
                .map(SecretString::from),
        };

        let llm = LlmConfig {
            url: llm_url,
            model: env("LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| "qwen3:1.7b".to_string()),
            api_key: env("LLM_API_KEY").or(fc.llm.api_key).map(SecretString::from),
            timeout: Duration::from_secs(fc.llm.timeout_secs.unwrap_or(30)),
        };

        let r = fc.resolver;
        let resolver = ResolverConfig {
            cache_threshold: parse_env(&env, "CACHE_THRESHOLD")
                .or(r.cache_threshold)
                .unwrap_or(0.92),
            fast_path_threshold: r.fast_path_threshold.unwrap_or(0.85),
            routing_threshold: r.routing_threshold.unwrap_or(0.6),
            router_threshold: r
                .router_threshold
                .unwrap_or(crate::semantic::DEFAULT_MATCH_THRESHOLD),
            sanitizer_threshold: r
                .sanitizer_threshold
                .unwrap_or(crate::sanitizer::DEFAULT_THRESHOLD),
            min_vocabulary_len: r
                .min_vocabulary_len
                .unwrap_or(crate::sanitizer::DEFAULT_MIN_WORD_LEN),
            intent_timeout: Duration::from_secs(
                parsed("INTENT_TIMEOUT_SECS")
                    .or(r.intent_timeout_secs)
                    .unwrap_or(45),
            ),
            tool_timeout: Duration::from_secs(r.tool_timeout_secs.unwrap_or(10)),
            vocabulary_refresh: Duration::from_secs(r.vocabulary_refresh_secs.unwrap_or(3600)),
            fallback_reply: r
                .fallback_reply
                .unwrap_or_else(|| crate::pipeline::DEFAULT_FALLBACK_REPLY.to_string()),
            tools_file: env("TOOLS_FILE").or(r.tools_file).map(PathBuf::from),
            duck_volume: parse_env(&env, "DUCK_VOLUME").or(r.duck_volume),
        };

        let config = Self {
            mqtt,
            storage,
            home_assistant,
            llm,
            embedding,
            resolver,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns error naming the first invalid value
    pub fn validate(&self) -> Result<()> {
        let r = &self.resolver;
        for (name, value) in [
            ("cache_threshold", r.cache_threshold),
            ("fast_path_threshold", r.fast_path_threshold),
            ("routing_threshold", r.routing_threshold),
            ("router_threshold", r.router_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{name} must be within 0..=1, got {value}")));
            }
        }
        if !(0.0..=1.0).contains(&r.sanitizer_threshold) {
            return Err(Error::Config(format!(
                "sanitizer_threshold must be within 0..=1, got {}",
                r.sanitizer_threshold
            )));
        }
        if let Some(volume) = r.duck_volume
            && !(0.0..=1.0).contains(&volume)
        {
            return Err(Error::Config(format!("duck_volume must be within 0..=1, got {volume}")));
        }
        if r.intent_timeout.is_zero() {
            return Err(Error::Config("intent timeout must be positive".to_string()));
        }
        if self.llm.model.trim().is_empty() {
            return Err(Error::Config("llm model required".to_string()));
        }
        if self.embedding.model.trim().is_empty() {
            return Err(Error::Config("embedding model required".to_string()));
        }
        Ok(())
    }
}

/// Parse an environment value, ignoring (and logging) unparseable input
fn parse_env<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring invalid environment value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(OrchestratorConfigFile::default(), env(&[])).unwrap();

        assert_eq!(config.mqtt.host, "localhost");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.topic_prefix, "voice");
        assert_eq!(config.storage.bucket, "voice-commands");
        assert_eq!(config.storage.region, "garage");
        assert_eq!(config.storage.cache_key, "tool_cache.json");
        assert_eq!(config.storage.routes_key, "routes.json");
        assert_eq!(config.llm.url, "http://localhost:11434/v1");
        assert_eq!(config.embedding.url, config.llm.url);
        assert!((config.resolver.cache_threshold - 0.92).abs() < f32::EPSILON);
        assert!((config.resolver.router_threshold - 0.55).abs() < f32::EPSILON);
        assert_eq!(config.resolver.fallback_reply, "Das habe ich nicht verstanden.");
        assert!(config.resolver.duck_volume.is_none());
    }

    #[test]
    fn test_env_overrides_file() {
        let fc: OrchestratorConfigFile = toml::from_str(
            r#"
            [mqtt]
            host = "from-file"
            port = 1884

            [llm]
            model = "file-model"
            "#,
        )
        .unwrap();

        let config = Config::from_sources(
            fc,
            env(&[("MQTT_HOST", "from-env"), ("S3_SECRET_KEY", "s3cret")]),
        )
        .unwrap();

        assert_eq!(config.mqtt.host, "from-env");
        assert_eq!(config.mqtt.port, 1884);
        assert_eq!(config.llm.model, "file-model");
        assert_eq!(config.storage.secret_key.expose_secret(), "s3cret");
    }

    #[test]
    fn test_invalid_env_number_ignored() {
        let config =
            Config::from_sources(OrchestratorConfigFile::default(), env(&[("MQTT_PORT", "abc")]))
                .unwrap();
        assert_eq!(config.mqtt.port, 1883);
    }

    #[test]
    fn test_threshold_out_of_range() {
        let fc: OrchestratorConfigFile =
            toml::from_str("[resolver]\ncache_threshold = 1.5\n").unwrap();
        assert!(Config::from_sources(fc, env(&[])).is_err());
    }

    #[test]
    fn test_secrets_redacted_in_debug() {
        let config = Config::from_sources(
            OrchestratorConfigFile::default(),
            env(&[("HA_TOKEN", "super-secret-token")]),
        )
        .unwrap();
        assert!(!format!("{config:?}").contains("super-secret-token"));
    }
}
