//! TOML configuration file loading
//!
//! Supports `~/.config/voice-orchestrator/config.toml` as a persistent config
//! source. All fields are optional; the file is a partial overlay on top of
//! defaults and below environment variables.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct OrchestratorConfigFile {
    /// Message broker
    #[serde(default)]
    pub mqtt: MqttFileConfig,

    /// Table document storage
    #[serde(default)]
    pub storage: StorageFileConfig,

    /// Home Assistant gateway
    #[serde(default)]
    pub home_assistant: HomeAssistantFileConfig,

    /// Fallback language model
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Embedding provider
    #[serde(default)]
    pub embedding: EmbeddingFileConfig,

    /// Resolution tuning
    #[serde(default)]
    pub resolver: ResolverFileConfig,
}

/// `[mqtt]`
#[derive(Debug, Default, Deserialize)]
pub struct MqttFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub client_id: Option<String>,
    pub topic_prefix: Option<String>,
    pub keep_alive_secs: Option<u64>,
}

/// `[storage]`
#[derive(Debug, Default, Deserialize)]
pub struct StorageFileConfig {
    /// S3-compatible endpoint URL
    pub endpoint: Option<String>,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Key of the tool cache document
    pub cache_key: Option<String>,
    /// Key of the route table document
    pub routes_key: Option<String>,
    /// Store documents in this directory instead of object storage
    pub local_dir: Option<String>,
}

/// `[home_assistant]`
#[derive(Debug, Default, Deserialize)]
pub struct HomeAssistantFileConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    /// Label of entities exposed to voice control
    pub label: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// `[llm]`
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    pub url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// `[embedding]`
#[derive(Debug, Default, Deserialize)]
pub struct EmbeddingFileConfig {
    pub url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

/// `[resolver]`
#[derive(Debug, Default, Deserialize)]
pub struct ResolverFileConfig {
    pub cache_threshold: Option<f32>,
    pub fast_path_threshold: Option<f32>,
    pub routing_threshold: Option<f32>,
    pub router_threshold: Option<f32>,
    pub sanitizer_threshold: Option<f64>,
    pub min_vocabulary_len: Option<usize>,
    pub intent_timeout_secs: Option<u64>,
    pub tool_timeout_secs: Option<u64>,
    pub vocabulary_refresh_secs: Option<u64>,
    pub fallback_reply: Option<String>,
    pub tools_file: Option<String>,
    /// Media volume while listening (0.0-1.0); unset disables ducking
    pub duck_volume: Option<f64>,
}

/// Load the TOML config file
///
/// An explicit `path` must exist and parse. Without one, the standard path
/// is used if present and a broken file there falls back to defaults.
///
/// # Errors
///
/// Returns error if an explicitly given file cannot be read or parsed
pub fn load_config_file(path: Option<&Path>) -> Result<OrchestratorConfigFile> {
    if let Some(path) = path {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        let config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(OrchestratorConfigFile::default());
    };

    if !path.exists() {
        return Ok(OrchestratorConfigFile::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                Ok(OrchestratorConfigFile::default())
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            Ok(OrchestratorConfigFile::default())
        }
    }
}

/// Return the config file path: `~/.config/voice-orchestrator/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.config_dir().join("voice-orchestrator").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file() {
        let config: OrchestratorConfigFile = toml::from_str(
            r#"
            [mqtt]
            host = "broker.local"

            [resolver]
            cache_threshold = 0.95
            duck_volume = 0.1
            "#,
        )
        .unwrap();

        assert_eq!(config.mqtt.host.as_deref(), Some("broker.local"));
        assert!(config.mqtt.port.is_none());
        assert_eq!(config.resolver.cache_threshold, Some(0.95));
        assert!(config.llm.model.is_none());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config_file(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn test_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[llm]\nmodel = \"qwen3:4b\"\n").unwrap();

        let config = load_config_file(Some(&path)).unwrap();
        assert_eq!(config.llm.model.as_deref(), Some("qwen3:4b"));
    }
}
