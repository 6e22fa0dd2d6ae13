//! Error types for the voice orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving voice intents
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Remote document store error
    #[error("storage error: {0}")]
    Storage(String),

    /// Embedding provider error
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Fallback language model error
    #[error("llm error: {0}")]
    Llm(String),

    /// Device gateway (Home Assistant) error
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Tool registry or execution error
    #[error("tool error: {0}")]
    Tool(String),

    /// Message broker error
    #[error("broker error: {0}")]
    Broker(String),

    /// Rejected caller input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A collaborator did not answer in time
    #[error("timed out: {0}")]
    Timeout(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
