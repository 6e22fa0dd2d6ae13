//! Embeddings over an OpenAI-compatible `/embeddings` endpoint

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::Encoder;
use crate::{Error, Result};

/// Default request timeout for embedding calls
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Text encoder backed by an OpenAI-compatible embedding API
///
/// Works with `OpenAI`, Ollama and llama.cpp servers alike.
#[derive(Debug, Clone)]
pub struct HttpEncoder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

impl HttpEncoder {
    /// Create an encoder for the given base URL (e.g. `http://localhost:11434/v1`)
    ///
    /// # Errors
    ///
    /// Returns error if the model name is empty or the HTTP client cannot be built
    pub fn new(base_url: &str, model: &str, api_key: Option<SecretString>) -> Result<Self> {
        if model.trim().is_empty() {
            return Err(Error::Config("embedding model required".to_string()));
        }

        let client = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    /// Embedding model identifier
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Encoder for HttpEncoder {
    async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        #[derive(serde::Serialize)]
        struct EmbeddingRequest<'a> {
            model: &'a str,
            input: &'a [&'a str],
        }

        #[derive(serde::Deserialize)]
        struct EmbeddingResponse {
            data: Vec<EmbeddingData>,
        }

        #[derive(serde::Deserialize)]
        struct EmbeddingData {
            embedding: Vec<f32>,
            index: usize,
        }

        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let mut builder = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!("embedding API error {status}: {body}")));
        }

        let mut result: EmbeddingResponse = response.json().await?;

        if result.data.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "requested {} embeddings, got {}",
                texts.len(),
                result.data.len()
            )));
        }

        // Sort by index to maintain input order
        result.data.sort_by_key(|d| d.index);

        Ok(result.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_model_rejected() {
        let result = HttpEncoder::new("http://localhost:11434/v1", "  ", None);
        assert!(result.is_err());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let encoder = HttpEncoder::new("http://localhost:11434/v1/", "all-minilm", None).unwrap();
        assert_eq!(encoder.base_url, "http://localhost:11434/v1");
        assert_eq!(encoder.model(), "all-minilm");
    }

    #[tokio::test]
    async fn test_empty_batch_skips_request() {
        let encoder = HttpEncoder::new("http://127.0.0.1:9", "all-minilm", None).unwrap();
        let result = encoder.encode_batch(&[]).await.unwrap();
        assert!(result.is_empty());
    }
}
