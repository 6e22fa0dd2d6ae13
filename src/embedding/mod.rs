//! Text embeddings and normalized similarity indexes
//!
//! The embedding model itself is an opaque capability behind [`Encoder`].
//! Both the semantic cache and the semantic router keep their example
//! utterances in an [`EmbeddingIndex`]: a flat buffer of row-normalized
//! vectors with a parallel label list, queried by arg-max cosine.

mod http;

pub use http::HttpEncoder;

use async_trait::async_trait;

use crate::{Error, Result};

/// Lower bound for vector norms to avoid division by zero
const MIN_NORM: f32 = 1e-9;

/// Turns text into embedding vectors
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Encode several texts, preserving input order
    async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Encode a single text
    async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        self.encode_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("empty embedding response".to_string()))
    }
}

/// Scale a vector to unit length (norms are clamped to a small epsilon)
#[must_use]
pub fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt().max(MIN_NORM);
    vector.iter().map(|x| x / norm).collect()
}

/// Row-normalized embedding matrix with one label per row
#[derive(Debug, Clone)]
pub struct EmbeddingIndex<L> {
    dim: usize,
    rows: Vec<f32>,
    labels: Vec<L>,
}

impl<L> Default for EmbeddingIndex<L> {
    fn default() -> Self {
        Self {
            dim: 0,
            rows: Vec::new(),
            labels: Vec::new(),
        }
    }
}

impl<L> EmbeddingIndex<L> {
    /// Create an empty index
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from raw (unnormalized) vectors and their labels
    ///
    /// # Errors
    ///
    /// Returns error if the counts differ or the vectors disagree on dimension
    pub fn from_vectors(vectors: Vec<Vec<f32>>, labels: Vec<L>) -> Result<Self> {
        if vectors.len() != labels.len() {
            return Err(Error::Embedding(format!(
                "{} vectors for {} labels",
                vectors.len(),
                labels.len()
            )));
        }

        let mut index = Self::new();
        for (vector, label) in vectors.into_iter().zip(labels) {
            index.push(&vector, label)?;
        }
        Ok(index)
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the index has no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Labels in row order
    #[must_use]
    pub fn labels(&self) -> &[L] {
        &self.labels
    }

    /// Normalize and append a row
    ///
    /// # Errors
    ///
    /// Returns error if the vector is empty or its dimension does not match
    /// the rows already stored
    pub fn push(&mut self, vector: &[f32], label: L) -> Result<()> {
        if vector.is_empty() {
            return Err(Error::Embedding("cannot index an empty vector".to_string()));
        }
        if self.is_empty() {
            self.dim = vector.len();
        } else if vector.len() != self.dim {
            return Err(Error::Embedding(format!(
                "dimension mismatch: index has {}, vector has {}",
                self.dim,
                vector.len()
            )));
        }

        self.rows.extend(normalize(vector));
        self.labels.push(label);
        Ok(())
    }

    /// Find the row most similar to `query`
    ///
    /// Returns the label and cosine similarity of the best row, or `None`
    /// when the index is empty or the query has the wrong dimension.
    #[must_use]
    pub fn best_match(&self, query: &[f32]) -> Option<(&L, f32)> {
        if self.is_empty() || query.len() != self.dim {
            return None;
        }

        let query = normalize(query);
        self.rows
            .chunks_exact(self.dim)
            .map(|row| row.iter().zip(&query).map(|(a, b)| a * b).sum::<f32>())
            .zip(&self.labels)
            .fold(None, |best: Option<(&L, f32)>, (score, label)| match best {
                Some((_, top)) if top >= score => best,
                _ => Some((label, score)),
            })
    }
}
