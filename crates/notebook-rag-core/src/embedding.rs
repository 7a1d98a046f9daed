//! Embedding provider trait and vector encoding helpers.
//!
//! Concrete providers (OpenAI, Ollama) live in the `notebook-rag` app crate.
//! Providers must classify their failures: timeouts and connection problems
//! as [`PipelineError::Timeout`] / [`PipelineError::Connection`] so the job
//! runner retries them, anything else as [`PipelineError::Provider`].

use async_trait::async_trait;

use crate::error::{PipelineError, Result};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single text.
pub async fn embed_one(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    provider
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::Provider("empty embedding response".to_string()))
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use notebook_rag_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyProvider;

    #[async_trait]
    impl EmbeddingProvider for EmptyProvider {
        fn model_name(&self) -> &str {
            "empty"
        }
        fn dims(&self) -> usize {
            0
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn empty_blob_decodes_to_empty_vec() {
        assert!(blob_to_vec(&[]).is_empty());
    }

    #[tokio::test]
    async fn embed_one_rejects_empty_response() {
        let err = embed_one(&EmptyProvider, "text").await.unwrap_err();
        assert!(matches!(err, PipelineError::Provider(_)));
        assert!(!err.is_transient());
    }
}
