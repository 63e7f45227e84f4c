use crate::error::ModelError;
use crate::models::Chunk;
use crate::retry::{call_with_retry, CallPolicy};
use crate::traits::TextEmbedder;
use async_trait::async_trait;
use std::sync::{Arc, OnceLock};

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Deterministic trigram-hashing embedder. Needs no network, so it backs offline runs.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl TextEmbedder for CharacterNgramEmbedder {
    async fn embed_text(&self, text: &str, _model_id: &str) -> Result<Vec<f32>, ModelError> {
        Ok(self.embed(text))
    }
}

/// Wraps an embedding backend with an explicit model id, retry policy and a fixed
/// output dimension (declared up front or learned from the first vector).
pub struct Embedder<E> {
    backend: Arc<E>,
    model_id: String,
    policy: CallPolicy,
    dimensions: OnceLock<usize>,
}

impl<E> Embedder<E>
where
    E: TextEmbedder + Send + Sync,
{
    pub fn new(backend: Arc<E>, model_id: impl Into<String>, policy: CallPolicy) -> Self {
        Self {
            backend,
            model_id: model_id.into(),
            policy,
            dimensions: OnceLock::new(),
        }
    }

    pub fn with_dimensions(self, dimensions: usize) -> Self {
        let _ = self.dimensions.set(dimensions);
        self
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions.get().copied()
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        call_with_retry("embed_text", &self.policy, || async move {
            let vector = self.backend.embed_text(text, &self.model_id).await?;
            self.check_vector(vector)
        })
        .await
    }

    /// One slot per chunk; `None` marks an embedding that stayed missing after retries.
    pub async fn embed_chunks(&self, chunks: &[Chunk]) -> Vec<Option<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            match self.embed(&chunk.text).await {
                Ok(vector) => vectors.push(Some(vector)),
                Err(error) => {
                    tracing::warn!(
                        chunk_id = %chunk.chunk_id,
                        parent = %chunk.parent,
                        ordinal = chunk.ordinal,
                        error = %error,
                        "embedding missing"
                    );
                    vectors.push(None);
                }
            }
        }
        vectors
    }

    fn check_vector(&self, vector: Vec<f32>) -> Result<Vec<f32>, ModelError> {
        if vector.is_empty() {
            return Err(ModelError::InvalidResponse("empty embedding".to_string()));
        }
        if vector.iter().any(|value| !value.is_finite()) {
            return Err(ModelError::InvalidResponse(
                "embedding contains non-finite values".to_string(),
            ));
        }

        let expected = *self.dimensions.get_or_init(|| vector.len());
        if vector.len() != expected {
            return Err(ModelError::InvalidResponse(format!(
                "embedding dimension {} != {}",
                vector.len(),
                expected
            )));
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkKind, ChunkParent};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_policy() -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_secs(1),
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
        }
    }

    struct FlakyEmbedder {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl TextEmbedder for FlakyEmbedder {
        async fn embed_text(&self, text: &str, _model_id: &str) -> Result<Vec<f32>, ModelError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first || text.contains("poison") {
                Err(ModelError::Unknown("connection reset".to_string()))
            } else {
                Ok(vec![1.0, 0.0])
            }
        }
    }

    fn chunk(text: &str, ordinal: u32) -> Chunk {
        let parent = ChunkParent::File("a.rs".to_string());
        Chunk {
            chunk_id: Chunk::make_id(&parent, ChunkKind::Code, ordinal as usize),
            parent,
            kind: ChunkKind::Code,
            ordinal,
            start: ordinal as usize,
            end: ordinal as usize + text.len(),
            text: text.to_string(),
        }
    }

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("fn parse_config(path: &Path)");
        let second = embedder.embed("fn parse_config(path: &Path)");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed("abc");
        assert_eq!(vector.len(), 32);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let backend = Arc::new(FlakyEmbedder {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        let embedder = Embedder::new(backend.clone(), "embed-model", fast_policy());

        let vector = embedder.embed("hello").await;
        assert_eq!(vector, Ok(vec![1.0, 0.0]));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert_eq!(embedder.dimensions(), Some(2));
    }

    #[tokio::test]
    async fn exhausted_chunks_are_marked_missing() {
        let backend = Arc::new(FlakyEmbedder {
            calls: AtomicU32::new(0),
            fail_first: 0,
        });
        let embedder = Embedder::new(backend, "embed-model", fast_policy());
        let chunks = vec![chunk("good", 0), chunk("poison", 1), chunk("fine", 2)];

        let vectors = embedder.embed_chunks(&chunks).await;
        assert!(vectors[0].is_some());
        assert!(vectors[1].is_none());
        assert!(vectors[2].is_some());
    }

    #[tokio::test]
    async fn dimension_changes_are_rejected() {
        let embedder = Embedder::new(
            Arc::new(CharacterNgramEmbedder { dimensions: 8 }),
            "local",
            fast_policy(),
        )
        .with_dimensions(16);

        let result = embedder.embed("abc").await;
        assert!(matches!(result, Err(ModelError::InvalidResponse(_))));
    }
}
