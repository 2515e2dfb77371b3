/// Batched, order-preserving encoding on top of an embedding provider
use super::{EmbeddingError, EmbeddingProvider};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Outcome of one encoding pass
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub processed: usize,
    pub batches: usize,
    pub duration_ms: u64,
}

/// Splits input into `batch_size` groups and checks every group's output
///
/// Output order always equals input order; a provider that returns the
/// wrong number of vectors or the wrong dimension fails the whole pass.
#[derive(Clone)]
pub struct BatchEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl BatchEmbedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Encode a single query
    pub fn encode_query(&self, query: &str) -> Result<Vec<f32>, EmbeddingError> {
        let vector = self.provider.embed(query)?;
        self.check_dimension(&vector)?;
        Ok(vector)
    }

    /// Encode many texts, batch by batch
    pub fn encode(&self, texts: &[String]) -> Result<(Vec<Vec<f32>>, BatchResult), EmbeddingError> {
        let start = Instant::now();
        let mut vectors = Vec::with_capacity(texts.len());
        let mut batches = 0;

        for batch in texts.chunks(self.batch_size) {
            let embeddings = self.provider.embed_batch(batch)?;
            if embeddings.len() != batch.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: batch.len(),
                    actual: embeddings.len(),
                });
            }
            for embedding in &embeddings {
                self.check_dimension(embedding)?;
            }
            vectors.extend(embeddings);
            batches += 1;
            debug!("Encoded batch {} ({} texts)", batches, batch.len());
        }

        let result = BatchResult {
            processed: vectors.len(),
            batches,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Encoded {} texts in {} batches with {} ({}ms)",
            result.processed,
            result.batches,
            self.model_name(),
            result.duration_ms
        );
        Ok((vectors, result))
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), EmbeddingError> {
        let expected = self.provider.dimension();
        if vector.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records batch sizes and can misbehave on demand
    struct CountingProvider {
        inner: HashEmbedder,
        calls: AtomicUsize,
        drop_last: bool,
    }

    impl EmbeddingProvider for CountingProvider {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.inner.embed(text)
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut out = self.inner.embed_batch(texts)?;
            if self.drop_last {
                out.pop();
            }
            Ok(out)
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    fn provider(drop_last: bool) -> Arc<CountingProvider> {
        Arc::new(CountingProvider {
            inner: HashEmbedder::new(32).unwrap(),
            calls: AtomicUsize::new(0),
            drop_last,
        })
    }

    #[test]
    fn test_encode_batches_in_order() {
        let provider = provider(false);
        let embedder = BatchEmbedder::new(provider.clone(), 4);
        let texts: Vec<String> = (0..10).map(|i| format!("document number {}", i)).collect();

        let (vectors, result) = embedder.encode(&texts).unwrap();
        assert_eq!(vectors.len(), 10);
        assert_eq!(result.batches, 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

        for (text, vector) in texts.iter().zip(vectors.iter()) {
            assert_eq!(&embedder.encode_query(text).unwrap(), vector);
        }
    }

    #[test]
    fn test_count_mismatch_is_error() {
        let embedder = BatchEmbedder::new(provider(true), 8);
        let texts = vec!["a".to_string(), "b".to_string()];
        assert!(matches!(
            embedder.encode(&texts),
            Err(EmbeddingError::CountMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_empty_input() {
        let embedder = BatchEmbedder::new(provider(false), 8);
        let (vectors, result) = embedder.encode(&[]).unwrap();
        assert!(vectors.is_empty());
        assert_eq!(result.batches, 0);
    }
}
