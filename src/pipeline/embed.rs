//! Text embeddings through an `edgequake_llm` embedding provider.
//!
//! By default the provider is the OpenAI-compatible client pointed at
//! `RagConfig::base_url` (DashScope compatible mode), so the configured key,
//! endpoint and model are used as given. Inputs are sent in batches of
//! `embed_batch_size`; each batch is retried with exponential backoff while
//! the provider reports a recoverable error.

use crate::config::RagConfig;
use crate::error::RagError;
use crate::pipeline::vlm::openai_compatible_provider;
use async_trait::async_trait;
use edgequake_llm::EmbeddingProvider;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Produces one vector per input text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier stored alongside each collection.
    fn model_name(&self) -> &str;

    /// Embed a batch of texts. The output has the same length and order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError>;

    /// Embed a single query.
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, RagError> {
        self.embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(RagError::EmbeddingCountMismatch {
                expected: 1,
                got: 0,
            })
    }
}

/// [`Embedder`] backed by an `edgequake_llm` [`EmbeddingProvider`].
pub struct ProviderEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    timeout_secs: u64,
}

impl ProviderEmbedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &RagConfig) -> Self {
        Self {
            provider,
            batch_size: config.embed_batch_size.max(1),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            timeout_secs: config.api_timeout_secs,
        }
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut last_err = String::from("Unknown error");

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Embedding retry {}/{} after {}ms",
                    attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let call = self.provider.embed(batch);
            match timeout(Duration::from_secs(self.timeout_secs), call).await {
                Ok(Ok(vectors)) => {
                    if vectors.len() != batch.len() {
                        return Err(RagError::EmbeddingCountMismatch {
                            expected: batch.len(),
                            got: vectors.len(),
                        });
                    }
                    return Ok(vectors);
                }
                Ok(Err(e)) => {
                    last_err = e.to_string();
                    if !e.is_recoverable() {
                        // Bad key, bad model, oversized input: retrying cannot help.
                        break;
                    }
                    warn!("Embedding attempt {} failed — {}", attempt + 1, last_err);
                }
                Err(_) => {
                    last_err = format!("timed out after {}s", self.timeout_secs);
                    warn!("Embedding attempt {} {}", attempt + 1, last_err);
                }
            }
        }

        Err(RagError::EmbeddingApiError { message: last_err })
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    fn model_name(&self) -> &str {
        self.provider.model()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let start = Instant::now();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        debug!(
            "Embedded {} texts with {} ({} per batch) in {:?}",
            texts.len(),
            self.provider.model(),
            self.batch_size,
            start.elapsed()
        );
        Ok(vectors)
    }
}

/// Use the injected embedder if any, otherwise the OpenAI-compatible
/// provider built from the config.
pub fn resolve_embedder(config: &RagConfig) -> Result<Arc<dyn Embedder>, RagError> {
    if let Some(ref embedder) = config.embedder {
        return Ok(Arc::clone(embedder));
    }
    let provider = openai_compatible_provider(config)?;
    Ok(Arc::new(ProviderEmbedder::new(Arc::new(provider), config)))
}
