//! Vision-language model calls.
//!
//! Two jobs go through the VLM: describing figures at ingestion time and
//! writing the final answer from retrieved text and images. Both are one
//! system message plus one user turn carrying text and zero or more images,
//! so a single [`VisionModel`] seam covers them and tests can swap in a
//! scripted model.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors are transient under load. Exponential backoff
//! (`retry_backoff_ms * 2^attempt`) gives 500 ms → 1 s → 2 s with the
//! defaults. Each attempt is bounded by `api_timeout_secs`.

use crate::config::RagConfig;
use crate::error::RagError;
use crate::pipeline::encode::EncodedImage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, OpenAIProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// One multimodal request: a system prompt and a user turn.
#[derive(Debug, Clone, Default)]
pub struct VisionRequest {
    pub system: String,
    pub text: String,
    pub images: Vec<EncodedImage>,
}

/// The model's answer plus token accounting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisionReply {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// A model that can read text and images and reply with text.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Model identifier, for logs.
    fn name(&self) -> &str;

    async fn complete(&self, request: VisionRequest) -> Result<VisionReply, RagError>;
}

/// [`VisionModel`] backed by an `edgequake_llm` provider.
pub struct ProviderVisionModel {
    provider: Arc<dyn LLMProvider>,
    model: String,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    timeout_secs: u64,
}

impl ProviderVisionModel {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>, config: &RagConfig) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            timeout_secs: config.api_timeout_secs,
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

/// Build the chat messages for a request: system first, then the user turn
/// with its images attached.
fn build_messages(request: VisionRequest) -> Vec<ChatMessage> {
    let VisionRequest {
        system,
        text,
        images,
    } = request;
    let images = images.into_iter().map(EncodedImage::into_image_data).collect();
    vec![
        ChatMessage::system(system.as_str()),
        ChatMessage::user_with_images(text.as_str(), images),
    ]
}

#[async_trait]
impl VisionModel for ProviderVisionModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: VisionRequest) -> Result<VisionReply, RagError> {
        let start = Instant::now();
        let image_count = request.images.len();
        let messages = build_messages(request);
        let options = self.options();

        let mut last_err = String::from("Unknown error");

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "VLM retry {}/{} after {}ms",
                    attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let call = self.provider.chat(&messages, Some(&options));
            match timeout(Duration::from_secs(self.timeout_secs), call).await {
                Ok(Ok(response)) => {
                    debug!(
                        "VLM {}: {} image(s), {} input tokens, {} output tokens, {:?}",
                        self.model,
                        image_count,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(VisionReply {
                        content: response.content,
                        input_tokens: response.prompt_tokens as usize,
                        output_tokens: response.completion_tokens as usize,
                    });
                }
                Ok(Err(e)) => {
                    last_err = e.to_string();
                    warn!("VLM attempt {} failed — {}", attempt + 1, last_err);
                }
                Err(_) => {
                    last_err = format!("timed out after {}s", self.timeout_secs);
                    warn!("VLM attempt {} {}", attempt + 1, last_err);
                }
            }
        }

        Err(RagError::VlmApiError {
            retries: self.max_retries,
            message: last_err,
        })
    }
}

/// The OpenAI-compatible client for `config.base_url`, authenticated with
/// `config.api_key` and set to the configured VLM and embedding models.
pub fn openai_compatible_provider(config: &RagConfig) -> Result<OpenAIProvider, RagError> {
    let key = config
        .api_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| RagError::ProviderNotConfigured {
            provider: "openai".to_string(),
            hint: format!(
                "No API key for {}.\nSet DASHSCOPE_API_KEY or call RagConfigBuilder::api_key.",
                config.base_url
            ),
        })?;

    debug!(
        "OpenAI-compatible provider at {} (vlm {}, embeddings {})",
        config.base_url, config.vlm_model, config.embed_model
    );
    Ok(OpenAIProvider::compatible(key, config.base_url.as_str())
        .with_model(config.vlm_model.as_str())
        .with_embedding_model(config.embed_model.as_str()))
}

/// Resolve the vision model, from most-specific to least-specific:
///
/// 1. a pre-built model in `config.vision`;
/// 2. a provider other than `openai` named in `config.provider_name`,
///    created by `ProviderFactory`, which reads that provider's key from the
///    environment;
/// 3. the OpenAI-compatible client built from `api_key`/`base_url`.
pub fn resolve_vision_model(config: &RagConfig) -> Result<Arc<dyn VisionModel>, RagError> {
    if let Some(ref model) = config.vision {
        return Ok(Arc::clone(model));
    }

    let provider: Arc<dyn LLMProvider> = match config.provider_name.as_deref() {
        None | Some("openai") => Arc::new(openai_compatible_provider(config)?),
        Some(name) => ProviderFactory::create_llm_provider(name, &config.vlm_model).map_err(
            |e| RagError::ProviderNotConfigured {
                provider: name.to_string(),
                hint: e.to_string(),
            },
        )?,
    };

    Ok(Arc::new(ProviderVisionModel::new(
        provider,
        config.vlm_model.clone(),
        config,
    )))
}
