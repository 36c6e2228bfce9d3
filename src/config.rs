//! Configuration for ingestion and question answering.
//!
//! All behaviour is controlled through [`RagConfig`], built via its
//! [`RagConfigBuilder`] or loaded from the environment with
//! [`RagConfig::from_env`]. One struct is shared by the CLI, the web server
//! and library callers, so the same `.env` file drives all three.

use crate::error::RagError;
use crate::pipeline::embed::Embedder;
use crate::pipeline::parse::DocumentParser;
use crate::pipeline::vlm::VisionModel;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Default OpenAI-compatible endpoint (DashScope compatible mode).
pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
/// Default vision-language model.
pub const DEFAULT_VLM_MODEL: &str = "qwen-vl-max";
/// Default text embedding model.
pub const DEFAULT_EMBED_MODEL: &str = "text-embedding-v3";

/// Configuration for the RAG pipeline.
///
/// # Example
/// ```rust
/// use pdf_rag::RagConfig;
///
/// let config = RagConfig::builder()
///     .similarity_top_k(8)
///     .embed_batch_size(10)
///     .persist_dir("/tmp/corpora")
///     .build()
///     .unwrap();
/// assert_eq!(config.similarity_top_k, 8);
/// ```
#[derive(Clone)]
pub struct RagConfig {
    /// API key for the OpenAI-compatible endpoint (`DASHSCOPE_API_KEY`).
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint (`DASHSCOPE_BASE_URL`).
    pub base_url: String,

    /// Text-only chat model (`DASHSCOPE_LLM_MODEL_NAME`). Not used by the
    /// multimodal answer path; kept so one `.env` serves every tool.
    pub llm_model: Option<String>,

    /// Vision-language model used for image descriptions and answers.
    pub vlm_model: String,

    /// Embedding model served at `base_url`.
    pub embed_model: String,

    /// `edgequake_llm` provider for image descriptions and answers. Unset or
    /// "openai" uses `api_key`/`base_url` directly; any other name goes
    /// through `ProviderFactory`, which reads that provider's own variables.
    pub provider_name: Option<String>,

    /// Texts per embedding request. Default: 10.
    ///
    /// DashScope rejects batches larger than 10 inputs.
    pub embed_batch_size: usize,

    /// Number of nodes retrieved per question. Default: 5.
    pub similarity_top_k: usize,

    /// Directory holding persisted collections. Default: `chroma_storage`.
    pub persist_dir: PathBuf,

    /// Directory the parser writes results into. Default: `pdf_docs/parse_results`.
    pub parse_output_dir: PathBuf,

    /// Directory uploaded PDFs are staged in. Default: `pdf_docs`.
    pub upload_dir: PathBuf,

    /// Parser executable. Default: `mineru`.
    pub parser_command: String,

    /// Parser backend (`pipeline`, `vlm-transformers`, …). Default: `pipeline`.
    pub parser_backend: String,

    /// Concurrent VLM image-description calls during ingestion. Default: 4.
    pub concurrency: usize,

    /// Sampling temperature for VLM calls. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens generated per VLM call. Default: 2048.
    pub max_tokens: usize,

    /// Retry attempts on transient API failures. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds; doubles per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-API-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Pre-constructed vision model. Takes precedence over provider settings.
    pub vision: Option<Arc<dyn VisionModel>>,

    /// Pre-constructed embedder. Takes precedence over `embed_model`/`base_url`.
    pub embedder: Option<Arc<dyn Embedder>>,

    /// Pre-constructed document parser. Takes precedence over `parser_command`.
    pub parser: Option<Arc<dyn DocumentParser>>,

    /// Optional ingestion progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            llm_model: None,
            vlm_model: DEFAULT_VLM_MODEL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            provider_name: None,
            embed_batch_size: 10,
            similarity_top_k: 5,
            persist_dir: PathBuf::from("chroma_storage"),
            parse_output_dir: PathBuf::from("pdf_docs").join("parse_results"),
            upload_dir: PathBuf::from("pdf_docs"),
            parser_command: "mineru".to_string(),
            parser_backend: "pipeline".to_string(),
            concurrency: 4,
            temperature: 0.1,
            max_tokens: 2048,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            download_timeout_secs: 120,
            vision: None,
            embedder: None,
            parser: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RagConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RagConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("llm_model", &self.llm_model)
            .field("vlm_model", &self.vlm_model)
            .field("embed_model", &self.embed_model)
            .field("provider_name", &self.provider_name)
            .field("embed_batch_size", &self.embed_batch_size)
            .field("similarity_top_k", &self.similarity_top_k)
            .field("persist_dir", &self.persist_dir)
            .field("parse_output_dir", &self.parse_output_dir)
            .field("upload_dir", &self.upload_dir)
            .field("parser_command", &self.parser_command)
            .field("parser_backend", &self.parser_backend)
            .field("concurrency", &self.concurrency)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("vision", &self.vision.as_ref().map(|_| "<dyn VisionModel>"))
            .field("embedder", &self.embedder.as_ref().map(|_| "<dyn Embedder>"))
            .field("parser", &self.parser.as_ref().map(|_| "<dyn DocumentParser>"))
            .finish()
    }
}

impl RagConfig {
    /// Create a new builder for `RagConfig`.
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load a `.env` file (if any) and read settings from the environment.
    ///
    /// Unset variables keep their defaults; set-but-unparsable numeric
    /// variables are an error rather than being silently ignored.
    pub fn from_env() -> Result<Self, RagError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. `from_env` uses the
    /// process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RagError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut builder = Self::builder();

        if let Some(key) = get("DASHSCOPE_API_KEY") {
            builder = builder.api_key(key);
        }
        if let Some(url) = get("DASHSCOPE_BASE_URL") {
            builder = builder.base_url(url);
        }
        if let Some(model) = get("DASHSCOPE_LLM_MODEL_NAME") {
            builder = builder.llm_model(model);
        }
        if let Some(model) = get("DASHSCOPE_VLM_MODEL_NAME") {
            builder = builder.vlm_model(model);
        }
        if let Some(model) = get("DASHSCOPE_TEXT_EMBED_MODEL_NAME") {
            builder = builder.embed_model(model);
        }
        if let Some(provider) = get("PDFRAG_LLM_PROVIDER") {
            builder = builder.provider_name(provider);
        }
        if let Some(n) = parse_var::<usize>(&get, "PDFRAG_EMBED_BATCH_SIZE")? {
            builder = builder.embed_batch_size(n);
        }
        if let Some(n) = parse_var::<usize>(&get, "PDFRAG_TOP_K")? {
            builder = builder.similarity_top_k(n);
        }
        if let Some(n) = parse_var::<usize>(&get, "PDFRAG_CONCURRENCY")? {
            builder = builder.concurrency(n);
        }
        if let Some(dir) = get("PDFRAG_PERSIST_DIR") {
            builder = builder.persist_dir(dir);
        }
        if let Some(dir) = get("PDFRAG_PARSE_DIR") {
            builder = builder.parse_output_dir(dir);
        }
        if let Some(dir) = get("PDFRAG_UPLOAD_DIR") {
            builder = builder.upload_dir(dir);
        }
        if let Some(cmd) = get("PDFRAG_PARSER_CMD") {
            builder = builder.parser_command(cmd);
        }
        if let Some(backend) = get("PDFRAG_PARSER_BACKEND") {
            builder = builder.parser_backend(backend);
        }

        builder.build()
    }
}

fn parse_var<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, RagError> {
    match get(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            RagError::InvalidConfig(format!("{key} must be a number, got '{raw}'"))
        }),
    }
}

/// Builder for [`RagConfig`].
#[derive(Debug)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn llm_model(mut self, model: impl Into<String>) -> Self {
        self.config.llm_model = Some(model.into());
        self
    }

    pub fn vlm_model(mut self, model: impl Into<String>) -> Self {
        self.config.vlm_model = model.into();
        self
    }

    pub fn embed_model(mut self, model: impl Into<String>) -> Self {
        self.config.embed_model = model.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn embed_batch_size(mut self, n: usize) -> Self {
        self.config.embed_batch_size = n;
        self
    }

    pub fn similarity_top_k(mut self, k: usize) -> Self {
        self.config.similarity_top_k = k;
        self
    }

    pub fn persist_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.persist_dir = dir.into();
        self
    }

    pub fn parse_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.parse_output_dir = dir.into();
        self
    }

    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn parser_command(mut self, cmd: impl Into<String>) -> Self {
        self.config.parser_command = cmd.into();
        self
    }

    pub fn parser_backend(mut self, backend: impl Into<String>) -> Self {
        self.config.parser_backend = backend.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn vision(mut self, model: Arc<dyn VisionModel>) -> Self {
        self.config.vision = Some(model);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.config.embedder = Some(embedder);
        self
    }

    pub fn parser(mut self, parser: Arc<dyn DocumentParser>) -> Self {
        self.config.parser = Some(parser);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RagConfig, RagError> {
        let c = &self.config;
        if c.embed_batch_size == 0 {
            return Err(RagError::InvalidConfig(
                "Embedding batch size must be ≥ 1".into(),
            ));
        }
        if c.similarity_top_k == 0 {
            return Err(RagError::InvalidConfig("top_k must be ≥ 1".into()));
        }
        if c.concurrency == 0 {
            return Err(RagError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.parser_command.trim().is_empty() {
            return Err(RagError::InvalidConfig(
                "Parser command must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}
