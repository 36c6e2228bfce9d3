//! Error types for the pdf-rag library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`RagError`] — **Fatal**: the operation cannot proceed at all (bad input
//!   file, parser not installed, provider not configured, corpus missing).
//!   Returned as `Err(RagError)` from the top-level entry points.
//!
//! * [`DocumentError`] — **Non-fatal**: one document (or one image inside a
//!   document) failed, but the rest of the batch is fine. Collected in
//!   [`crate::ingest::IngestReport`] so callers see partial success instead of
//!   losing a whole upload to one bad file.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf-rag library.
#[derive(Debug, Error)]
pub enum RagError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── Parser errors ─────────────────────────────────────────────────────
    /// The document-parsing backend binary could not be started.
    #[error("Document parser '{command}' is not available: {detail}\nInstall MinerU (`pip install mineru`) or set PDFRAG_PARSER_CMD.")]
    ParserUnavailable { command: String, detail: String },

    /// The parser ran but exited with a failure status.
    #[error("Parsing '{path}' failed (exit code {code:?}): {stderr}")]
    ParserFailed {
        path: PathBuf,
        code: Option<i32>,
        stderr: String,
    },

    /// The parse-result directory has no content list.
    #[error("Content list not found: '{path}'")]
    ContentListMissing { path: PathBuf },

    /// The content list exists but is not valid JSON of the expected shape.
    #[error("Malformed content list '{path}': {detail}")]
    ContentListMalformed { path: PathBuf, detail: String },

    // ── Model errors ──────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The VLM API returned an error after all retries.
    #[error("VLM API error after {retries} retries: {message}")]
    VlmApiError { retries: u32, message: String },

    /// The VLM call timed out.
    #[error("VLM call timed out after {secs}s")]
    VlmTimeout { secs: u64 },

    /// The embedding API returned an error after all retries.
    #[error("Embedding API error: {message}")]
    EmbeddingApiError { message: String },

    /// The embedding API answered with the wrong number of vectors.
    #[error("Embedding API returned {got} vectors for {expected} inputs")]
    EmbeddingCountMismatch { expected: usize, got: usize },

    // ── Store errors ──────────────────────────────────────────────────────
    /// A vector does not match the collection's dimension.
    #[error("Embedding dimension mismatch in collection '{collection}': expected {expected}, got {got}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        got: usize,
    },

    /// The requested collection does not exist.
    #[error("Corpus '{name}' not found.\nRun `pdfrag list` to see available corpora.")]
    CollectionNotFound { name: String },

    /// The collection name is not usable as a store key.
    #[error("Invalid collection name '{name}': {reason}")]
    InvalidCollectionName { name: String, reason: String },

    /// The vector database rejected an operation or returned unreadable rows.
    #[error("Vector store error: {detail}")]
    Store { detail: String },

    /// Could not read or write a file or directory on disk.
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An image referenced by a node could not be read.
    #[error("Cannot read image '{path}': {source}")]
    ImageRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RagError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RagError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn image_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RagError::ImageRead {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn store(detail: impl std::fmt::Display) -> Self {
        RagError::Store {
            detail: detail.to_string(),
        }
    }
}

/// A non-fatal error for a single document or image.
///
/// Stored in [`crate::ingest::IngestReport`]. The batch continues unless
/// every document fails.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum DocumentError {
    /// The parsing backend failed for this PDF.
    #[error("{document}: parsing failed: {detail}")]
    ParseFailed { document: String, detail: String },

    /// The content list could not be turned into nodes.
    #[error("{document}: node construction failed: {detail}")]
    NodesFailed { document: String, detail: String },

    /// The document produced no embeddable content.
    #[error("{document}: no embeddable content")]
    Empty { document: String },

    /// The VLM could not describe one image; the caption was used instead.
    #[error("{document}: image '{image}' (page {page}) could not be described: {detail}")]
    DescribeFailed {
        document: String,
        image: String,
        page: u32,
        detail: String,
    },

    /// Embedding or persisting the document's nodes failed.
    #[error("{document}: corpus build failed: {detail}")]
    CorpusFailed { document: String, detail: String },
}

impl DocumentError {
    /// Name of the document this error belongs to.
    pub fn document(&self) -> &str {
        match self {
            DocumentError::ParseFailed { document, .. }
            | DocumentError::NodesFailed { document, .. }
            | DocumentError::Empty { document }
            | DocumentError::DescribeFailed { document, .. }
            | DocumentError::CorpusFailed { document, .. } => document,
        }
    }
}
