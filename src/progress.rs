//! Progress events for ingestion.
//!
//! Inject an [`Arc<dyn IngestProgressCallback>`] via
//! [`crate::config::RagConfigBuilder::progress_callback`] to follow a batch
//! as documents are parsed, their images described and their nodes embedded.
//! The CLI drives an `indicatif` bar from these events; the web UI ignores
//! them.
//!
//! # Example
//!
//! ```rust
//! use pdf_rag::{IngestProgressCallback, RagConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct ImageCounter(AtomicUsize);
//!
//! impl IngestProgressCallback for ImageCounter {
//!     fn on_image_described(&self, _document: &str, _done: usize, _total: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = RagConfig::builder()
//!     .progress_callback(Arc::new(ImageCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the ingestion pipeline as it works through a batch.
///
/// All methods default to no-ops. `on_image_described` may be called
/// concurrently from several tasks, so shared state needs atomics or a lock.
pub trait IngestProgressCallback: Send + Sync {
    /// Called once before the first document.
    fn on_ingest_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when a document enters the pipeline.
    ///
    /// # Arguments
    /// * `index` — 1-indexed position in the batch
    /// * `total` — number of documents in the batch
    /// * `name`  — source file name
    fn on_document_start(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called after each image description returns, successful or not.
    fn on_image_described(&self, document: &str, done: usize, total_images: usize) {
        let _ = (document, done, total_images);
    }

    /// Called when a document's nodes have been built.
    fn on_document_complete(&self, name: &str, node_count: usize) {
        let _ = (name, node_count);
    }

    /// Called when a document is dropped from the batch.
    fn on_document_error(&self, name: &str, error: &str) {
        let _ = (name, error);
    }

    /// Called once after every document was attempted.
    fn on_ingest_complete(&self, total_documents: usize, success_count: usize) {
        let _ = (total_documents, success_count);
    }
}

/// Does nothing. Used when no callback is configured.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

/// The type stored in [`crate::config::RagConfig`].
pub type ProgressCallback = Arc<dyn IngestProgressCallback>;

/// The configured callback, or a no-op.
pub(crate) fn callback_or_noop(cb: Option<&ProgressCallback>) -> ProgressCallback {
    match cb {
        Some(cb) => Arc::clone(cb),
        None => Arc::new(NoopProgressCallback),
    }
}
