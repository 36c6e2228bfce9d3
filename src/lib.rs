//! # pdf-rag
//!
//! Multimodal retrieval-augmented question answering over PDF documents.
//!
//! ## Why this crate?
//!
//! Research papers carry half their meaning in figures, tables and
//! formulae. Plain text extraction drops them or garbles them. This crate
//! keeps every content block with its type: text and LaTeX equations as
//! text, tables rendered to Markdown, and figures described by a
//! vision-language model so they can be found by text search. At answer
//! time, retrieved figures are sent back to the VLM as images.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input    resolve local file, URL or upload
//!  ├─ 2. Parse    MinerU layout analysis → content list + cropped images
//!  ├─ 3. Nodes    text / equation / table (Markdown) / image (VLM description)
//!  ├─ 4. Embed    batched OpenAI-compatible embeddings
//!  └─ 5. Store    one LanceDB table per document
//!
//! Question
//!  │
//!  ├─ 1. Retrieve top-k cosine search in the chosen corpus
//!  └─ 2. Answer   text nodes → system prompt, image nodes → attached images
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_rag::{ask, ingest_pdfs, RagConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // DASHSCOPE_API_KEY etc. from the environment or a .env file
//!     let config = RagConfig::from_env()?;
//!
//!     let report = ingest_pdfs(&["deepseek-r1.pdf".to_string()], &config).await?;
//!     eprintln!("built {:?}", report.collection_names());
//!
//!     let answer = ask("How was R1-Zero trained?", "deepseek-r1", &config).await?;
//!     println!("{}", answer.text);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | The axum web UI ([`web`]) |
//! | `cli`    | on      | The `pdfrag` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable both when using only the library:
//! ```toml
//! pdf-rag = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod content_list;
pub mod corpus;
pub mod error;
pub mod ingest;
pub mod node;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod retrieve;
pub mod store;
pub mod table;
#[cfg(feature = "server")]
pub mod web;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{RagConfig, RagConfigBuilder};
pub use corpus::{build_corpus, collection_name_for, list_collections, load_corpus, Corpus, CorpusSummary};
pub use error::{DocumentError, RagError};
pub use ingest::{ask, embed_parsed, ingest_pdfs, ingest_uploads, DocumentReport, IngestReport};
pub use node::{ContentType, Node, NodeMetadata};
pub use pipeline::embed::{Embedder, ProviderEmbedder};
pub use pipeline::nodes::create_nodes;
pub use pipeline::parse::{DocumentParser, MineruParser};
pub use pipeline::vlm::{ProviderVisionModel, VisionModel, VisionReply, VisionRequest};
pub use progress::{IngestProgressCallback, NoopProgressCallback, ProgressCallback};
pub use retrieve::{answer, synthesize_response, Answer, Retriever, Source};
pub use store::{Collection, CorpusStore, ScoredNode, StoredRecord};
pub use table::html_table_to_markdown;
