//! Pipeline stages for turning PDFs into embeddable nodes.
//!
//! Each submodule implements one step, so every stage can be tested on its
//! own and the external services (parser, VLM, embedding API) can be
//! replaced behind their traits.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ parse ──▶ nodes ──────────────▶ embed
//! (path/URL)  (MinerU)   │  (text/equation/    (vectors)
//!                        │   table/image)
//!                        └─▶ encode ──▶ vlm ──▶ clean
//!                            (base64)  (describe) (tidy)
//! ```
//!
//! 1. [`input`]  — resolve a path, URL or upload to a local PDF
//! 2. [`parse`]  — run the layout parser; yields a content list and images
//! 3. [`nodes`]  — one node per content block; images go through the VLM
//! 4. [`encode`] — base64-wrap image files for multimodal requests
//! 5. [`vlm`]    — the vision-language model seam, with retry/backoff
//! 6. [`clean`]  — deterministic cleanup of model output
//! 7. [`embed`]  — batched text embeddings through the same provider stack

pub mod clean;
pub mod embed;
pub mod encode;
#[cfg(test)]
mod fake_openai;
pub mod input;
pub mod nodes;
pub mod parse;
pub mod vlm;
