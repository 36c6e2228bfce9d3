//! Retrieval and answer synthesis.
//!
//! The question is embedded and matched against one corpus. Retrieved text,
//! equation and table nodes become the textual context of the system prompt;
//! retrieved image nodes are re-read from disk and attached as pictures, so
//! the VLM looks at the figure itself rather than at its stored description.

use crate::corpus::Corpus;
use crate::error::RagError;
use crate::node::ContentType;
use crate::pipeline::clean::clean_model_text;
use crate::pipeline::encode::encode_image_file;
use crate::pipeline::vlm::{VisionModel, VisionRequest};
use crate::prompts::{synthesis_system_prompt, NO_ANSWER};
use crate::store::ScoredNode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Where a piece of the answer came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub source_file: String,
    pub page_idx: u32,
    pub content_type: ContentType,
    pub score: f32,
}

impl From<&ScoredNode> for Source {
    fn from(hit: &ScoredNode) -> Self {
        Self {
            source_file: hit.node.metadata.source_file.clone(),
            page_idx: hit.node.metadata.page_idx,
            content_type: hit.node.content_type(),
            score: hit.score,
        }
    }
}

/// A synthesised answer and the nodes it was based on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<Source>,
}

/// Top-k similarity retriever over one corpus.
#[derive(Debug, Clone)]
pub struct Retriever {
    corpus: Corpus,
    top_k: usize,
}

impl Retriever {
    pub fn new(corpus: Corpus, top_k: usize) -> Self {
        Self {
            corpus,
            top_k: top_k.max(1),
        }
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    /// The `top_k` nodes most similar to `query`, best first.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<ScoredNode>, RagError> {
        self.corpus.search(query, self.top_k).await
    }
}

/// Answer `query` from the retrieved `nodes`.
///
/// Returns [`NO_ANSWER`] without calling the model when nothing was
/// retrieved. Images that cannot be read are skipped.
pub async fn synthesize_response(
    query: &str,
    nodes: &[ScoredNode],
    vision: &dyn VisionModel,
) -> Result<String, RagError> {
    if nodes.is_empty() {
        return Ok(NO_ANSWER.to_string());
    }

    let mut text_context = String::new();
    let mut images = Vec::new();

    for hit in nodes {
        let node = &hit.node;
        if node.content_type().is_textual() {
            text_context.push_str(&node.text);
            text_context.push('\n');
            continue;
        }

        let path = node.metadata.image_path.as_str();
        if path.is_empty() {
            warn!("Image node {} has no image path; skipped", node.id);
            continue;
        }
        match encode_image_file(Path::new(path)).await {
            Ok(image) => images.push(image),
            Err(e) => warn!("{}; skipped", RagError::image_read(path, e)),
        }
    }

    debug!(
        "Synthesising from {} chars of text and {} image(s)",
        text_context.len(),
        images.len()
    );

    let reply = vision
        .complete(VisionRequest {
            system: synthesis_system_prompt(query, &text_context),
            text: query.to_string(),
            images,
        })
        .await?;

    Ok(clean_model_text(&reply.content))
}

/// Retrieve from `retriever` and synthesise an answer.
pub async fn answer(
    query: &str,
    retriever: &Retriever,
    vision: &dyn VisionModel,
) -> Result<Answer, RagError> {
    let start = Instant::now();
    let hits = retriever.retrieve(query).await?;
    let text = synthesize_response(query, &hits, vision).await?;

    info!(
        "Answered from corpus '{}' with {} node(s) in {:?}",
        retriever.corpus().name(),
        hits.len(),
        start.elapsed()
    );

    Ok(Answer {
        text,
        sources: hits.iter().map(Source::from).collect(),
    })
}
