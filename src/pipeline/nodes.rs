//! Node construction: parse-result directory → typed [`Node`]s.
//!
//! Each content-list block becomes at most one node. Text and equations are
//! taken as-is, tables are rendered to Markdown with their captions, and
//! images are described by the VLM so they can be found by text search.
//! Descriptions run concurrently (`concurrency` at a time) while the output
//! keeps the block order of the document.

use crate::config::RagConfig;
use crate::content_list::{join_captions, read_content_list, ContentBlock};
use crate::error::{DocumentError, RagError};
use crate::node::{ContentType, Node, NodeMetadata};
use crate::pipeline::clean::clean_model_text;
use crate::pipeline::encode::encode_image_file;
use crate::pipeline::vlm::{VisionModel, VisionRequest};
use crate::progress::IngestProgressCallback;
use crate::prompts::{describe_image_prompt, ASSISTANT_SYSTEM_PROMPT};
use crate::table::html_table_to_markdown;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// An image block waiting for its description.
struct ImageJob {
    slot: usize,
    path: PathBuf,
    captions: String,
    page_idx: u32,
}

/// Names derived from a parse-result directory `<out>/<stem>/<subdir>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument {
    pub dir: PathBuf,
    /// `<stem>.pdf`
    pub source_file: String,
    pub content_list: PathBuf,
}

impl ParsedDocument {
    pub fn from_dir(dir: &Path) -> Self {
        let stem = dir
            .parent()
            .and_then(Path::file_name)
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());
        Self {
            dir: dir.to_path_buf(),
            source_file: format!("{stem}.pdf"),
            content_list: dir.join(format!("{stem}_content_list.json")),
        }
    }

    fn image_path(&self, img_path: &str) -> String {
        if img_path.is_empty() {
            String::new()
        } else {
            self.dir.join(img_path).to_string_lossy().to_string()
        }
    }

    fn metadata(&self, content_type: ContentType, page_idx: u32, image_path: String) -> NodeMetadata {
        NodeMetadata {
            content_type,
            page_idx,
            source_file: self.source_file.clone(),
            image_path,
        }
    }
}

/// Build the nodes of every parse-result directory.
///
/// Returns one node list per document that produced content, in input
/// order, plus the non-fatal errors met along the way.
pub async fn create_nodes(
    dirs: &[PathBuf],
    vision: &dyn VisionModel,
    config: &RagConfig,
    progress: &dyn IngestProgressCallback,
) -> (Vec<Vec<Node>>, Vec<DocumentError>) {
    let mut all_nodes = Vec::with_capacity(dirs.len());
    let mut errors = Vec::new();

    for (i, dir) in dirs.iter().enumerate() {
        let doc = ParsedDocument::from_dir(dir);
        progress.on_document_start(i + 1, dirs.len(), &doc.source_file);

        let blocks = match read_content_list(&doc.content_list).await {
            Ok(blocks) => blocks,
            Err(e) => {
                warn!("Skipping {}: {}", doc.source_file, e);
                progress.on_document_error(&doc.source_file, &e.to_string());
                errors.push(DocumentError::NodesFailed {
                    document: doc.source_file.clone(),
                    detail: e.to_string(),
                });
                continue;
            }
        };

        let nodes = document_nodes(&doc, blocks, vision, config, progress, &mut errors).await;
        if nodes.is_empty() {
            warn!("{} produced no nodes", doc.source_file);
            progress.on_document_error(&doc.source_file, "no embeddable content");
            errors.push(DocumentError::Empty {
                document: doc.source_file.clone(),
            });
            continue;
        }

        progress.on_document_complete(&doc.source_file, nodes.len());
        all_nodes.push(nodes);
    }

    (all_nodes, errors)
}

async fn document_nodes(
    doc: &ParsedDocument,
    blocks: Vec<ContentBlock>,
    vision: &dyn VisionModel,
    config: &RagConfig,
    progress: &dyn IngestProgressCallback,
    errors: &mut Vec<DocumentError>,
) -> Vec<Node> {
    let start = Instant::now();
    let mut slots: Vec<Option<Node>> = Vec::with_capacity(blocks.len());
    let mut jobs = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text, page_idx, .. } => {
                if text.trim().is_empty() {
                    continue;
                }
                let meta = doc.metadata(ContentType::Text, page_idx, String::new());
                slots.push(Some(Node::new(text, meta)));
            }
            ContentBlock::Equation {
                text,
                img_path,
                page_idx,
                ..
            } => {
                if text.trim().is_empty() {
                    continue;
                }
                let meta = doc.metadata(ContentType::Equation, page_idx, doc.image_path(&img_path));
                slots.push(Some(Node::new(text, meta)));
            }
            ContentBlock::Table {
                table_body,
                table_caption,
                img_path,
                page_idx,
                ..
            } => {
                let text = format!(
                    "{}\n{}",
                    html_table_to_markdown(&table_body),
                    join_captions(&table_caption)
                );
                if text.trim().is_empty() {
                    continue;
                }
                let meta = doc.metadata(ContentType::Table, page_idx, doc.image_path(&img_path));
                slots.push(Some(Node::new(text, meta)));
            }
            ContentBlock::Image {
                img_path,
                image_caption,
                page_idx,
                ..
            } => {
                if img_path.is_empty() {
                    debug!("{}: image block without img_path on page {}", doc.source_file, page_idx);
                    continue;
                }
                jobs.push(ImageJob {
                    slot: slots.len(),
                    path: doc.dir.join(&img_path),
                    captions: join_captions(&image_caption),
                    page_idx,
                });
                slots.push(None);
            }
            ContentBlock::Other => {}
        }
    }

    let total_images = jobs.len();
    if total_images > 0 {
        info!(
            "{}: describing {} image(s) with {}",
            doc.source_file,
            total_images,
            vision.name()
        );
    }

    let mut described = stream::iter(jobs)
        .map(|job| async move {
            let result = describe_image(vision, &job.path, &job.captions).await;
            (job, result)
        })
        .buffer_unordered(config.concurrency.max(1));

    let mut done = 0;
    while let Some((job, result)) = described.next().await {
        done += 1;
        progress.on_image_described(&doc.source_file, done, total_images);

        let text = match result {
            Ok(description) => format!("{}\n{}", job.captions, description),
            Err(e) => {
                warn!(
                    "{}: could not describe {}, using caption only: {}",
                    doc.source_file,
                    job.path.display(),
                    e
                );
                errors.push(DocumentError::DescribeFailed {
                    document: doc.source_file.clone(),
                    image: job.path.to_string_lossy().to_string(),
                    page: job.page_idx,
                    detail: e.to_string(),
                });
                job.captions.clone()
            }
        };

        if text.trim().is_empty() {
            continue;
        }
        let meta = doc.metadata(
            ContentType::Image,
            job.page_idx,
            job.path.to_string_lossy().to_string(),
        );
        slots[job.slot] = Some(Node::new(text, meta));
    }

    let nodes: Vec<Node> = slots.into_iter().flatten().collect();
    debug!(
        "{}: {} node(s) in {:?}",
        doc.source_file,
        nodes.len(),
        start.elapsed()
    );
    nodes
}

/// Ask the VLM to describe one image file.
async fn describe_image(
    vision: &dyn VisionModel,
    path: &Path,
    captions: &str,
) -> Result<String, RagError> {
    let image = encode_image_file(path)
        .await
        .map_err(|e| RagError::image_read(path, e))?;
    let reply = vision
        .complete(VisionRequest {
            system: ASSISTANT_SYSTEM_PROMPT.to_string(),
            text: describe_image_prompt(captions),
            images: vec![image],
        })
        .await?;
    Ok(clean_model_text(&reply.content))
}
