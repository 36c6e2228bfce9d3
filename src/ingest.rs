//! Library entry points: ingest PDFs, embed existing parse results, ask.
//!
//! ## Why report instead of fail?
//!
//! A batch of papers usually has one bad apple: a scanned file the parser
//! chokes on, a figure the VLM refuses. [`ingest_pdfs`] returns `Err` only
//! when nothing can proceed (no parser, no provider, no readable input);
//! everything else lands in [`IngestReport::errors`] next to the corpora
//! that were built.

use crate::config::RagConfig;
use crate::corpus::{build_corpus, collection_name_for, count_by_type, load_corpus, CorpusSummary};
use crate::error::{DocumentError, RagError};
use crate::node::{ContentType, Node};
use crate::pipeline::embed::{resolve_embedder, Embedder};
use crate::pipeline::input::{resolve_input, stage_file, stage_upload};
use crate::pipeline::nodes::create_nodes;
use crate::pipeline::parse::{parse_documents, resolve_parser};
use crate::pipeline::vlm::{resolve_vision_model, VisionModel};
use crate::progress::callback_or_noop;
use crate::retrieve::{answer, Answer, Retriever};
use crate::store::CorpusStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

/// Characters of body text quoted in a parse summary.
const SUMMARY_EXCERPT_CHARS: usize = 1000;

/// What happened to one successfully ingested document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub source_file: String,
    pub collection: String,
    /// Highest page index seen plus one.
    pub pages: u32,
    pub nodes: usize,
    pub by_type: BTreeMap<ContentType, usize>,
    /// Human-readable Markdown overview shown after an upload.
    pub summary: String,
}

/// Outcome of an ingestion batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub collections: Vec<CorpusSummary>,
    pub documents: Vec<DocumentReport>,
    pub errors: Vec<DocumentError>,
    pub nodes_by_type: BTreeMap<ContentType, usize>,
    pub parse_duration_ms: u64,
    pub nodes_duration_ms: u64,
    pub embed_duration_ms: u64,
    pub total_duration_ms: u64,
}

impl IngestReport {
    pub fn total_nodes(&self) -> usize {
        self.nodes_by_type.values().sum()
    }

    /// Names of the collections built, in input order.
    pub fn collection_names(&self) -> Vec<&str> {
        self.collections.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Ingest PDFs given as paths or URLs.
///
/// Each PDF is copied into `upload_dir`, parsed into `parse_output_dir`,
/// turned into nodes and embedded into a collection named after the file.
pub async fn ingest_pdfs(inputs: &[String], config: &RagConfig) -> Result<IngestReport, RagError> {
    let start = Instant::now();
    info!("Starting ingestion of {} input(s)", inputs.len());

    let mut errors = Vec::new();
    let mut first_fatal = None;
    let mut staged = Vec::with_capacity(inputs.len());
    for input in inputs {
        match resolve_and_stage(input, config).await {
            Ok(path) => staged.push(path),
            Err(e) => {
                warn!("Skipping input {}: {}", input, e);
                errors.push(DocumentError::ParseFailed {
                    document: input.clone(),
                    detail: e.to_string(),
                });
                first_fatal.get_or_insert(e);
            }
        }
    }

    if staged.is_empty() {
        if let Some(e) = first_fatal {
            return Err(e);
        }
    }

    run_pipeline(staged, errors, config, start).await
}

/// Copy one input into `upload_dir`. A download's temp dir is dropped once
/// the copy exists.
async fn resolve_and_stage(input: &str, config: &RagConfig) -> Result<PathBuf, RagError> {
    let resolved = resolve_input(input, config.download_timeout_secs).await?;
    stage_file(&config.upload_dir, resolved.path()).await
}

/// Ingest uploaded files given as `(file name, bytes)`.
pub async fn ingest_uploads(
    files: Vec<(String, Vec<u8>)>,
    config: &RagConfig,
) -> Result<IngestReport, RagError> {
    let start = Instant::now();
    let mut errors = Vec::new();
    let mut first_fatal = None;
    let mut staged = Vec::with_capacity(files.len());

    for (name, bytes) in files {
        match stage_upload(&config.upload_dir, &name, &bytes).await {
            Ok(path) => staged.push(path),
            Err(e) => {
                warn!("Rejected upload {}: {}", name, e);
                errors.push(DocumentError::ParseFailed {
                    document: name,
                    detail: e.to_string(),
                });
                first_fatal.get_or_insert(e);
            }
        }
    }

    if staged.is_empty() {
        if let Some(e) = first_fatal {
            return Err(e);
        }
    }

    run_pipeline(staged, errors, config, start).await
}

async fn run_pipeline(
    pdfs: Vec<PathBuf>,
    mut errors: Vec<DocumentError>,
    config: &RagConfig,
    start: Instant,
) -> Result<IngestReport, RagError> {
    let progress = callback_or_noop(config.progress_callback.as_ref());
    progress.on_ingest_start(pdfs.len());

    // Fail fast on a missing provider before the slow parse.
    let vision = resolve_vision_model(config)?;
    let embedder = resolve_embedder(config)?;
    let parser = resolve_parser(config);

    let parse_start = Instant::now();
    let (dirs, parse_errors) =
        parse_documents(parser.as_ref(), &pdfs, &config.parse_output_dir).await?;
    for e in &parse_errors {
        progress.on_document_error(e.document(), &e.to_string());
    }
    errors.extend(parse_errors);
    let parse_duration_ms = parse_start.elapsed().as_millis() as u64;
    info!("Parsed {}/{} document(s) in {}ms", dirs.len(), pdfs.len(), parse_duration_ms);

    let mut report = build_from_dirs(&dirs, config, vision.as_ref(), embedder.as_ref()).await?;
    errors.append(&mut report.errors);
    report.errors = errors;
    report.parse_duration_ms = parse_duration_ms;
    report.total_duration_ms = start.elapsed().as_millis() as u64;

    progress.on_ingest_complete(pdfs.len(), report.collections.len());
    info!(
        "Ingestion complete: {} corpus(es), {} node(s), {} error(s), {}ms",
        report.collections.len(),
        report.total_nodes(),
        report.errors.len(),
        report.total_duration_ms
    );
    Ok(report)
}

/// Build corpora from parse results that already exist on disk.
pub async fn embed_parsed(dirs: &[PathBuf], config: &RagConfig) -> Result<IngestReport, RagError> {
    let start = Instant::now();
    let progress = callback_or_noop(config.progress_callback.as_ref());
    progress.on_ingest_start(dirs.len());

    let vision = resolve_vision_model(config)?;
    let embedder = resolve_embedder(config)?;
    let mut report = build_from_dirs(dirs, config, vision.as_ref(), embedder.as_ref()).await?;
    report.total_duration_ms = start.elapsed().as_millis() as u64;

    progress.on_ingest_complete(dirs.len(), report.collections.len());
    Ok(report)
}

async fn build_from_dirs(
    dirs: &[PathBuf],
    config: &RagConfig,
    vision: &dyn VisionModel,
    embedder: &dyn Embedder,
) -> Result<IngestReport, RagError> {
    let progress = callback_or_noop(config.progress_callback.as_ref());
    let store = CorpusStore::open(&config.persist_dir).await?;

    let nodes_start = Instant::now();
    let (nodes_list, mut errors) = create_nodes(dirs, vision, config, progress.as_ref()).await;
    let nodes_duration_ms = nodes_start.elapsed().as_millis() as u64;

    let mut pending: BTreeMap<String, DocumentReport> = nodes_list
        .iter()
        .filter_map(|nodes| {
            let first = nodes.first()?;
            let source_file = first.metadata.source_file.clone();
            let pages = page_count(nodes);
            let report = DocumentReport {
                collection: collection_name_for(&source_file),
                pages,
                nodes: nodes.len(),
                by_type: count_by_type(nodes),
                summary: parse_summary_markdown(&source_file, nodes, pages),
                source_file: source_file.clone(),
            };
            Some((source_file, report))
        })
        .collect();

    let embed_start = Instant::now();
    let (collections, corpus_errors) = build_corpus(nodes_list, &store, embedder).await;
    errors.extend(corpus_errors);
    let embed_duration_ms = embed_start.elapsed().as_millis() as u64;

    let mut nodes_by_type = BTreeMap::new();
    let mut documents = Vec::with_capacity(collections.len());
    for summary in &collections {
        for (kind, n) in &summary.by_type {
            *nodes_by_type.entry(*kind).or_insert(0) += n;
        }
        if let Some(doc) = pending.remove(&summary.source_file) {
            documents.push(doc);
        }
    }

    Ok(IngestReport {
        collections,
        documents,
        errors,
        nodes_by_type,
        parse_duration_ms: 0,
        nodes_duration_ms,
        embed_duration_ms,
        total_duration_ms: 0,
    })
}

/// Answer `query` from the corpus named `corpus`.
pub async fn ask(query: &str, corpus: &str, config: &RagConfig) -> Result<Answer, RagError> {
    let store = CorpusStore::open(&config.persist_dir).await?;
    let embedder = resolve_embedder(config)?;
    let corpus = load_corpus(&store, corpus, embedder).await?;
    let vision = resolve_vision_model(config)?;
    let retriever = Retriever::new(corpus, config.similarity_top_k);
    answer(query, &retriever, vision.as_ref()).await
}

fn page_count(nodes: &[Node]) -> u32 {
    nodes
        .iter()
        .map(|n| n.metadata.page_idx + 1)
        .max()
        .unwrap_or(0)
}

/// Markdown overview of a parsed document: counts plus an excerpt of its
/// body text.
pub fn parse_summary_markdown(source_file: &str, nodes: &[Node], pages: u32) -> String {
    let by_type = count_by_type(nodes);
    let count = |kind: ContentType| by_type.get(&kind).copied().unwrap_or(0);

    let full_text: String = nodes
        .iter()
        .filter(|n| n.content_type() == ContentType::Text)
        .map(|n| n.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let char_count = full_text.chars().count();
    let mut excerpt: String = full_text.chars().take(SUMMARY_EXCERPT_CHARS).collect();
    if char_count > SUMMARY_EXCERPT_CHARS {
        excerpt.push_str("...");
    }

    let mut md = format!("# {source_file}\n\n");
    md.push_str("## Document\n\n");
    md.push_str(&format!("- **File**: `{source_file}`\n"));
    md.push_str(&format!("- **Pages**: {pages}\n"));
    md.push_str(&format!("- **Nodes**: {}\n\n", nodes.len()));
    md.push_str("## Content\n\n");
    if excerpt.is_empty() {
        md.push_str("_No body text._\n\n");
    } else {
        md.push_str(&excerpt);
        md.push_str("\n\n");
    }
    md.push_str("## Statistics\n\n");
    md.push_str("| Metric | Value |\n|------|------|\n");
    md.push_str(&format!("| Text blocks | {} |\n", count(ContentType::Text)));
    md.push_str(&format!("| Equations | {} |\n", count(ContentType::Equation)));
    md.push_str(&format!("| Tables | {} |\n", count(ContentType::Table)));
    md.push_str(&format!("| Images | {} |\n", count(ContentType::Image)));
    md.push_str(&format!("| Characters | {char_count} |\n"));
    md.push_str(&format!("| Words | {} |\n", full_text.split_whitespace().count()));
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeMetadata;

    fn node(kind: ContentType, page: u32, text: &str) -> Node {
        Node::new(
            text,
            NodeMetadata {
                content_type: kind,
                page_idx: page,
                source_file: "paper.pdf".into(),
                image_path: String::new(),
            },
        )
    }

    #[test]
    fn pages_from_highest_index() {
        let nodes = vec![node(ContentType::Text, 0, "a"), node(ContentType::Table, 6, "t")];
        assert_eq!(page_count(&nodes), 7);
        assert_eq!(page_count(&[]), 0);
    }

    #[test]
    fn summary_lists_counts_and_excerpt() {
        let nodes = vec![
            node(ContentType::Text, 0, "Reasoning via RL."),
            node(ContentType::Image, 1, "Figure 1"),
            node(ContentType::Text, 2, "Distillation works."),
        ];
        let md = parse_summary_markdown("paper.pdf", &nodes, 3);
        assert!(md.starts_with("# paper.pdf\n"));
        assert!(md.contains("- **Pages**: 3"));
        assert!(md.contains("Reasoning via RL.\n\nDistillation works."));
        assert!(md.contains("| Images | 1 |"));
        assert!(md.contains("| Words | 5 |"));
    }

    #[test]
    fn long_text_is_truncated() {
        let nodes = vec![node(ContentType::Text, 0, &"x".repeat(1500))];
        let md = parse_summary_markdown("paper.pdf", &nodes, 1);
        assert!(md.contains(&format!("{}...", "x".repeat(1000))));
        assert!(!md.contains(&"x".repeat(1001)));
    }

    #[test]
    fn report_totals() {
        let mut report = IngestReport::default();
        report.nodes_by_type.insert(ContentType::Text, 3);
        report.nodes_by_type.insert(ContentType::Image, 2);
        assert_eq!(report.total_nodes(), 5);
        assert!(report.collection_names().is_empty());
    }
}
