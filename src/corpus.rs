//! Corpora: one collection per source document, built from nodes.

use crate::error::{DocumentError, RagError};
use crate::node::{ContentType, Node};
use crate::pipeline::embed::Embedder;
use crate::store::{Collection, CorpusStore, ScoredNode, StoredRecord};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const MAX_NAME_LEN: usize = 63;

/// Derive a collection name from a source file name.
///
/// The whole file stem is used (`2501.12948.pdf` → `2501.12948`).
/// Characters outside `[A-Za-z0-9._-]` become `_`, runs of dots collapse
/// and the ends are trimmed to alphanumerics, so the result always passes
/// [`crate::store::validate_collection_name`].
pub fn collection_name_for(source_file: &str) -> String {
    let stem = Path::new(source_file)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut name = String::with_capacity(stem.len());
    for c in stem.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            c
        } else {
            '_'
        };
        if c == '.' && name.ends_with('.') {
            continue;
        }
        name.push(c);
    }

    let name: String = name
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .chars()
        .take(MAX_NAME_LEN)
        .collect();
    let name = name.trim_end_matches(|c: char| !c.is_ascii_alphanumeric());

    if name.is_empty() {
        "document".to_string()
    } else {
        name.to_string()
    }
}

/// What one document contributed to its collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorpusSummary {
    /// Collection name.
    pub name: String,
    pub source_file: String,
    /// Nodes embedded for this document.
    pub nodes: usize,
    pub by_type: BTreeMap<ContentType, usize>,
    /// Records of a previous ingestion that were replaced.
    pub replaced: usize,
}

/// Count nodes per content type.
pub fn count_by_type(nodes: &[Node]) -> BTreeMap<ContentType, usize> {
    let mut counts = BTreeMap::new();
    for node in nodes {
        *counts.entry(node.content_type()).or_insert(0) += 1;
    }
    counts
}

/// Embed each document's nodes and store them in the collection named after
/// the document. A re-ingested document replaces its previous records.
///
/// Failures are per document: the others are still built.
pub async fn build_corpus(
    nodes_list: Vec<Vec<Node>>,
    store: &CorpusStore,
    embedder: &dyn Embedder,
) -> (Vec<CorpusSummary>, Vec<DocumentError>) {
    let mut summaries = Vec::new();
    let mut errors = Vec::new();

    for nodes in nodes_list {
        let Some(first) = nodes.first() else {
            continue;
        };
        let source_file = first.metadata.source_file.clone();

        match build_one(nodes, &source_file, store, embedder).await {
            Ok(summary) => summaries.push(summary),
            Err(e) => {
                warn!("Could not build corpus for {}: {}", source_file, e);
                errors.push(DocumentError::CorpusFailed {
                    document: source_file,
                    detail: e.to_string(),
                });
            }
        }
    }

    (summaries, errors)
}

async fn build_one(
    nodes: Vec<Node>,
    source_file: &str,
    store: &CorpusStore,
    embedder: &dyn Embedder,
) -> Result<CorpusSummary, RagError> {
    let start = Instant::now();
    let name = collection_name_for(source_file);
    let mut collection = store
        .get_or_create_collection(&name, embedder.model_name())
        .await?;

    let texts: Vec<String> = nodes.iter().map(|n| n.text.clone()).collect();
    let embeddings = embedder.embed(&texts).await?;
    if embeddings.len() != nodes.len() {
        return Err(RagError::EmbeddingCountMismatch {
            expected: nodes.len(),
            got: embeddings.len(),
        });
    }

    let by_type = count_by_type(&nodes);
    let node_count = nodes.len();
    let records: Vec<StoredRecord> = nodes
        .into_iter()
        .zip(embeddings)
        .map(|(node, embedding)| StoredRecord::new(node, embedding))
        .collect();

    let replaced = collection.replace_source(source_file, records).await?;

    info!(
        "Corpus '{}': {} node(s) from {} in {:?}",
        name,
        node_count,
        source_file,
        start.elapsed()
    );

    Ok(CorpusSummary {
        name,
        source_file: source_file.to_string(),
        nodes: node_count,
        by_type,
        replaced,
    })
}

/// An opened collection bound to the embedder that queries it.
#[derive(Clone)]
pub struct Corpus {
    collection: Arc<Collection>,
    embedder: Arc<dyn Embedder>,
    /// Record count when the corpus was opened.
    records: usize,
}

impl Corpus {
    pub async fn new(collection: Collection, embedder: Arc<dyn Embedder>) -> Result<Self, RagError> {
        let records = collection.len().await?;
        Ok(Self {
            collection: Arc::new(collection),
            embedder,
            records,
        })
    }

    pub fn name(&self) -> &str {
        &self.collection.name
    }

    pub fn len(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Embed `query` and return the `top_k` closest nodes.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredNode>, RagError> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed_query(query).await?;
        let hits = self.collection.query(&embedding, top_k).await?;
        debug!(
            "Corpus '{}': {} hit(s) for {:?}",
            self.name(),
            hits.len(),
            query
        );
        Ok(hits)
    }
}

impl std::fmt::Debug for Corpus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Corpus")
            .field("name", &self.collection.name)
            .field("records", &self.records)
            .field("embedder", &self.embedder.model_name())
            .finish()
    }
}

/// Open the named collection for querying.
pub async fn load_corpus(
    store: &CorpusStore,
    name: &str,
    embedder: Arc<dyn Embedder>,
) -> Result<Corpus, RagError> {
    let collection = store.get_collection(name).await?;
    if collection.embed_model != embedder.model_name() {
        warn!(
            "Corpus '{}' was embedded with '{}', querying with '{}'",
            name,
            collection.embed_model,
            embedder.model_name()
        );
    }
    Corpus::new(collection, embedder).await
}

/// Names of all corpora in the store, sorted.
pub async fn list_collections(store: &CorpusStore) -> Result<Vec<String>, RagError> {
    store.list_collections().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeMetadata;
    use crate::store::validate_collection_name;
    use async_trait::async_trait;

    /// Embeds text as letter counts of 'a' and 'b'.
    struct Letters;

    #[async_trait]
    impl Embedder for Letters {
        fn model_name(&self) -> &str {
            "letters"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
            Ok(texts
                .iter()
                .map(|t| {
                    vec![
                        t.matches('a').count() as f32,
                        t.matches('b').count() as f32,
                    ]
                })
                .collect())
        }
    }

    struct Broken;

    #[async_trait]
    impl Embedder for Broken {
        fn model_name(&self) -> &str {
            "broken"
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
            Err(RagError::EmbeddingApiError {
                message: "401".into(),
            })
        }
    }

    fn node(source: &str, kind: ContentType, text: &str) -> Node {
        Node::new(
            text,
            NodeMetadata {
                content_type: kind,
                page_idx: 0,
                source_file: source.to_string(),
                image_path: String::new(),
            },
        )
    }

    #[test]
    fn names_from_stems() {
        assert_eq!(collection_name_for("deepseek-r1.pdf"), "deepseek-r1");
        assert_eq!(collection_name_for("2501.12948.pdf"), "2501.12948");
        assert_eq!(collection_name_for("My Paper (final).pdf"), "My_Paper__final");
        assert_eq!(collection_name_for("a...b.pdf"), "a.b");
        assert_eq!(collection_name_for("__.pdf"), "document");
        assert_eq!(collection_name_for("论文.pdf"), "document");
        let long = format!("{}.pdf", "x".repeat(80));
        assert_eq!(collection_name_for(&long).len(), 63);
    }

    #[test]
    fn derived_names_are_always_valid() {
        for raw in ["a.pdf", "-x-.pdf", "v1..2.pdf", "ç-a.pdf", ".hidden.pdf", "x-_.pdf"] {
            let name = collection_name_for(raw);
            assert!(validate_collection_name(&name).is_ok(), "{raw} → {name}");
        }
    }

    #[tokio::test]
    async fn build_then_search() {
        let dir = tempfile::tempdir().unwrap();
        let store = CorpusStore::open(dir.path()).await.unwrap();

        let docs = vec![
            vec![
                node("paper.pdf", ContentType::Text, "aaaa"),
                node("paper.pdf", ContentType::Table, "bbbb"),
                node("paper.pdf", ContentType::Text, "ab"),
            ],
            vec![],
        ];
        let (summaries, errors) = build_corpus(docs, &store, &Letters).await;
        assert!(errors.is_empty());
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].name, "paper");
        assert_eq!(summaries[0].nodes, 3);
        assert_eq!(summaries[0].by_type[&ContentType::Text], 2);
        assert_eq!(summaries[0].by_type[&ContentType::Table], 1);

        let corpus = load_corpus(&store, "paper", Arc::new(Letters)).await.unwrap();
        assert_eq!(corpus.len(), 3);
        let hits = corpus.search("b", 2).await.unwrap();
        assert_eq!(hits[0].node.text, "bbbb");
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn reingest_replaces_previous_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = CorpusStore::open(dir.path()).await.unwrap();

        let first = vec![vec![node("p.pdf", ContentType::Text, "a"), node("p.pdf", ContentType::Text, "b")]];
        build_corpus(first, &store, &Letters).await;
        let second = vec![vec![node("p.pdf", ContentType::Text, "ab")]];
        let (summaries, _) = build_corpus(second, &store, &Letters).await;

        assert_eq!(summaries[0].replaced, 2);
        let corpus = load_corpus(&store, "p", Arc::new(Letters)).await.unwrap();
        assert_eq!(corpus.len(), 1);
    }

    #[tokio::test]
    async fn embedding_failure_is_per_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = CorpusStore::open(dir.path()).await.unwrap();
        let (summaries, errors) =
            build_corpus(vec![vec![node("p.pdf", ContentType::Text, "a")]], &store, &Broken).await;
        assert!(summaries.is_empty());
        assert!(matches!(&errors[0], DocumentError::CorpusFailed { document, .. } if document == "p.pdf"));
        assert!(list_collections(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_corpus_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = CorpusStore::open(dir.path()).await.unwrap();
        let err = load_corpus(&store, "nope", Arc::new(Letters)).await.unwrap_err();
        assert!(matches!(err, RagError::CollectionNotFound { .. }));
    }
}
