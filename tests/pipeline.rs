//! Integration tests for the ingest → store → ask pipeline.
//!
//! The parser, vision model and embedder are replaced by in-process mocks,
//! so these run offline. A live test at the bottom exercises MinerU and a
//! real provider; it is gated behind `E2E_ENABLED`.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use async_trait::async_trait;
use pdf_rag::prompts::ASSISTANT_SYSTEM_PROMPT;
use pdf_rag::{
    ask, embed_parsed, ingest_pdfs, ingest_uploads, list_collections, ContentType, CorpusStore,
    DocumentError, DocumentParser, Embedder, IngestProgressCallback, RagConfig, RagError,
    VisionModel, VisionReply, VisionRequest,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Mocks ────────────────────────────────────────────────────────────────────

const CONTENT_LIST: &str = r#"[
    {"type": "text", "text": "DeepSeek-R1-Zero is trained with large-scale reinforcement learning.", "text_level": 1, "page_idx": 0},
    {"type": "image", "img_path": "images/fig2.jpg", "image_caption": ["Figure 2: AIME accuracy during training"], "page_idx": 1},
    {"type": "equation", "text": "$$A_i = \\frac{r_i - mean(r)}{std(r)}$$", "page_idx": 2},
    {"type": "table", "table_caption": ["Table 1: benchmark results"], "table_body": "<table><tr><td>Model</td><td>AIME</td></tr><tr><td>R1</td><td>79.8</td></tr></table>", "page_idx": 3}
]"#;

const JPEG: [u8; 8] = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46];

/// Writes a MinerU-shaped result directory instead of running MinerU.
/// PDFs whose stem starts with `broken` fail like a crashed parser.
struct FixtureParser {
    calls: AtomicUsize,
}

#[async_trait]
impl DocumentParser for FixtureParser {
    async fn parse(&self, pdf: &Path, output_dir: &Path) -> Result<PathBuf, RagError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stem = pdf
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        if stem.starts_with("broken") {
            return Err(RagError::ParserFailed {
                path: pdf.to_path_buf(),
                code: Some(1),
                stderr: "layout model crashed".into(),
            });
        }
        Ok(write_parse_result(output_dir, &stem))
    }
}

fn write_parse_result(output_dir: &Path, stem: &str) -> PathBuf {
    let dir = output_dir.join(stem).join("auto");
    std::fs::create_dir_all(dir.join("images")).unwrap();
    std::fs::write(dir.join(format!("{stem}_content_list.json")), CONTENT_LIST).unwrap();
    std::fs::write(dir.join("images/fig2.jpg"), JPEG).unwrap();
    dir
}

/// Describes images with a fixed sentence and answers with another,
/// recording what each synthesis request carried.
#[derive(Default)]
struct ScriptedVision {
    describe_calls: AtomicUsize,
    synthesis: Mutex<Vec<VisionRequest>>,
}

#[async_trait]
impl VisionModel for ScriptedVision {
    fn name(&self) -> &str {
        "scripted-vl"
    }

    async fn complete(&self, request: VisionRequest) -> Result<VisionReply, RagError> {
        if request.system == ASSISTANT_SYSTEM_PROMPT {
            self.describe_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(VisionReply {
                content: "A line plot of AIME accuracy rising over training steps.".into(),
                input_tokens: 900,
                output_tokens: 12,
            });
        }
        self.synthesis.lock().unwrap().push(request);
        Ok(VisionReply {
            content: "```\nR1-Zero was trained with pure reinforcement learning.\n```".into(),
            input_tokens: 1500,
            output_tokens: 10,
        })
    }
}

/// Letter-frequency vectors: deterministic and good enough to rank.
struct LetterEmbedder;

#[async_trait]
impl Embedder for LetterEmbedder {
    fn model_name(&self) -> &str {
        "letters-27"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 27];
                v[26] = 1.0;
                for c in t.to_ascii_lowercase().bytes() {
                    if c.is_ascii_lowercase() {
                        v[(c - b'a') as usize] += 1.0;
                    }
                }
                v
            })
            .collect())
    }
}

#[derive(Default)]
struct Counting {
    completed: AtomicUsize,
    failed: AtomicUsize,
    images: AtomicUsize,
}

impl IngestProgressCallback for Counting {
    fn on_image_described(&self, _document: &str, _done: usize, _total: usize) {
        self.images.fetch_add(1, Ordering::SeqCst);
    }
    fn on_document_complete(&self, _name: &str, _nodes: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_document_error(&self, _name: &str, _error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Test helpers ─────────────────────────────────────────────────────────────

struct Harness {
    root: tempfile::TempDir,
    vision: Arc<ScriptedVision>,
    parser: Arc<FixtureParser>,
    progress: Arc<Counting>,
    config: RagConfig,
}

fn harness() -> Harness {
    let root = tempfile::tempdir().unwrap();
    let vision = Arc::new(ScriptedVision::default());
    let parser = Arc::new(FixtureParser {
        calls: AtomicUsize::new(0),
    });
    let progress = Arc::new(Counting::default());
    let config = RagConfig::builder()
        .persist_dir(root.path().join("store"))
        .parse_output_dir(root.path().join("parsed"))
        .upload_dir(root.path().join("uploads"))
        .vision(vision.clone())
        .embedder(Arc::new(LetterEmbedder))
        .parser(parser.clone())
        .progress_callback(progress.clone())
        .build()
        .unwrap();
    Harness {
        root,
        vision,
        parser,
        progress,
        config,
    }
}

fn write_pdf(dir: &Path, name: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, b"%PDF-1.7\n%fixture\n").unwrap();
    path.to_string_lossy().to_string()
}

// ── Ingestion ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ingest_builds_one_corpus_per_pdf() {
    let h = harness();
    let pdf = write_pdf(h.root.path(), "deepseek-r1.pdf");

    let report = ingest_pdfs(&[pdf], &h.config).await.unwrap();

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.collection_names(), ["deepseek-r1"]);
    assert_eq!(report.total_nodes(), 4);
    for kind in [
        ContentType::Text,
        ContentType::Image,
        ContentType::Equation,
        ContentType::Table,
    ] {
        assert_eq!(report.nodes_by_type.get(&kind), Some(&1), "{kind:?}");
    }

    let doc = &report.documents[0];
    assert_eq!(doc.source_file, "deepseek-r1.pdf");
    assert_eq!(doc.pages, 4);
    assert!(doc.summary.starts_with("# deepseek-r1.pdf"));
    assert!(doc.summary.contains("reinforcement learning"));

    assert_eq!(h.vision.describe_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.progress.images.load(Ordering::SeqCst), 1);
    assert_eq!(h.progress.completed.load(Ordering::SeqCst), 1);

    // The PDF was staged next to the other uploads.
    assert!(h.root.path().join("uploads/deepseek-r1.pdf").exists());
}

#[tokio::test]
async fn reingest_replaces_previous_records() {
    let h = harness();
    let pdf = write_pdf(h.root.path(), "paper.pdf");

    let first = ingest_pdfs(&[pdf.clone()], &h.config).await.unwrap();
    assert_eq!(first.collections[0].replaced, 0);

    let second = ingest_pdfs(&[pdf], &h.config).await.unwrap();
    assert_eq!(second.collections[0].replaced, 4);

    let store = CorpusStore::open(&h.config.persist_dir).await.unwrap();
    let collection = store.get_collection("paper").await.unwrap();
    assert_eq!(collection.len().await.unwrap(), 4);
    assert_eq!(collection.embed_model, "letters-27");
}

#[tokio::test]
async fn failed_documents_are_reported_not_fatal() {
    let h = harness();
    let good = write_pdf(h.root.path(), "good.pdf");
    let broken = write_pdf(h.root.path(), "broken.pdf");
    let missing = h.root.path().join("missing.pdf").to_string_lossy().to_string();

    let report = ingest_pdfs(&[good, broken, missing], &h.config)
        .await
        .unwrap();

    assert_eq!(report.collection_names(), ["good"]);
    assert_eq!(report.errors.len(), 2, "{:?}", report.errors);
    assert!(report
        .errors
        .iter()
        .all(|e| matches!(e, DocumentError::ParseFailed { .. })));
    assert!(report.errors.iter().any(|e| e.document().contains("broken")));
    // The missing file never reached the parser.
    assert_eq!(h.parser.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.progress.failed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn staging_failure_skips_only_that_document() {
    let h = harness();
    let good = write_pdf(h.root.path(), "good.pdf");
    let blocked = write_pdf(h.root.path(), "blocked.pdf");
    // A directory where the staged copy should go makes the copy fail.
    std::fs::create_dir_all(h.root.path().join("uploads/blocked.pdf")).unwrap();

    let report = ingest_pdfs(&[blocked, good], &h.config).await.unwrap();

    assert_eq!(report.collection_names(), ["good"]);
    assert_eq!(report.errors.len(), 1, "{:?}", report.errors);
    assert!(report.errors[0].document().ends_with("blocked.pdf"));
    assert!(report.errors[0].to_string().contains("I/O error"), "{}", report.errors[0]);
    assert_eq!(h.parser.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn all_inputs_invalid_is_an_error() {
    let h = harness();
    let not_pdf = h.root.path().join("notes.pdf");
    std::fs::write(&not_pdf, b"hello").unwrap();

    let err = ingest_pdfs(&[not_pdf.to_string_lossy().to_string()], &h.config)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::NotAPdf { .. }), "{err:?}");
    assert_eq!(h.parser.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn uploads_are_staged_and_ingested() {
    let h = harness();
    let files = vec![
        ("Attention Is All You Need.pdf".to_string(), b"%PDF-1.5\n".to_vec()),
        ("readme.txt".to_string(), b"%PDF-1.5\n".to_vec()),
    ];

    let report = ingest_uploads(files, &h.config).await.unwrap();

    assert_eq!(report.collections.len(), 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].document(), "readme.txt");
}

#[tokio::test]
async fn embed_parsed_skips_the_parser() {
    let h = harness();
    let dir = write_parse_result(&h.root.path().join("existing"), "survey");

    let report = embed_parsed(&[dir], &h.config).await.unwrap();

    assert_eq!(report.collection_names(), ["survey"]);
    assert_eq!(report.total_nodes(), 4);
    assert_eq!(h.parser.calls.load(Ordering::SeqCst), 0);
}

// ── Question answering ───────────────────────────────────────────────────────

#[tokio::test]
async fn ask_sends_text_as_context_and_figures_as_images() {
    let h = harness();
    let pdf = write_pdf(h.root.path(), "deepseek-r1.pdf");
    ingest_pdfs(&[pdf], &h.config).await.unwrap();

    let answer = ask("How was R1-Zero trained?", "deepseek-r1", &h.config)
        .await
        .unwrap();

    assert_eq!(
        answer.text,
        "R1-Zero was trained with pure reinforcement learning."
    );
    // top_k defaults to 5, the corpus holds 4 nodes.
    assert_eq!(answer.sources.len(), 4);
    assert!(answer
        .sources
        .windows(2)
        .all(|w| w[0].score >= w[1].score));

    let requests = h.vision.synthesis.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.text, "How was R1-Zero trained?");
    assert_eq!(request.images.len(), 1);
    assert!(request.system.contains("large-scale reinforcement learning"));
    assert!(request.system.contains("| Model | AIME |"));
    // Image descriptions are searchable, but the image itself is what the
    // model sees at answer time.
    assert!(!request.system.contains("A line plot of AIME accuracy"));
}

#[tokio::test]
async fn ask_unknown_corpus_is_not_found() {
    let h = harness();
    let err = ask("anything", "nope", &h.config).await.unwrap_err();
    assert!(matches!(err, RagError::CollectionNotFound { .. }), "{err:?}");
}

#[tokio::test]
async fn list_returns_sorted_corpus_names() {
    let h = harness();
    let b = write_pdf(h.root.path(), "beta.pdf");
    let a = write_pdf(h.root.path(), "alpha.pdf");
    ingest_pdfs(&[b, a], &h.config).await.unwrap();

    let store = CorpusStore::open(&h.config.persist_dir).await.unwrap();
    assert_eq!(list_collections(&store).await.unwrap(), ["alpha", "beta"]);
}

// ── Web API ──────────────────────────────────────────────────────────────────

#[cfg(feature = "server")]
mod web {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use pdf_rag::web::{router, AppState};
    use tower::ServiceExt;

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn upload_then_chat_then_history() {
        let h = harness();
        let state = AppState::new(h.config.clone());

        let boundary = "PDFRAGBOUNDARY";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"paper.pdf\"\r\n\
                 Content-Type: application/pdf\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"%PDF-1.7\n%fixture\n");
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let response = router(state.clone())
            .oneshot(
                Request::post("/api/upload")
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report = json(response).await;
        assert_eq!(report["collections"][0]["name"], "paper");
        assert!(report["documents"][0]["summary"]
            .as_str()
            .unwrap()
            .contains("## Statistics"));

        let response = router(state.clone())
            .oneshot(Request::get("/api/corpora").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json(response).await["corpora"], serde_json::json!(["paper"]));

        let response = router(state.clone())
            .oneshot(
                Request::post("/api/chat")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        r#"{"question":"How was R1-Zero trained?","corpus":"paper"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let chat = json(response).await;
        assert_eq!(
            chat["answer"],
            "R1-Zero was trained with pure reinforcement learning."
        );
        assert_eq!(chat["sources"].as_array().unwrap().len(), 4);

        let response = router(state)
            .oneshot(Request::get("/api/history").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let history = json(response).await;
        assert_eq!(history["history"].as_array().unwrap().len(), 2);
        assert_eq!(history["history"][0]["role"], "user");
        assert_eq!(history["history"][1]["role"], "assistant");
    }

    #[tokio::test]
    async fn chat_with_unknown_corpus_is_404() {
        let h = harness();
        let response = router(AppState::new(h.config.clone()))
            .oneshot(
                Request::post("/api/chat")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"question":"hi","corpus":"missing"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json(response).await["error"]["code"], "NOT_FOUND");
    }
}

// ── Live end-to-end ──────────────────────────────────────────────────────────

/// Runs MinerU and the configured provider on `PDFRAG_E2E_PDF`.
///
///   E2E_ENABLED=1 PDFRAG_E2E_PDF=paper.pdf DASHSCOPE_API_KEY=... \
///     cargo test --test pipeline live_ingest_and_ask -- --nocapture
#[tokio::test]
async fn live_ingest_and_ask() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
        return;
    }
    let Ok(pdf) = std::env::var("PDFRAG_E2E_PDF") else {
        println!("SKIP — set PDFRAG_E2E_PDF to a PDF path or URL");
        return;
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("pdf_rag=debug"))
        .with_test_writer()
        .try_init();

    let root = tempfile::tempdir().unwrap();
    let mut config = RagConfig::from_env().unwrap();
    config.persist_dir = root.path().join("store");
    config.parse_output_dir = root.path().join("parsed");
    config.upload_dir = root.path().join("uploads");

    let report = ingest_pdfs(&[pdf], &config).await.unwrap();
    println!("{}", serde_json::to_string_pretty(&report).unwrap());
    assert!(!report.collections.is_empty(), "{:?}", report.errors);

    let corpus = report.collections[0].name.clone();
    let answer = ask("What is the main contribution of this paper?", &corpus, &config)
        .await
        .unwrap();
    println!("{}", answer.text);
    assert!(!answer.text.trim().is_empty());
    assert!(!answer.sources.is_empty());
}
