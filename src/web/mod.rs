//! Web UI: upload PDFs on one side, chat with a corpus on the other.
//!
//! A single-page HTML client talks to a small JSON API:
//!
//! | Route | Behaviour |
//! |---|---|
//! | `GET /` | the page |
//! | `GET /health` | `ok` |
//! | `GET /api/corpora` | `{ "corpora": [...] }` |
//! | `POST /api/upload` | multipart `file` fields → [`IngestReport`] |
//! | `POST /api/chat` | `{ question, corpus }` → `{ answer, sources }` |
//! | `GET /api/history` | chat turns of this server session |
//! | `DELETE /api/history` | clear the history |
//!
//! Uploads are ingested one batch at a time; chat requests run concurrently.

pub mod error;

use crate::config::RagConfig;
use crate::error::RagError;
use crate::ingest::{ask, ingest_uploads, IngestReport};
use crate::retrieve::Source;
use crate::store::CorpusStore;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use error::ApiError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Upload body limit, multipart overhead included.
pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Chat turns kept in memory; the oldest are dropped first.
pub const MAX_HISTORY_TURNS: usize = 200;

const INDEX_HTML: &str = include_str!("page.html");

/// One side of a chat exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// `user` or `assistant`.
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corpus: Option<String>,
}

/// Shared server state.
pub struct AppState {
    config: RagConfig,
    history: Mutex<Vec<ChatTurn>>,
    ingest_lock: Mutex<()>,
}

impl AppState {
    pub fn new(config: RagConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            history: Mutex::new(Vec::new()),
            ingest_lock: Mutex::new(()),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    pub corpus: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<Source>,
}

#[derive(Debug, Serialize)]
struct CorporaResponse {
    corpora: Vec<String>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    history: Vec<ChatTurn>,
}

/// Build the router over `state`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(|| async { "ok" }))
        .route("/api/corpora", get(list_corpora))
        .route("/api/upload", post(upload))
        .route("/api/chat", post(chat))
        .route("/api/history", get(history).delete(clear_history))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Serve the UI on `addr` until Ctrl-C.
pub async fn serve(config: RagConfig, addr: SocketAddr) -> Result<(), RagError> {
    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .map_err(|e| RagError::io(&config.upload_dir, e))?;

    let app = router(AppState::new(config));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| RagError::Internal(format!("cannot bind {addr}: {e}")))?;

    info!(addr = %addr, "Web UI listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down web UI");
        })
        .await
        .map_err(|e| RagError::Internal(format!("server error: {e}")))
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn list_corpora(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CorporaResponse>, ApiError> {
    let store = CorpusStore::open(&state.config.persist_dir).await?;
    let corpora = store.list_collections().await?;
    Ok(Json(CorporaResponse { corpora }))
}

async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<IngestReport>, ApiError> {
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or("document.pdf").to_string();
        let bytes = field.bytes().await.map_err(|e| {
            warn!("Failed to read upload bytes: {e}");
            ApiError::BadRequest("Failed to read file data.".into())
        })?;
        files.push((name, bytes.to_vec()));
    }

    if files.is_empty() {
        return Err(ApiError::BadRequest("No file provided.".into()));
    }

    let _guard = state.ingest_lock.lock().await;
    info!("Upload of {} file(s)", files.len());
    let report = ingest_uploads(files, &state.config).await?;
    Ok(Json(report))
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let question = request.question.trim();
    if question.is_empty() {
        return Err(ApiError::BadRequest("Question must not be empty.".into()));
    }
    let corpus = request.corpus.trim();
    if corpus.is_empty() {
        return Err(ApiError::BadRequest(
            "Select a corpus before asking a question.".into(),
        ));
    }

    let answer = ask(question, corpus, &state.config).await?;

    let exchange = [
        ChatTurn {
            role: "user".into(),
            content: question.to_string(),
            corpus: Some(corpus.to_string()),
        },
        ChatTurn {
            role: "assistant".into(),
            content: answer.text.clone(),
            corpus: Some(corpus.to_string()),
        },
    ];
    push_capped(&mut *state.history.lock().await, exchange);

    Ok(Json(ChatResponse {
        answer: answer.text,
        sources: answer.sources,
    }))
}

fn push_capped(history: &mut Vec<ChatTurn>, turns: impl IntoIterator<Item = ChatTurn>) {
    history.extend(turns);
    if history.len() > MAX_HISTORY_TURNS {
        let excess = history.len() - MAX_HISTORY_TURNS;
        history.drain(..excess);
    }
}

async fn history(State(state): State<Arc<AppState>>) -> Json<HistoryResponse> {
    let history = state.history.lock().await.clone();
    Json(HistoryResponse { history })
}

async fn clear_history(State(state): State<Arc<AppState>>) -> StatusCode {
    state.history.lock().await.clear();
    StatusCode::NO_CONTENT
}
