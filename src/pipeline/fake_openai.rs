//! A catch-all axum server standing in for an OpenAI-compatible endpoint.
//!
//! Answers every request with the same JSON body and keeps what it
//! received, so tests can check which URL, key and model reached the wire.

use axum::extract::State;
use axum::http::{header, HeaderMap, Method, Uri};
use axum::response::IntoResponse;
use axum::Router;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// One received request.
#[derive(Debug, Clone)]
pub(crate) struct Received {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: String,
}

impl Received {
    pub fn has_header(&self, name: &str, value: &str) -> bool {
        self.headers
            .get_all(name)
            .iter()
            .any(|v| v.to_str().map(|v| v == value).unwrap_or(false))
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

#[derive(Clone)]
struct Shared {
    response: &'static str,
    received: Arc<Mutex<Vec<Received>>>,
}

pub(crate) struct FakeOpenAi {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Received>>>,
}

impl FakeOpenAi {
    pub async fn start(response: &'static str) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new().fallback(record).with_state(Shared {
            response,
            received: Arc::clone(&received),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, received }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    pub fn last_request(&self) -> Received {
        self.received.lock().unwrap().last().cloned().unwrap()
    }
}

async fn record(
    State(shared): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    shared.received.lock().unwrap().push(Received {
        method,
        path: uri.path().to_string(),
        headers,
        body,
    });
    ([(header::CONTENT_TYPE, "application/json")], shared.response)
}
