//! JSON error responses for the web API.

use crate::error::RagError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// `{ "error": { "code", "message" } }`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Upstream model error: {0}")]
    Upstream(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail),
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail),
            ApiError::Unavailable(detail) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", detail)
            }
            ApiError::Upstream(detail) => {
                tracing::error!(detail = %detail, "Model API failure");
                (StatusCode::BAD_GATEWAY, "UPSTREAM", detail)
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail = %detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        match err {
            RagError::CollectionNotFound { .. } => ApiError::NotFound(err.to_string()),
            RagError::InvalidInput { .. }
            | RagError::NotAPdf { .. }
            | RagError::InvalidCollectionName { .. }
            | RagError::FileNotFound { .. }
            | RagError::DownloadFailed { .. }
            | RagError::DownloadTimeout { .. } => ApiError::BadRequest(err.to_string()),
            RagError::ParserUnavailable { .. } | RagError::ProviderNotConfigured { .. } => {
                ApiError::Unavailable(err.to_string())
            }
            RagError::VlmApiError { .. }
            | RagError::VlmTimeout { .. }
            | RagError::EmbeddingApiError { .. }
            | RagError::EmbeddingCountMismatch { .. } => ApiError::Upstream(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn json_of(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn bad_request_returns_400() {
        let response = ApiError::BadRequest("question is empty".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_of(response).await;
        assert_eq!(json["error"]["code"], "BAD_REQUEST");
        assert_eq!(json["error"]["message"], "question is empty");
    }

    #[tokio::test]
    async fn internal_hides_detail() {
        let response = ApiError::Internal("disk on fire".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = json_of(response).await;
        assert_eq!(json["error"]["message"], "An internal error occurred");
    }

    #[tokio::test]
    async fn missing_corpus_maps_to_404() {
        let err: ApiError = RagError::CollectionNotFound {
            name: "paper".into(),
        }
        .into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn provider_and_model_errors_map_to_5xx_kinds() {
        let e: ApiError = RagError::ProviderNotConfigured {
            provider: "openai".into(),
            hint: "set DASHSCOPE_API_KEY".into(),
        }
        .into();
        assert!(matches!(e, ApiError::Unavailable(_)));

        let e: ApiError = RagError::EmbeddingApiError {
            message: "429".into(),
        }
        .into();
        assert!(matches!(e, ApiError::Upstream(_)));
    }
}
