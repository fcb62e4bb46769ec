use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

const SNIPPET_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("archive error: {0}")]
    Archive(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("other: {0}")]
    Other(String),
}

impl ServiceError {
    pub fn upstream(status: u16, body: &str) -> Self {
        ServiceError::Upstream {
            status,
            body: snippet(body, SNIPPET_CHARS),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Upstream { .. } | ServiceError::Network(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Configuration(_)
            | ServiceError::Archive(_)
            | ServiceError::Io(_)
            | ServiceError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<zip::result::ZipError> for ServiceError {
    fn from(err: zip::result::ZipError) -> Self {
        ServiceError::Archive(err.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(%status, error = %self, "request failed");
        }

        let body = match &self {
            ServiceError::Upstream { status: upstream, .. } => serde_json::json!({
                "error": self.to_string(),
                "upstream_status": upstream,
            }),
            _ => serde_json::json!({
                "error": self.to_string(),
            }),
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Truncates `text` to at most `max_chars` characters.
pub fn snippet(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_taxonomy_to_statuses() {
        assert_eq!(
            ServiceError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::Configuration("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServiceError::upstream(401, "nope").status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::Network("reset".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::NotFound("b1".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn snippet_respects_char_boundaries() {
        assert_eq!(snippet("äöü", 2), "äö");
        assert_eq!(snippet("short", 50), "short");
    }

    #[test]
    fn upstream_body_is_truncated() {
        let long = "x".repeat(2000);
        match ServiceError::upstream(500, &long) {
            ServiceError::Upstream { body, .. } => assert_eq!(body.len(), SNIPPET_CHARS),
            other => panic!("unexpected {other:?}"),
        }
    }
}
