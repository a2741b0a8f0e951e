//! HTTP error responses
//!
//! Every error body has the shape
//! `{"error":{"type":"...","message":"...","request_id":"req_..."}}`;
//! `request_id` is present only on routes that assign one.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// An error ready to be rendered as a JSON response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing or invalid admin token",
        )
    }

    pub fn unknown_credential() -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "unknown_credential",
            "no credential matches",
        )
    }

    pub fn ambiguous_preview(matches: usize) -> Self {
        Self::new(
            StatusCode::CONFLICT,
            "ambiguous_preview",
            format!("preview matches {matches} credentials; pass the full key"),
        )
    }

    pub fn admin_disabled() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "admin_disabled",
            "no admin token configured",
        )
    }
}

impl From<key_pool::Error> for ApiError {
    fn from(err: key_pool::Error) -> Self {
        let status = match err {
            key_pool::Error::EmptyPool | key_pool::Error::Exhausted { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            key_pool::Error::Source(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.label(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut error = serde_json::json!({
            "type": self.kind,
            "message": self.message,
        });
        if let Some(id) = self.request_id {
            error["request_id"] = serde_json::Value::String(id);
        }
        (
            self.status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            serde_json::json!({ "error": error }).to_string(),
        )
            .into_response()
    }
}
