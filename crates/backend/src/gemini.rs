//! Gemini `generateContent` backend
//!
//! Sends one prompt per call to the Generative Language API, authenticated with
//! the credential chosen by the router via the `x-goog-api-key` header. The
//! response text is the concatenation of the first candidate's text parts.

use std::time::Duration;

use common::redact;
use serde::Deserialize;
use tracing::debug;

use crate::classify::classify_status;
use crate::{Backend, BackendError, InvokeFuture, Result};

/// Default public endpoint for the Generative Language API.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Default model name.
pub const DEFAULT_MODEL: &str = "gemini-pro";

/// Connection settings for [`GeminiBackend`].
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Backend calling `POST {base_url}/v1beta/models/{model}:generateContent`.
pub struct GeminiBackend {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiBackend {
    pub fn new(client: reqwest::Client, config: GeminiConfig) -> Self {
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    async fn generate(&self, credential: &str, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        debug!(
            credential = %redact(credential),
            model = %self.config.model,
            "invoking generateContent"
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", credential)
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    BackendError::Unavailable(format!("request failed: {e}"))
                } else {
                    BackendError::Other(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Other(format!("reading response body: {e}")))?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &text));
        }

        extract_text(&text)
    }
}

impl Backend for GeminiBackend {
    fn id(&self) -> &str {
        "gemini"
    }

    fn invoke<'a>(&'a self, credential: &'a str, prompt: &'a str) -> InvokeFuture<'a> {
        Box::pin(self.generate(credential, prompt))
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

/// Pull the generated text out of a successful response body.
///
/// A 200 with no candidate text (safety block, empty candidate list) is a
/// failed attempt, not an empty answer.
fn extract_text(body: &str) -> Result<String> {
    let parsed: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| BackendError::Other(format!("malformed response: {e}")))?;

    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::Other("response contained no candidates".into()))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
        return Err(BackendError::Other(format!(
            "candidate had no text (finish reason: {reason})"
        )));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use axum::http::StatusCode;
    use tokio::net::TcpListener;

    /// Start a mock upstream that answers every request with the given status and body.
    async fn start_upstream(status: StatusCode, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = axum::Router::new().fallback(move || async move {
                (
                    status,
                    [(axum::http::header::CONTENT_TYPE, "application/json")],
                    body,
                )
            });
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Start a mock upstream that echoes the api key header and request path as text.
    async fn start_echo_upstream() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = axum::Router::new().fallback(
                |request: axum::http::Request<axum::body::Body>| async move {
                    let key = request
                        .headers()
                        .get("x-goog-api-key")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    let path = request.uri().path().to_string();
                    let bytes = axum::body::to_bytes(request.into_body(), 1024 * 1024)
                        .await
                        .unwrap();
                    let sent: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
                    let prompt = sent["contents"][0]["parts"][0]["text"]
                        .as_str()
                        .unwrap_or("")
                        .to_string();
                    axum::Json(serde_json::json!({
                        "candidates": [{
                            "content": { "parts": [{ "text": format!("{key}|{path}|{prompt}") }] },
                            "finishReason": "STOP"
                        }]
                    }))
                },
            );
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn backend(base_url: String) -> GeminiBackend {
        GeminiBackend::new(
            reqwest::Client::new(),
            GeminiConfig {
                base_url,
                model: "gemini-pro".into(),
                timeout: Duration::from_secs(5),
            },
        )
    }

    #[test]
    fn extract_text_joins_parts() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Hello"},{"text":", world"}]}}]}"#;
        assert_eq!(extract_text(body).unwrap(), "Hello, world");
    }

    #[test]
    fn extract_text_no_candidates_is_error() {
        let err = extract_text(r#"{"candidates":[]}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn extract_text_blocked_candidate_reports_reason() {
        let body = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        let err = extract_text(body).unwrap_err();
        assert!(err.to_string().contains("SAFETY"), "got: {err}");
    }

    #[test]
    fn extract_text_malformed_json() {
        assert!(matches!(
            extract_text("not json"),
            Err(BackendError::Other(_))
        ));
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let b = backend("http://localhost:1234/".into());
        assert_eq!(
            b.endpoint(),
            "http://localhost:1234/v1beta/models/gemini-pro:generateContent"
        );
    }

    #[tokio::test]
    async fn invoke_sends_key_header_and_prompt() {
        let url = start_echo_upstream().await;
        let b = backend(url);

        let text = b.invoke("AIza-test-key", "Hello").await.unwrap();
        assert_eq!(
            text,
            "AIza-test-key|/v1beta/models/gemini-pro:generateContent|Hello"
        );
    }

    #[tokio::test]
    async fn invoke_maps_429_to_rate_limited() {
        let url = start_upstream(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED"}}"#,
        )
        .await;
        let err = backend(url).invoke("k", "p").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn invoke_maps_503_to_unavailable() {
        let url = start_upstream(StatusCode::SERVICE_UNAVAILABLE, r#"{"error":{}}"#).await;
        let err = backend(url).invoke("k", "p").await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)), "got: {err}");
    }

    #[tokio::test]
    async fn invoke_dead_upstream_is_unavailable() {
        let err = backend("http://127.0.0.1:1".into())
            .invoke("k", "p")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }
}
