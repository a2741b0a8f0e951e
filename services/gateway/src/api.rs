//! Request handlers for generation, stats and admin operations
//!
//! Endpoints:
//! - POST /v1/generate: route one prompt through the credential pool
//! - GET  /stats: pool summary with redacted per-credential stats
//! - POST /admin/reload: re-read the credential source (Bearer admin token)
//! - POST /admin/credentials/active: enable or disable one credential
//!   (Bearer admin token)

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use common::redact;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
}

/// Body of `POST /admin/credentials/active`. Exactly one of `key` or
/// `preview` names the credential.
#[derive(Deserialize)]
pub struct SetActiveRequest {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub preview: Option<String>,
    pub active: bool,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub text: String,
    pub request_id: String,
}

/// POST /v1/generate: returns the generated text or a 503 once the pool
/// is empty or exhausted. Per-attempt failures never reach the client.
pub async fn generate(
    State(state): State<AppState>,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());

    let Json(request) = body.map_err(|rejection| {
        ApiError::invalid_request(rejection.body_text()).with_request_id(&request_id)
    })?;
    if request.prompt.trim().is_empty() {
        return Err(ApiError::invalid_request("prompt must not be empty").with_request_id(&request_id));
    }

    match state.router.generate(&request.prompt).await {
        Ok(text) => Ok(Json(GenerateResponse { text, request_id })),
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "generation failed");
            Err(ApiError::from(e).with_request_id(request_id))
        }
    }
}

/// GET /stats: never exposes full credentials.
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.pool.stats())
}

/// Extract the token from an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Check the admin bearer token. 403 when no token is configured.
fn authorize(state: &AppState, headers: &HeaderMap, action: &str) -> Result<(), ApiError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Err(ApiError::admin_disabled());
    };
    match bearer_token(headers) {
        Some(presented) if expected.matches(presented) => Ok(()),
        _ => {
            warn!(action, "admin request rejected: bad token");
            Err(ApiError::unauthorized())
        }
    }
}

/// POST /admin/reload: fetch the current credential set from the source
/// and merge it into the pool.
pub async fn admin_reload(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers, "reload")?;

    let credentials = key_pool::reload(&state.pool, state.source.as_ref())
        .await
        .map_err(|e| {
            warn!(source = %state.source.describe(), error = %e, "admin reload failed");
            ApiError::from(e)
        })?;

    info!(source = %state.source.describe(), credentials, "admin reload complete");
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "credentials": credentials,
            "active": state.pool.active_len(),
        })),
    ))
}

/// POST /admin/credentials/active: toggle whether a credential may be
/// selected. Inactive credentials keep their stats and stay in `/stats`.
pub async fn admin_set_active(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SetActiveRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers, "set_active")?;
    let Json(request) =
        body.map_err(|rejection| ApiError::invalid_request(rejection.body_text()))?;

    let id = match (request.key, request.preview) {
        (Some(key), None) => key,
        (None, Some(preview)) => {
            let mut ids = state.pool.ids_with_preview(&preview);
            match ids.len() {
                0 => return Err(ApiError::unknown_credential()),
                1 => ids.remove(0),
                n => return Err(ApiError::ambiguous_preview(n)),
            }
        }
        _ => {
            return Err(ApiError::invalid_request(
                "exactly one of \"key\" or \"preview\" is required",
            ));
        }
    };

    if !state.pool.set_active(&id, request.active) {
        return Err(ApiError::unknown_credential());
    }

    info!(
        credential = %redact(&id),
        active = request.active,
        "admin set credential eligibility"
    );
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "credential": redact(&id),
            "active": request.active,
            "credentials_active": state.pool.active_len(),
        })),
    ))
}
