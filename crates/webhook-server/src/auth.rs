use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::AppState;

pub(crate) fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Token from `Authorization: Bearer <token>`, if any.
pub(crate) fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[derive(Debug)]
pub enum AuthError {
    SecretNotConfigured,
    MissingToken,
    InvalidToken,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::SecretNotConfigured => write!(f, "WEBHOOK_SECRET not configured"),
            AuthError::MissingToken => write!(f, "Missing bearer token"),
            AuthError::InvalidToken => write!(f, "Invalid bearer token"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        // Every variant looks the same to the caller.
        (StatusCode::FORBIDDEN, Json(json!({ "error": "Unauthorized" }))).into_response()
    }
}

/// Rejects requests whose bearer token does not match `WEBHOOK_SECRET`.
/// With no secret configured every request is rejected.
pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let Some(expected) = state.secret_hash.as_deref() else {
        tracing::warn!("Webhook called but WEBHOOK_SECRET is not configured");
        return Err(AuthError::SecretNotConfigured);
    };
    let provided = extract_bearer(request.headers()).ok_or(AuthError::MissingToken)?;

    // Compare fixed-length digests rather than the raw strings.
    if hash_key(provided) != expected {
        tracing::warn!("Invalid webhook token attempted");
        return Err(AuthError::InvalidToken);
    }

    Ok(next.run(request).await)
}
