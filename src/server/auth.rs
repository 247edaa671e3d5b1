//! Shared-secret check for internal endpoints.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

const AUTH_HEADER: &str = "x-internal-auth";

/// Compare the `X-Internal-Auth` header against the configured token.
#[must_use]
pub fn verify_internal_auth(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(AUTH_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|token| constant_time_eq(token.as_bytes(), expected.as_bytes()))
}

/// 401 response for a missing or wrong token.
#[must_use]
pub fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "detail": "Missing or invalid X-Internal-Auth header" })),
    )
        .into_response()
}

/// Length-leaking only; the compared values are same-purpose secrets, not
/// attacker-chosen lengths.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
