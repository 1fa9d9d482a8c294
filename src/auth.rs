//! Pre-shared API key authentication.
//!
//! Every endpoint except `/api/health` requires an
//! `Authorization: Bearer <key>` header.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Axum middleware that rejects requests without a valid `Authorization: Bearer`
/// header. The expected key is injected via the [`ApiKey`] extension.
///
/// # Error responses
///
/// - `401 Unauthorized`: header missing or malformed
/// - `403 Forbidden`: key present but invalid
/// - `500 Internal Server Error`: [`ApiKey`] extension not found (misconfiguration)
pub async fn require_api_key(request: Request, next: Next) -> Response {
    let api_key = match request.extensions().get::<ApiKey>() {
        Some(key) => key.0.clone(),
        None => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Server configuration error", "code": "INTERNAL_ERROR"})),
            )
                .into_response();
        }
    };

    let auth_header = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok());

    let Some(provided) = auth_header.and_then(|h| h.strip_prefix("Bearer ")) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "Missing or invalid Authorization header",
                "code": "UNAUTHORIZED",
            })),
        )
            .into_response();
    };

    if !constant_time_eq(api_key.as_bytes(), provided.as_bytes()) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "Invalid API key", "code": "FORBIDDEN"})),
        )
            .into_response();
    }

    next.run(request).await
}

/// Constant-time byte comparison.
///
/// Always iterates over the full length of `expected` regardless of `provided`
/// length, so response times do not reveal the key length.
pub fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    let mut diff = u8::from(expected.len() != provided.len());
    for (i, e) in expected.iter().enumerate() {
        let p = provided.get(i).copied().unwrap_or(0xff);
        diff |= e ^ p;
    }
    diff == 0
}

/// Extension type carrying the expected API key, injected into the router
/// layer so [`require_api_key`] can access it without touching `AppState`.
#[derive(Clone)]
pub struct ApiKey(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret-and-more"));
        assert!(!constant_time_eq(b"secret", b"sec"));
        assert!(!constant_time_eq(b"secret", b""));
    }
}
