//! Relay configuration endpoints.
//!
//! - `GET /api/config/preview`: the document apply would write, no side effects
//! - `POST /api/config/apply`: write the document, restart the relay, update statuses

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};

use crate::activity::{self, ActivityLevel, ActivityType};
use crate::error::ApiError;
use crate::AppState;

/// `GET /api/config/preview`
pub async fn preview(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let compiled = state.gateway.preview().await?;
    let warnings: Vec<String> = compiled.warnings.iter().map(ToString::to_string).collect();
    Ok(Json(json!({
        "config_path": state.gateway.config_path().display().to_string(),
        "document": compiled.document,
        "included": compiled.included,
        "warnings": compiled.warnings,
        "messages": warnings,
    })))
}

/// `POST /api/config/apply`
///
/// # Errors
///
/// - `500` with `{"code":"CONFIG_WRITE_FAILED"}`: the document could not be
///   written; the previous file is untouched and the relay was not restarted
/// - `502`/`504`: the document was written but the restart failed
///
/// Error bodies carry the full outcome next to `error` and `code`.
pub async fn apply(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let request_id = activity::request_id_from_headers(&headers);
    let mut outcome = state.gateway.apply().await?;
    let service_error = outcome.service_error.take();
    let body = json!(outcome);

    for warning in &outcome.warnings {
        state
            .activity_log
            .log(
                ActivityType::ConfigApply,
                ActivityLevel::Warning,
                format!("Warning: {warning}"),
                None,
                request_id.clone(),
            )
            .await;
    }

    if let Some(write_error) = &outcome.write_error {
        state
            .activity_log
            .log(
                ActivityType::ConfigApply,
                ActivityLevel::Error,
                format!("Error writing config file: {write_error}"),
                Some(json!({ "errored": outcome.errored })),
                request_id,
            )
            .await;
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "CONFIG_WRITE_FAILED",
            format!("Error writing config file: {write_error}"),
        )
        .with_extra(body));
    }

    if let Some(e) = service_error {
        state
            .activity_log
            .log(
                ActivityType::ConfigApply,
                ActivityLevel::Error,
                format!("Config written, but relay restart failed: {e}"),
                Some(json!({ "errored": outcome.errored })),
                request_id,
            )
            .await;
        return Err(ApiError::from(e).with_extra(body));
    }

    state
        .activity_log
        .log(
            ActivityType::ConfigApply,
            ActivityLevel::Success,
            format!(
                "GOST configuration applied: {} route(s) written to {}, service restarted.",
                outcome.routes, outcome.config_path
            ),
            Some(json!({
                "activated": outcome.activated,
                "errored": outcome.errored,
            })),
            request_id,
        )
        .await;
    Ok(Json(body))
}
