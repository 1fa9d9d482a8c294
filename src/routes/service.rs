//! Relay service control.
//!
//! - `GET /api/service/status`: `is-active`; an inactive unit is a normal answer
//! - `POST /api/service/{action}`: `start`, `stop` or `restart`

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};

use crate::activity::{self, ActivityLevel, ActivityType};
use crate::error::ApiError;
use crate::service::{ServiceAction, ServiceError};
use crate::AppState;

/// `GET /api/service/status`
pub async fn status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let unit = &state.config.service.name;
    match state.service.status().await {
        Ok(message) => Ok(Json(json!({
            "service": unit,
            "active": true,
            "status": message,
        }))),
        Err(ServiceError::Failed { message, .. }) => Ok(Json(json!({
            "service": unit,
            "active": false,
            "status": message,
        }))),
        Err(e) => Err(e.into()),
    }
}

/// `POST /api/service/{action}`
///
/// # Errors
///
/// - `400` unknown action (or `status`, which is `GET`)
/// - `502` the service manager reported failure or is missing
/// - `504` the command timed out
pub async fn control(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(action): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let action = match ServiceAction::from_str_opt(&action) {
        Some(a @ (ServiceAction::Start | ServiceAction::Stop | ServiceAction::Restart)) => a,
        _ => {
            return Err(ApiError::bad_request(format!(
                "Unknown service action '{action}' (expected start, stop or restart)"
            )))
        }
    };
    let request_id = activity::request_id_from_headers(&headers);

    match state.service.control(action).await {
        Ok(message) => {
            state
                .activity_log
                .log(
                    ActivityType::ServiceControl,
                    ActivityLevel::Success,
                    format!("Service {}: {message}", action.verb()),
                    None,
                    request_id,
                )
                .await;
            Ok(Json(json!({
                "service": state.config.service.name,
                "action": action,
                "message": message,
            })))
        }
        Err(e) => {
            state
                .activity_log
                .log(
                    ActivityType::ServiceControl,
                    ActivityLevel::Error,
                    e.to_string(),
                    Some(json!({ "code": e.code() })),
                    request_id,
                )
                .await;
            Err(e.into())
        }
    }
}
