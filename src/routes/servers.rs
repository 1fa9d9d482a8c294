//! Server registry endpoints.
//!
//! - `GET /api/servers`: list, ordered by name
//! - `POST /api/servers`: add (validated, de-duplicated, probed, encrypted)
//! - `GET /api/servers/{id}`: one server
//! - `DELETE /api/servers/{id}`: delete an unreferenced server
//! - `POST /api/servers/{id}/probe`: re-check reachability with stored credentials
//!
//! Passwords never leave the server: [`crate::model::ServerRecord`] skips the
//! field when serializing.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};

use crate::activity::{self, ActivityLevel, ActivityType};
use crate::error::ApiError;
use crate::registry::{self, AddServerRequest, RegistryError};
use crate::AppState;

/// `GET /api/servers`
pub async fn list_servers(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let servers = state.store.list_servers().await?;
    Ok(Json(json!({ "servers": servers })))
}

/// `GET /api/servers/{id}`
pub async fn get_server(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let server = state
        .store
        .get_server(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Server {id} not found")))?;
    Ok(Json(json!({ "server": server })))
}

/// `POST /api/servers`: add a server after a successful SSH check.
///
/// # Errors
///
/// - `400` missing fields or bad port
/// - `409` name or IP already registered
/// - `422` SSH check failed; `code` carries the failure class
pub async fn create_server(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AddServerRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let request_id = activity::request_id_from_headers(&headers);
    match registry::add_server(
        &state.store,
        state.prober.as_ref(),
        &state.credential_key,
        &payload,
    )
    .await
    {
        Ok(server) => {
            state
                .activity_log
                .log(
                    ActivityType::ServerAdd,
                    ActivityLevel::Success,
                    format!(
                        "Server '{}' ({}) added successfully and connection verified!",
                        server.name, server.ip_address
                    ),
                    Some(json!({ "server_id": server.id })),
                    request_id,
                )
                .await;
            Ok((StatusCode::CREATED, Json(json!({ "server": server }))))
        }
        Err(e) => {
            if let RegistryError::Unreachable { source, .. } = &e {
                state
                    .activity_log
                    .log(
                        ActivityType::ServerAdd,
                        ActivityLevel::Error,
                        e.to_string(),
                        Some(json!({
                            "ip_address": payload.ip_address,
                            "code": source.code(),
                        })),
                        request_id,
                    )
                    .await;
            }
            Err(e.into())
        }
    }
}

/// `DELETE /api/servers/{id}`
///
/// # Errors
///
/// - `404` unknown id
/// - `409` still referenced by a transit
pub async fn delete_server(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let server = registry::delete_server(&state.store, id).await?;
    state
        .activity_log
        .log(
            ActivityType::ServerDelete,
            ActivityLevel::Success,
            format!("Server '{}' deleted.", server.name),
            Some(json!({ "server_id": id })),
            activity::request_id_from_headers(&headers),
        )
        .await;
    Ok(Json(json!({ "deleted": id })))
}

/// `POST /api/servers/{id}/probe`: re-run the SSH check.
///
/// A failed check is still a successful request: the response carries the
/// new `connection_status` with `reachable: false` and the failure class.
pub async fn probe_server(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let (server, failure) = registry::recheck_server(
        &state.store,
        state.prober.as_ref(),
        &state.credential_key,
        id,
    )
    .await?;

    let (level, summary) = match &failure {
        None => (
            ActivityLevel::Success,
            format!("Server '{}' is reachable.", server.name),
        ),
        Some(e) => (
            ActivityLevel::Warning,
            format!("Server '{}' check failed: {e}", server.name),
        ),
    };
    state
        .activity_log
        .log(
            ActivityType::ServerProbe,
            level,
            summary,
            Some(json!({
                "server_id": id,
                "connection_status": server.connection_status,
            })),
            activity::request_id_from_headers(&headers),
        )
        .await;

    let mut body = json!({
        "server": server,
        "reachable": failure.is_none(),
    });
    if let Some(e) = failure {
        body["error"] = json!(e.to_string());
        body["code"] = json!(e.code());
    }
    Ok(Json(body))
}
