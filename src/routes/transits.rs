//! Transit registry endpoints.
//!
//! - `GET /api/transits`: list, by id
//! - `POST /api/transits`: add as `pending`
//! - `GET /api/transits/{id}`: one transit
//! - `DELETE /api/transits/{id}`: delete
//!
//! New and deleted transits only reach the relay on the next apply.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};

use crate::activity::{self, ActivityLevel, ActivityType};
use crate::error::ApiError;
use crate::registry::{self, AddTransitRequest};
use crate::AppState;

pub async fn list_transits(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let transits = state.store.list_transits().await?;
    Ok(Json(json!({ "transits": transits })))
}

pub async fn get_transit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let transit = state
        .store
        .get_transit(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Transit {id} not found")))?;
    Ok(Json(json!({ "transit": transit })))
}

/// `POST /api/transits`
///
/// # Errors
///
/// - `400` missing fields, bad port, unknown protocol, same or unknown server
/// - `409` name already taken
pub async fn create_transit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AddTransitRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let transit = registry::add_transit(&state.store, &payload).await?;
    state
        .activity_log
        .log(
            ActivityType::TransitAdd,
            ActivityLevel::Success,
            format!(
                "Transit '{}' added successfully! Status is 'pending'. Apply config to activate.",
                transit.name
            ),
            Some(json!({ "transit_id": transit.id })),
            activity::request_id_from_headers(&headers),
        )
        .await;
    Ok((StatusCode::CREATED, Json(json!({ "transit": transit }))))
}

pub async fn delete_transit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    registry::delete_transit(&state.store, id).await?;
    state
        .activity_log
        .log(
            ActivityType::TransitDelete,
            ActivityLevel::Info,
            format!("Transit {id} deleted. Apply config to remove it from the relay."),
            Some(json!({ "transit_id": id })),
            activity::request_id_from_headers(&headers),
        )
        .await;
    Ok(Json(json!({ "deleted": id })))
}
