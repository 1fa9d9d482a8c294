//! Operator journal endpoint.
//!
//! `GET /api/activity?since_id=N&limit=N&activity_type=config_apply&level=error`
//!: returns recent journal entries with optional filtering.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::activity::{ActivityLevel, ActivityType};
use crate::AppState;

/// Query parameters for `GET /api/activity`.
#[derive(Deserialize)]
pub struct ActivityQuery {
    /// Return entries with `id > since_id`. Defaults to 0 (all entries).
    #[serde(default)]
    pub since_id: u64,
    /// Maximum number of entries to return. Defaults to 50, max 200.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Filter by activity type (e.g. `server_add`, `config_apply`).
    pub activity_type: Option<String>,
    /// Filter by level (`success`, `info`, `warning`, `error`).
    pub level: Option<String>,
}

fn default_limit() -> usize {
    50
}

/// `GET /api/activity`: read recent journal entries with optional filters.
pub async fn get_activity(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
) -> Json<Value> {
    let limit = query.limit.min(200);
    let activity_type = query
        .activity_type
        .as_deref()
        .and_then(ActivityType::from_str_opt);
    let level = query.level.as_deref().and_then(ActivityLevel::from_str_opt);

    let entries = state
        .activity_log
        .read_since_filtered(query.since_id, limit, activity_type, level)
        .await;
    Json(json!({ "entries": entries }))
}
