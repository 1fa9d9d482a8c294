//! Dashboard snapshot: both registries with server names resolved.

use std::collections::BTreeMap;

use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::model::{server_map, TransitRecord};
use crate::AppState;

#[derive(Serialize)]
struct TransitView<'a> {
    #[serde(flatten)]
    transit: &'a TransitRecord,
    /// `None` when the server row is gone.
    server_a_name: Option<&'a str>,
    server_b_name: Option<&'a str>,
}

/// `GET /api/status`
pub async fn status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let servers = state.store.list_servers().await?;
    let transits = state.store.list_transits().await?;
    let by_id = server_map(servers.iter().cloned());

    let name_of = |id: i64| by_id.get(&id).map(|s| s.name.as_str());
    let views: Vec<TransitView<'_>> = transits
        .iter()
        .map(|t| TransitView {
            transit: t,
            server_a_name: name_of(t.server_a_id),
            server_b_name: name_of(t.server_b_id),
        })
        .collect();

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for t in &transits {
        *counts.entry(t.status.as_str()).or_default() += 1;
    }

    Ok(Json(json!({
        "servers": servers,
        "transits": views,
        "transit_counts": counts,
        "config_path": state.gateway.config_path().display().to_string(),
    })))
}
