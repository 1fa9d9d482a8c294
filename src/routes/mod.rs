//! HTTP route handlers.
//!
//! Each sub-module corresponds to an API endpoint group. All handlers except
//! [`health`] require authentication via the [`crate::auth::require_api_key`]
//! middleware.

pub mod activity;
pub mod config;
pub mod health;
pub mod servers;
pub mod service;
pub mod status;
pub mod transits;

use axum::{
    middleware,
    routing::{get, post},
    Extension, Router,
};
use tower_http::trace::TraceLayer;

use crate::auth::{self, ApiKey};
use crate::AppState;

/// Build the full API router around `state`.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new().route("/api/health", get(health::health));

    let authed_routes = Router::new()
        .route(
            "/api/servers",
            get(servers::list_servers).post(servers::create_server),
        )
        .route(
            "/api/servers/{id}",
            get(servers::get_server).delete(servers::delete_server),
        )
        .route("/api/servers/{id}/probe", post(servers::probe_server))
        .route(
            "/api/transits",
            get(transits::list_transits).post(transits::create_transit),
        )
        .route(
            "/api/transits/{id}",
            get(transits::get_transit).delete(transits::delete_transit),
        )
        .route("/api/config/preview", get(config::preview))
        .route("/api/config/apply", post(config::apply))
        .route("/api/service/status", get(service::status))
        .route("/api/service/{action}", post(service::control))
        .route("/api/status", get(status::status))
        .route("/api/activity", get(activity::get_activity))
        .layer(middleware::from_fn(auth::require_api_key));

    Router::new()
        .merge(public_routes)
        .merge(authed_routes)
        .layer(Extension(ApiKey(state.config.auth.api_key.clone())))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
