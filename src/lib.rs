#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::unused_async)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! transitctl library: the building blocks behind the `transitctl` binary.
//!
//! - `model`: server and transit records, status and protocol enums
//! - `compiler`: transits + servers → GOST JSON document
//! - `store`: SQLite registries (sqlx, embedded migrations)
//! - `registry`: validation and add/recheck/delete flows
//! - `probe`: SSH reachability check (russh)
//! - `cipher`: credential encryption at rest
//! - `service`: relay service control through systemctl
//! - `apply`: write, restart and status bookkeeping under one lock
//! - `routes`: REST API route handlers
//! - `activity`: in-memory operator journal

pub mod activity;
pub mod apply;
pub mod auth;
pub mod cipher;
pub mod compiler;
pub mod config;
pub mod error;
pub mod model;
pub mod probe;
pub mod process;
pub mod registry;
pub mod routes;
pub mod service;
pub mod state;
pub mod store;
pub mod util;

// Re-export key types at crate root for convenience.
pub use activity::ActivityLog;
pub use auth::ApiKey;
pub use config::Config;
pub use routes::router;
pub use state::AppState;
pub use store::Store;
