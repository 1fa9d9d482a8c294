//! In-memory operator journal.
//!
//! Records what operators did and how it went (server added, probe failed,
//! config applied, service restarted...) in a fixed-size ring buffer that the
//! console reads back through `GET /api/activity`.
//!
//! ## Design
//!
//! - **Ring buffer**: `VecDeque<ActivityEntry>` capped at `max_entries` (default 200).
//!   Old entries are silently dropped when the buffer is full.
//! - **Monotonic IDs**: Each entry gets a unique, always-increasing `id` so clients
//!   can request "everything since ID N" without gaps.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

/// Default journal capacity.
pub const DEFAULT_MAX_ENTRIES: usize = 200;

/// Types of activities tracked by the journal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    ServerAdd,
    ServerProbe,
    ServerDelete,
    TransitAdd,
    TransitDelete,
    ConfigApply,
    ServiceControl,
}

/// Outcome category, shown to the operator the way a flash message would be.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// A single activity journal entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: u64,
    pub timestamp: u64,
    pub activity_type: ActivityType,
    pub level: ActivityLevel,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ActivityType {
    /// Parse from the serde rename value (e.g. `"server_add"`, `"config_apply"`).
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "server_add" => Some(Self::ServerAdd),
            "server_probe" => Some(Self::ServerProbe),
            "server_delete" => Some(Self::ServerDelete),
            "transit_add" => Some(Self::TransitAdd),
            "transit_delete" => Some(Self::TransitDelete),
            "config_apply" => Some(Self::ConfigApply),
            "service_control" => Some(Self::ServiceControl),
            _ => None,
        }
    }
}

impl ActivityLevel {
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// In-memory ring buffer of activity entries.
pub struct ActivityLog {
    entries: RwLock<VecDeque<ActivityEntry>>,
    next_id: AtomicU64,
    max_entries: usize,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl ActivityLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(max_entries)),
            next_id: AtomicU64::new(1),
            max_entries,
        }
    }

    /// Append an entry and return the assigned ID.
    pub async fn log(
        &self,
        activity_type: ActivityType,
        level: ActivityLevel,
        summary: String,
        detail: Option<Value>,
        request_id: Option<String>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        #[allow(clippy::cast_possible_truncation)]
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let entry = ActivityEntry {
            id,
            timestamp,
            activity_type,
            level,
            summary: truncate_str(&summary, 300),
            detail,
            request_id,
        };

        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(entry);

        id
    }

    /// Read entries with `id > since_id`, up to `limit`.
    pub async fn read_since(&self, since_id: u64, limit: usize) -> Vec<ActivityEntry> {
        self.read_since_filtered(since_id, limit, None, None).await
    }

    /// Read entries with optional filters (AND logic).
    pub async fn read_since_filtered(
        &self,
        since_id: u64,
        limit: usize,
        activity_type: Option<ActivityType>,
        level: Option<ActivityLevel>,
    ) -> Vec<ActivityEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| e.id > since_id)
            .filter(|e| activity_type.map_or(true, |t| e.activity_type == t))
            .filter(|e| level.map_or(true, |l| e.level == l))
            .take(limit)
            .cloned()
            .collect()
    }
}

/// Extract `X-Request-Id` header value for correlation.
pub fn request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

/// Truncate a string to `max` chars, appending "..." if truncated.
///
/// Collapses newlines and extra whitespace into single spaces for clean display.
pub fn truncate_str(s: &str, max: usize) -> String {
    let cleaned: String = s.split_whitespace().collect::<Vec<_>>().join(" ");
    let char_count = cleaned.chars().count();
    if char_count <= max {
        cleaned
    } else {
        let mut result = cleaned
            .chars()
            .take(max.saturating_sub(3))
            .collect::<String>();
        result.push_str("...");
        result
    }
}
