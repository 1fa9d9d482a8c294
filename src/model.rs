//! Persisted record types shared by the registries, the compiler and the API.
//!
//! Relationships are plain foreign-key ids. Callers that need to resolve a
//! transit's servers build a [`ServerMap`] from a registry snapshot.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Default SSH port for new servers.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Reachability state of a relay server as last observed by a probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Pending,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }

    /// Parse a stored value. Case-insensitive; unknown values map to `None`.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "connected" => Some(Self::Connected),
            "disconnected" => Some(Self::Disconnected),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Lifecycle state of a transit. Only the apply gateway moves a transit out
/// of `Pending`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransitStatus {
    Pending,
    Active,
    Inactive,
    Error,
}

impl TransitStatus {
    /// Statuses picked up by an apply run. `Inactive` transits are left out of
    /// the generated document.
    pub const CONFIGURABLE: [TransitStatus; 3] = [Self::Pending, Self::Active, Self::Error];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Error => "error",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Transport used between server A and its next hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
    Ws,
    Wss,
    RelayTls,
}

impl Protocol {
    pub const ALL: [Protocol; 5] = [
        Self::Tcp,
        Self::Udp,
        Self::Ws,
        Self::Wss,
        Self::RelayTls,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Ws => "ws",
            Self::Wss => "wss",
            Self::RelayTls => "relay+tls",
        }
    }

    /// Parse a protocol name, ignoring case. Whitespace is not stripped.
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.to_ascii_lowercase();
        Self::ALL.into_iter().find(|p| p.as_str() == lower)
    }

    /// Scheme of the chain node pointing at server B, or `None` for
    /// direct-forward protocols.
    pub fn chain_scheme(self) -> Option<&'static str> {
        match self {
            Self::Tcp | Self::Udp => None,
            Self::Ws => Some("relay+ws"),
            Self::Wss => Some("relay+wss"),
            Self::RelayTls => Some("relay+tls"),
        }
    }
}

/// A relay host with (encrypted) SSH credentials.
#[derive(Debug, Clone, Serialize)]
pub struct ServerRecord {
    pub id: i64,
    pub name: String,
    pub ip_address: String,
    pub ssh_username: String,
    /// Cipher text produced by [`crate::cipher::encrypt`]. Never serialized.
    #[serde(skip_serializing)]
    pub ssh_password: String,
    pub ssh_port: u16,
    pub connection_status: ConnectionStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A tunnel definition: listen on server A, reach the destination either
/// directly or through server B.
#[derive(Debug, Clone, Serialize)]
pub struct TransitRecord {
    pub id: i64,
    pub name: String,
    pub server_a_id: i64,
    pub server_a_listen_port: u16,
    pub server_b_id: i64,
    pub server_b_connect_port: u16,
    /// Stored verbatim; rows written before validation existed may hold
    /// values [`Protocol::parse`] rejects.
    pub encryption_protocol: String,
    pub destination_ip: String,
    pub destination_port: u16,
    pub status: TransitStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Lookup table from server id to record, built per query.
pub type ServerMap = HashMap<i64, ServerRecord>;

/// Index a server list by id.
pub fn server_map(servers: impl IntoIterator<Item = ServerRecord>) -> ServerMap {
    servers.into_iter().map(|s| (s.id, s)).collect()
}
