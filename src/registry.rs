//! Server and transit registry operations: validation, reachability gate,
//! credential sealing, persistence.
//!
//! Every check runs before anything is written, so a rejected request leaves
//! the registries untouched.

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::cipher::{self, CipherError, CredentialKey};
use crate::model::{ConnectionStatus, Protocol, ServerRecord, TransitRecord, DEFAULT_SSH_PORT};
use crate::probe::{ProbeError, Prober};
use crate::store::{NewServer, NewTransit, Store, StoreError};

#[derive(Error, Debug)]
pub enum RegistryError {
    /// Bad or missing input.
    #[error("{0}")]
    Validation(String),
    /// A unique field collides with an existing record.
    #[error("{0}")]
    Duplicate(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Server '{name}' is still used by {count} transit(s)")]
    InUse { name: String, count: i64 },
    #[error("Could not connect to server '{name}': {source}")]
    Unreachable { name: String, source: ProbeError },
    #[error("Stored credentials could not be read: {0}")]
    Credential(#[from] CipherError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Request body for adding a server.
#[derive(Debug, Clone, Deserialize)]
pub struct AddServerRequest {
    pub name: Option<String>,
    pub ip_address: Option<String>,
    pub ssh_username: Option<String>,
    pub ssh_password: Option<String>,
    /// Defaults to 22.
    pub ssh_port: Option<i64>,
}

/// Request body for adding a transit.
#[derive(Debug, Clone, Deserialize)]
pub struct AddTransitRequest {
    pub name: Option<String>,
    pub server_a_id: Option<i64>,
    pub server_a_listen_port: Option<i64>,
    pub server_b_id: Option<i64>,
    pub server_b_connect_port: Option<i64>,
    pub encryption_protocol: Option<String>,
    pub destination_ip: Option<String>,
    pub destination_port: Option<i64>,
}

fn required<'a>(value: Option<&'a String>) -> Option<&'a str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

fn port(label: &str, value: i64) -> Result<u16, RegistryError> {
    u16::try_from(value)
        .ok()
        .filter(|p| *p >= 1)
        .ok_or_else(|| RegistryError::Validation(format!("{label} must be between 1 and 65535.")))
}

/// Validate, de-duplicate and probe a new server, then store it with its
/// password encrypted under `key`. Nothing is stored if the probe fails.
pub async fn add_server(
    store: &Store,
    prober: &dyn Prober,
    key: &CredentialKey,
    req: &AddServerRequest,
) -> Result<ServerRecord, RegistryError> {
    let (Some(name), Some(ip), Some(username), Some(password)) = (
        required(req.name.as_ref()),
        required(req.ip_address.as_ref()),
        required(req.ssh_username.as_ref()),
        // Passwords are taken verbatim; only emptiness is rejected.
        req.ssh_password.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(RegistryError::Validation(
            "All fields (Server Name, IP, Username, Password) are required!".to_string(),
        ));
    };
    let ssh_port = port(
        "SSH Port",
        req.ssh_port.unwrap_or(i64::from(DEFAULT_SSH_PORT)),
    )?;

    if store.find_server_by_name(name).await?.is_some() {
        return Err(RegistryError::Duplicate(format!(
            "Server name '{name}' already exists."
        )));
    }
    if let Some(existing) = store.find_server_by_ip(ip).await? {
        return Err(RegistryError::Duplicate(format!(
            "IP address '{ip}' already exists for server '{}'.",
            existing.name
        )));
    }

    prober
        .probe(ip, ssh_port, username, password)
        .await
        .map_err(|source| RegistryError::Unreachable {
            name: name.to_string(),
            source,
        })?;

    let sealed = cipher::encrypt(password, key)?;
    let server = store
        .insert_server(&NewServer {
            name: name.to_string(),
            ip_address: ip.to_string(),
            ssh_username: username.to_string(),
            ssh_password: sealed,
            ssh_port,
            connection_status: ConnectionStatus::Connected,
        })
        .await
        .map_err(duplicate_or_store)?;
    info!("Server '{}' ({}) added, connection verified", server.name, server.ip_address);
    Ok(server)
}

/// Probe a stored server again and record the result in `connection_status`.
///
/// Returns the updated record and the probe error, if any. Network failures
/// and timeouts mark the server `disconnected`; anything else `error`.
pub async fn recheck_server(
    store: &Store,
    prober: &dyn Prober,
    key: &CredentialKey,
    id: i64,
) -> Result<(ServerRecord, Option<ProbeError>), RegistryError> {
    let mut server = store
        .get_server(id)
        .await?
        .ok_or_else(|| RegistryError::NotFound(format!("Server {id} not found")))?;

    let password = match cipher::decrypt(&server.ssh_password, key) {
        Ok(p) => p,
        Err(e) => {
            warn!("Server '{}': stored password unreadable: {e}", server.name);
            store.set_server_status(id, ConnectionStatus::Error).await?;
            return Err(e.into());
        }
    };

    let result = prober
        .probe(&server.ip_address, server.ssh_port, &server.ssh_username, &password)
        .await;
    let status = match &result {
        Ok(()) => ConnectionStatus::Connected,
        Err(ProbeError::Network(_) | ProbeError::Timeout { .. }) => ConnectionStatus::Disconnected,
        Err(_) => ConnectionStatus::Error,
    };
    store.set_server_status(id, status).await?;
    server.connection_status = status;
    info!("Server '{}' rechecked: {}", server.name, status.as_str());

    Ok((server, result.err()))
}

/// Delete a server that no transit references.
pub async fn delete_server(store: &Store, id: i64) -> Result<ServerRecord, RegistryError> {
    let server = store
        .get_server(id)
        .await?
        .ok_or_else(|| RegistryError::NotFound(format!("Server {id} not found")))?;
    let count = store.count_transits_for_server(id).await?;
    if count > 0 {
        return Err(RegistryError::InUse {
            name: server.name,
            count,
        });
    }
    store.delete_server(id).await.map_err(duplicate_or_store)?;
    info!("Server '{}' deleted", server.name);
    Ok(server)
}

/// Validate and store a transit in the `pending` state.
pub async fn add_transit(
    store: &Store,
    req: &AddTransitRequest,
) -> Result<TransitRecord, RegistryError> {
    let (
        Some(name),
        Some(server_a_id),
        Some(listen_port),
        Some(server_b_id),
        Some(connect_port),
        Some(protocol),
        Some(destination_ip),
        Some(destination_port),
    ) = (
        required(req.name.as_ref()),
        req.server_a_id,
        req.server_a_listen_port,
        req.server_b_id,
        req.server_b_connect_port,
        required(req.encryption_protocol.as_ref()),
        required(req.destination_ip.as_ref()),
        req.destination_port,
    )
    else {
        return Err(RegistryError::Validation("All fields are required!".to_string()));
    };

    if server_a_id == server_b_id {
        return Err(RegistryError::Validation(
            "Server A and Server B cannot be the same server.".to_string(),
        ));
    }

    let server_a_listen_port = port("Server A Listen Port", listen_port)?;
    let server_b_connect_port = port("Server B Connect Port", connect_port)?;
    let destination_port = port("Destination Port", destination_port)?;

    let Some(protocol) = Protocol::parse(protocol) else {
        let supported: Vec<_> = Protocol::ALL.iter().map(|p| p.as_str()).collect();
        return Err(RegistryError::Validation(format!(
            "Unsupported protocol '{protocol}' (expected one of: {}).",
            supported.join(", ")
        )));
    };

    for (label, id) in [("Server A", server_a_id), ("Server B", server_b_id)] {
        if store.get_server(id).await?.is_none() {
            return Err(RegistryError::Validation(format!(
                "Selected {label} (ID: {id}) does not exist."
            )));
        }
    }

    if store.find_transit_by_name(name).await?.is_some() {
        return Err(RegistryError::Duplicate(format!(
            "Transit name '{name}' already exists."
        )));
    }

    let transit = store
        .insert_transit(&NewTransit {
            name: name.to_string(),
            server_a_id,
            server_a_listen_port,
            server_b_id,
            server_b_connect_port,
            encryption_protocol: protocol.as_str().to_string(),
            destination_ip: destination_ip.to_string(),
            destination_port,
        })
        .await
        .map_err(duplicate_or_store)?;
    info!("Transit '{}' added with status 'pending'", transit.name);
    Ok(transit)
}

pub async fn delete_transit(store: &Store, id: i64) -> Result<(), RegistryError> {
    if store.delete_transit(id).await? {
        info!("Transit {id} deleted");
        Ok(())
    } else {
        Err(RegistryError::NotFound(format!("Transit {id} not found")))
    }
}

/// A constraint that fires after the pre-checks passed means another request
/// got there first.
fn duplicate_or_store(e: StoreError) -> RegistryError {
    match e {
        StoreError::Conflict(msg) => RegistryError::Duplicate(msg),
        other => RegistryError::Store(other),
    }
}
