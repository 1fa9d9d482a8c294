//! SQLite-backed server and transit registries.
//!
//! Uniqueness (server name/ip, transit name), the `server_a_id <> server_b_id`
//! rule and foreign keys are enforced by the schema as well as by the
//! validation layer. Constraint failures surface as [`StoreError::Conflict`].

pub mod queries;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{ConnectionStatus, ServerRecord, TransitRecord, TransitStatus};
use crate::util::now_secs;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("{0}")]
    Conflict(String),
    #[error("Corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },
}

impl StoreError {
    /// Map constraint violations to [`StoreError::Conflict`].
    fn from_write(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db) = e {
            if db.is_unique_violation() {
                return Self::Conflict(format!("Duplicate value: {}", db.message()));
            }
            if db.is_foreign_key_violation() {
                return Self::Conflict("Record is referenced by another record".to_string());
            }
            if db.is_check_violation() {
                return Self::Conflict(format!("Constraint failed: {}", db.message()));
            }
        }
        Self::Database(e)
    }
}

/// Validated input for a new server. `ssh_password` is already encrypted.
#[derive(Debug, Clone)]
pub struct NewServer {
    pub name: String,
    pub ip_address: String,
    pub ssh_username: String,
    pub ssh_password: String,
    pub ssh_port: u16,
    pub connection_status: ConnectionStatus,
}

/// Validated input for a new transit.
#[derive(Debug, Clone)]
pub struct NewTransit {
    pub name: String,
    pub server_a_id: i64,
    pub server_a_listen_port: u16,
    pub server_b_id: i64,
    pub server_b_connect_port: u16,
    pub encryption_protocol: String,
    pub destination_ip: String,
    pub destination_port: u16,
}

/// Handle to the registry database. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect and run embedded migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // Every connection to `:memory:` is a separate database.
        let max_connections = if url.contains(":memory:") {
            1
        } else {
            max_connections.max(1)
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        info!("Running database migrations");
        sqlx::migrate!().run(&pool).await?;
        Ok(Self { pool })
    }

    /// Fresh, migrated in-memory database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:", 1).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // -----------------------------------------------------------------------
    // Servers
    // -----------------------------------------------------------------------

    pub async fn list_servers(&self) -> Result<Vec<ServerRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM servers ORDER BY name",
            queries::SERVER_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(parse_server_row).collect()
    }

    pub async fn get_server(&self, id: i64) -> Result<Option<ServerRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM servers WHERE id = ?",
            queries::SERVER_COLUMNS
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(parse_server_row).transpose()
    }

    pub async fn find_server_by_name(&self, name: &str) -> Result<Option<ServerRecord>, StoreError> {
        self.find_server_by("name", name).await
    }

    pub async fn find_server_by_ip(&self, ip: &str) -> Result<Option<ServerRecord>, StoreError> {
        self.find_server_by("ip_address", ip).await
    }

    async fn find_server_by(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<ServerRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM servers WHERE {column} = ?",
            queries::SERVER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(parse_server_row).transpose()
    }

    pub async fn insert_server(&self, server: &NewServer) -> Result<ServerRecord, StoreError> {
        let now = now_secs();
        let result = sqlx::query(queries::INSERT_SERVER)
            .bind(&server.name)
            .bind(&server.ip_address)
            .bind(&server.ssh_username)
            .bind(&server.ssh_password)
            .bind(i64::from(server.ssh_port))
            .bind(server.connection_status.as_str())
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_write)?;
        let id = result.last_insert_rowid();
        debug!("Inserted server {id} ('{}')", server.name);

        Ok(ServerRecord {
            id,
            name: server.name.clone(),
            ip_address: server.ip_address.clone(),
            ssh_username: server.ssh_username.clone(),
            ssh_password: server.ssh_password.clone(),
            ssh_port: server.ssh_port,
            connection_status: server.connection_status,
            created_at: now,
            updated_at: now,
        })
    }

    /// Returns `false` when no server has `id`.
    pub async fn set_server_status(
        &self,
        id: i64,
        status: ConnectionStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(queries::UPDATE_SERVER_STATUS)
            .bind(status.as_str())
            .bind(now_secs())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of transits using `id` as server A or B.
    pub async fn count_transits_for_server(&self, id: i64) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(queries::COUNT_TRANSITS_FOR_SERVER)
            .bind(id)
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Returns `false` when no server has `id`. Fails with
    /// [`StoreError::Conflict`] while transits still reference it.
    pub async fn delete_server(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(queries::DELETE_SERVER)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_write)?;
        Ok(result.rows_affected() > 0)
    }

    // -----------------------------------------------------------------------
    // Transits
    // -----------------------------------------------------------------------

    pub async fn list_transits(&self) -> Result<Vec<TransitRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM transits ORDER BY id",
            queries::TRANSIT_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().filter_map(|r| parse_transit_row(r).transpose()).collect()
    }

    /// Transits whose status is one of `statuses`, in id order.
    pub async fn list_transits_with_status(
        &self,
        statuses: &[TransitStatus],
    ) -> Result<Vec<TransitRecord>, StoreError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM transits WHERE status IN ({placeholders}) ORDER BY id",
            queries::TRANSIT_COLUMNS
        );
        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().filter_map(|r| parse_transit_row(r).transpose()).collect()
    }

    pub async fn get_transit(&self, id: i64) -> Result<Option<TransitRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM transits WHERE id = ?",
            queries::TRANSIT_COLUMNS
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(parse_transit_row).transpose()?.flatten())
    }

    pub async fn find_transit_by_name(
        &self,
        name: &str,
    ) -> Result<Option<TransitRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM transits WHERE name = ?",
            queries::TRANSIT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(parse_transit_row).transpose()?.flatten())
    }

    /// Insert a transit in the `pending` state.
    pub async fn insert_transit(&self, transit: &NewTransit) -> Result<TransitRecord, StoreError> {
        let now = now_secs();
        let status = TransitStatus::Pending;
        let result = sqlx::query(queries::INSERT_TRANSIT)
            .bind(&transit.name)
            .bind(transit.server_a_id)
            .bind(i64::from(transit.server_a_listen_port))
            .bind(transit.server_b_id)
            .bind(i64::from(transit.server_b_connect_port))
            .bind(&transit.encryption_protocol)
            .bind(&transit.destination_ip)
            .bind(i64::from(transit.destination_port))
            .bind(status.as_str())
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_write)?;
        let id = result.last_insert_rowid();
        debug!("Inserted transit {id} ('{}')", transit.name);

        Ok(TransitRecord {
            id,
            name: transit.name.clone(),
            server_a_id: transit.server_a_id,
            server_a_listen_port: transit.server_a_listen_port,
            server_b_id: transit.server_b_id,
            server_b_connect_port: transit.server_b_connect_port,
            encryption_protocol: transit.encryption_protocol.clone(),
            destination_ip: transit.destination_ip.clone(),
            destination_port: transit.destination_port,
            status,
            latency_ms: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Set `status` on every transit in `ids` in one transaction. Returns the
    /// number of rows changed.
    pub async fn set_transit_status(
        &self,
        ids: &[i64],
        status: TransitStatus,
    ) -> Result<u64, StoreError> {
        self.update_transit_status(ids, status, None).await
    }

    /// Like [`Store::set_transit_status`], but only rows currently in `from`
    /// change.
    pub async fn set_transit_status_if(
        &self,
        ids: &[i64],
        from: TransitStatus,
        to: TransitStatus,
    ) -> Result<u64, StoreError> {
        self.update_transit_status(ids, to, Some(from)).await
    }

    async fn update_transit_status(
        &self,
        ids: &[i64],
        to: TransitStatus,
        from: Option<TransitStatus>,
    ) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let now = now_secs();
        let mut tx = self.pool.begin().await?;
        let mut changed = 0;
        for &id in ids {
            let result = match from {
                Some(from) => {
                    sqlx::query(queries::UPDATE_TRANSIT_STATUS_IF)
                        .bind(to.as_str())
                        .bind(now)
                        .bind(id)
                        .bind(from.as_str())
                        .execute(&mut *tx)
                        .await?
                }
                None => {
                    sqlx::query(queries::UPDATE_TRANSIT_STATUS)
                        .bind(to.as_str())
                        .bind(now)
                        .bind(id)
                        .execute(&mut *tx)
                        .await?
                }
            };
            changed += result.rows_affected();
        }
        tx.commit().await?;
        Ok(changed)
    }

    /// Returns `false` when no transit has `id`.
    pub async fn delete_transit(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(queries::DELETE_TRANSIT)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn port(row: &SqliteRow, table: &'static str, column: &str) -> Result<u16, StoreError> {
    let value: i64 = row.try_get(column)?;
    u16::try_from(value).map_err(|_| StoreError::Corrupt {
        table,
        detail: format!("{column} = {value} is not a port"),
    })
}

fn parse_server_row(row: &SqliteRow) -> Result<ServerRecord, StoreError> {
    let status: String = row.try_get("connection_status")?;
    Ok(ServerRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        ip_address: row.try_get("ip_address")?,
        ssh_username: row.try_get("ssh_username")?,
        ssh_password: row.try_get("ssh_password")?,
        ssh_port: port(row, "servers", "ssh_port")?,
        // Rows from older consoles may carry free-form status text.
        connection_status: ConnectionStatus::from_str_opt(&status)
            .unwrap_or(ConnectionStatus::Pending),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// `None` for a row whose status this console does not know; it is left out
/// of listings and lookups instead of failing them.
fn parse_transit_row(row: &SqliteRow) -> Result<Option<TransitRecord>, StoreError> {
    let id: i64 = row.try_get("id")?;
    let raw_status: String = row.try_get("status")?;
    let Some(status) = TransitStatus::from_str_opt(&raw_status) else {
        warn!("Skipping transit {id}: unknown status '{raw_status}'");
        return Ok(None);
    };
    Ok(Some(TransitRecord {
        id,
        name: row.try_get("name")?,
        server_a_id: row.try_get("server_a_id")?,
        server_a_listen_port: port(row, "transits", "server_a_listen_port")?,
        server_b_id: row.try_get("server_b_id")?,
        server_b_connect_port: port(row, "transits", "server_b_connect_port")?,
        encryption_protocol: row.try_get("encryption_protocol")?,
        destination_ip: row.try_get("destination_ip")?,
        destination_port: port(row, "transits", "destination_port")?,
        status,
        latency_ms: row.try_get("latency_ms")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    }))
}
