//! Apply gateway: compile the registries, publish the GOST document, restart
//! the relay and record per-transit status.
//!
//! Only one apply runs at a time. The document is written to `<path>.tmp` and
//! renamed into place; a failed write leaves the previous document intact.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::compiler::{self, CompileOptions, CompileWarning, Compiled};
use crate::model::{server_map, TransitStatus};
use crate::service::{ServiceError, ServiceManager};
use crate::store::{Store, StoreError};

/// Where and how the document is published.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub config_path: PathBuf,
    pub debug: bool,
}

/// Result of one apply run.
#[derive(Debug, Serialize)]
pub struct ApplyOutcome {
    pub config_path: String,
    pub routes: usize,
    pub written: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_error: Option<String>,
    pub restarted: bool,
    /// Service manager output on success, or its failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_message: Option<String>,
    pub activated: Vec<i64>,
    pub errored: Vec<i64>,
    pub warnings: Vec<CompileWarning>,
    #[serde(skip)]
    pub service_error: Option<ServiceError>,
}

impl ApplyOutcome {
    pub fn succeeded(&self) -> bool {
        self.written && self.restarted
    }
}

/// Serializes compile, write and restart against the shared registries.
pub struct ApplyGateway {
    store: Store,
    service: Arc<dyn ServiceManager>,
    options: ApplyOptions,
    lock: Mutex<()>,
}

impl ApplyGateway {
    pub fn new(store: Store, service: Arc<dyn ServiceManager>, options: ApplyOptions) -> Self {
        Self {
            store,
            service,
            options,
            lock: Mutex::new(()),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.options.config_path
    }

    /// Compile what apply would publish, without touching disk, service or
    /// statuses.
    pub async fn preview(&self) -> Result<Compiled, StoreError> {
        let (_, compiled) = self.load_and_compile().await?;
        Ok(compiled)
    }

    /// Run the full apply sequence.
    ///
    /// Only registry failures are returned as `Err`. Write and restart
    /// failures are reported in the outcome after statuses are updated:
    ///
    /// - restart ok: included transits `active`, skipped transits `error`
    /// - restart failed: every loaded transit `error`
    /// - write failed: no restart, `pending` and skipped transits `error`
    pub async fn apply(&self) -> Result<ApplyOutcome, StoreError> {
        let _guard = self.lock.lock().await;

        let (loaded, compiled) = self.load_and_compile().await?;
        let Compiled {
            document,
            included,
            warnings,
        } = compiled;
        let skipped: Vec<i64> = warnings.iter().map(|w| w.transit_id).collect();
        let path = &self.options.config_path;

        let mut outcome = ApplyOutcome {
            config_path: path.display().to_string(),
            routes: document.routes.len(),
            written: false,
            write_error: None,
            restarted: false,
            service_message: None,
            activated: Vec::new(),
            errored: Vec::new(),
            warnings,
            service_error: None,
        };

        let written = match document.to_json_pretty() {
            Ok(json) => write_atomic(path, json.as_bytes()).await,
            Err(e) => Err(std::io::Error::other(e)),
        };

        if let Err(e) = written {
            error!("Failed to write relay config {}: {e}", path.display());
            outcome.write_error = Some(e.to_string());
            let pending: Vec<i64> = loaded
                .iter()
                .filter(|(_, status)| *status == TransitStatus::Pending)
                .map(|(id, _)| *id)
                .collect();
            self.store
                .set_transit_status_if(&pending, TransitStatus::Pending, TransitStatus::Error)
                .await?;
            self.store
                .set_transit_status(&skipped, TransitStatus::Error)
                .await?;
            outcome.errored = pending;
            for id in skipped {
                if !outcome.errored.contains(&id) {
                    outcome.errored.push(id);
                }
            }
            return Ok(outcome);
        }
        outcome.written = true;
        info!(
            "Relay config written to {} ({} routes)",
            path.display(),
            outcome.routes
        );

        match self.service.restart().await {
            Ok(message) => {
                info!("Relay service restarted: {message}");
                outcome.restarted = true;
                outcome.service_message = Some(message);
                self.store
                    .set_transit_status(&included, TransitStatus::Active)
                    .await?;
                self.store
                    .set_transit_status(&skipped, TransitStatus::Error)
                    .await?;
                outcome.activated = included;
                outcome.errored = skipped;
            }
            Err(e) => {
                warn!("Relay service restart failed: {e}");
                let all: Vec<i64> = loaded.iter().map(|(id, _)| *id).collect();
                self.store
                    .set_transit_status(&all, TransitStatus::Error)
                    .await?;
                outcome.service_message = Some(e.to_string());
                outcome.service_error = Some(e);
                outcome.errored = all;
            }
        }

        Ok(outcome)
    }

    /// Ids and statuses of the transits that took part, plus the compile result.
    async fn load_and_compile(
        &self,
    ) -> Result<(Vec<(i64, TransitStatus)>, Compiled), StoreError> {
        let transits = self
            .store
            .list_transits_with_status(&TransitStatus::CONFIGURABLE)
            .await?;
        let servers = server_map(self.store.list_servers().await?);
        let compiled = compiler::compile(
            &transits,
            &servers,
            CompileOptions {
                debug: self.options.debug,
            },
        );
        let loaded = transits.iter().map(|t| (t.id, t.status)).collect();
        Ok((loaded, compiled))
    }
}

/// Write `contents` to `<path>.tmp`, then rename over `path`. The temp file is
/// removed if any step fails.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    if let Err(e) = tokio::fs::write(&tmp, contents).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::compiler::ConfigDocument;
    use crate::model::ConnectionStatus;
    use crate::service::ServiceAction;
    use crate::store::{NewServer, NewTransit};

    #[derive(Default)]
    struct FakeService {
        restarts: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl ServiceManager for FakeService {
        async fn control(&self, action: ServiceAction) -> Result<String, ServiceError> {
            assert_eq!(action, ServiceAction::Restart);
            self.restarts.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(ServiceError::Failed {
                    action: "restart",
                    unit: "gost.service".into(),
                    exit_code: 1,
                    message: "Job for gost.service failed".into(),
                })
            } else {
                Ok("restart gost.service successful.".into())
            }
        }
    }

    async fn seeded_store() -> (Store, Vec<i64>) {
        let store = Store::in_memory().await.unwrap();
        let mut server_ids = Vec::new();
        for (name, ip) in [("a", "1.1.1.1"), ("b", "2.2.2.2")] {
            let s = store
                .insert_server(&NewServer {
                    name: name.into(),
                    ip_address: ip.into(),
                    ssh_username: "root".into(),
                    ssh_password: "sealed".into(),
                    ssh_port: 22,
                    connection_status: ConnectionStatus::Connected,
                })
                .await
                .unwrap();
            server_ids.push(s.id);
        }
        let mut transit_ids = Vec::new();
        for (name, proto) in [("direct", "tcp"), ("chained", "wss"), ("legacy", "ssh")] {
            let t = store
                .insert_transit(&NewTransit {
                    name: name.into(),
                    server_a_id: server_ids[0],
                    server_a_listen_port: 8080,
                    server_b_id: server_ids[1],
                    server_b_connect_port: 9090,
                    encryption_protocol: proto.into(),
                    destination_ip: "10.0.0.1".into(),
                    destination_port: 80,
                })
                .await
                .unwrap();
            transit_ids.push(t.id);
        }
        (store, transit_ids)
    }

    fn gateway(store: &Store, service: Arc<FakeService>, path: PathBuf) -> ApplyGateway {
        ApplyGateway::new(
            store.clone(),
            service,
            ApplyOptions {
                config_path: path,
                debug: true,
            },
        )
    }

    async fn status_of(store: &Store, id: i64) -> TransitStatus {
        store.get_transit(id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_apply_success_writes_and_activates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gost").join("config.json");
        let (store, ids) = seeded_store().await;
        let service = Arc::new(FakeService::default());

        let outcome = gateway(&store, service.clone(), path.clone())
            .apply()
            .await
            .unwrap();
        assert!(outcome.succeeded());
        assert_eq!(outcome.routes, 2);
        assert_eq!(outcome.activated, vec![ids[0], ids[1]]);
        assert_eq!(outcome.errored, vec![ids[2]]);
        assert_eq!(service.restarts.load(Ordering::SeqCst), 1);

        let doc: ConfigDocument =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc.routes.len(), 2);
        assert!(!dir.path().join("gost").join("config.json.tmp").exists());

        assert_eq!(status_of(&store, ids[0]).await, TransitStatus::Active);
        assert_eq!(status_of(&store, ids[1]).await, TransitStatus::Active);
        assert_eq!(status_of(&store, ids[2]).await, TransitStatus::Error);
    }

    #[tokio::test]
    async fn test_restart_failure_marks_all_error_and_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let (store, ids) = seeded_store().await;
        let service = Arc::new(FakeService::default());
        service.fail.store(true, Ordering::SeqCst);

        let outcome = gateway(&store, service, path.clone()).apply().await.unwrap();
        assert!(outcome.written);
        assert!(!outcome.restarted);
        assert!(outcome.service_error.is_some());
        assert_eq!(outcome.errored, ids);
        assert!(path.exists());
        for id in ids {
            assert_eq!(status_of(&store, id).await, TransitStatus::Error);
        }
    }

    #[tokio::test]
    async fn test_write_failure_skips_restart_and_cleans_temp() {
        let dir = tempfile::tempdir().unwrap();
        // Renaming a file over a directory fails.
        let path = dir.path().join("occupied");
        std::fs::create_dir(&path).unwrap();
        let (store, ids) = seeded_store().await;
        store
            .set_transit_status(&[ids[1]], TransitStatus::Active)
            .await
            .unwrap();
        let service = Arc::new(FakeService::default());

        let outcome = gateway(&store, service.clone(), path.clone())
            .apply()
            .await
            .unwrap();
        assert!(!outcome.written);
        assert!(outcome.write_error.is_some());
        assert_eq!(service.restarts.load(Ordering::SeqCst), 0);
        assert!(path.is_dir());
        assert!(!dir.path().join("occupied.tmp").exists());

        assert_eq!(status_of(&store, ids[0]).await, TransitStatus::Error);
        assert_eq!(status_of(&store, ids[1]).await, TransitStatus::Active);
        assert_eq!(status_of(&store, ids[2]).await, TransitStatus::Error);
        assert_eq!(outcome.errored, vec![ids[0], ids[2]]);
    }

    #[tokio::test]
    async fn test_preview_has_no_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let (store, ids) = seeded_store().await;
        let service = Arc::new(FakeService::default());

        let compiled = gateway(&store, service.clone(), path.clone())
            .preview()
            .await
            .unwrap();
        assert_eq!(compiled.included, vec![ids[0], ids[1]]);
        assert_eq!(compiled.warnings.len(), 1);
        assert!(!path.exists());
        assert_eq!(service.restarts.load(Ordering::SeqCst), 0);
        assert_eq!(status_of(&store, ids[0]).await, TransitStatus::Pending);
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "old").unwrap();
        write_atomic(&path, b"new").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }
}
