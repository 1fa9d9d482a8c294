//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::activity::ActivityLog;
use crate::apply::{ApplyGateway, ApplyOptions};
use crate::cipher::CredentialKey;
use crate::config::Config;
use crate::probe::{Prober, SshProber};
use crate::service::{ServiceManager, SystemctlService};
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    pub store: Store,
    /// Key sealing stored SSH passwords. Loaded once.
    pub credential_key: Arc<CredentialKey>,
    pub prober: Arc<dyn Prober>,
    pub service: Arc<dyn ServiceManager>,
    /// Owns the apply lock; shared by `/api/config/*`.
    pub gateway: Arc<ApplyGateway>,
    /// Operator journal read by `/api/activity`.
    pub activity_log: Arc<ActivityLog>,
}

impl AppState {
    /// Wire state from explicit parts. Tests use this to swap in fakes.
    pub fn new(
        config: Config,
        store: Store,
        credential_key: CredentialKey,
        prober: Arc<dyn Prober>,
        service: Arc<dyn ServiceManager>,
    ) -> Self {
        let gateway = ApplyGateway::new(
            store.clone(),
            service.clone(),
            ApplyOptions {
                config_path: config.relay_config_path(),
                debug: config.relay.debug,
            },
        );
        Self {
            config: Arc::new(config),
            start_time: Instant::now(),
            store,
            credential_key: Arc::new(credential_key),
            prober,
            service,
            gateway: Arc::new(gateway),
            activity_log: Arc::new(ActivityLog::default()),
        }
    }

    /// Production wiring: SSH prober and systemctl from `config`.
    pub fn from_config(config: Config, store: Store, credential_key: CredentialKey) -> Self {
        let prober = Arc::new(SshProber::new(Duration::from_secs(
            config.ssh.probe_timeout_secs,
        )));
        let service = Arc::new(SystemctlService::from_config(&config.service));
        Self::new(config, store, credential_key, prober, service)
    }
}
