//! Control of the relay service through the host's service manager.
//!
//! [`ServiceManager`] is the narrow seam the apply gateway and the API use;
//! [`SystemctlService`] drives systemd with `[sudo] systemctl <action> <unit>`.
//! A different supervisor only needs another implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::process::{self, ExecError};

/// Service-manager verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Status,
}

impl ServiceAction {
    /// The systemctl verb. `Status` maps to `is-active`, whose exit code alone
    /// tells whether the unit is running.
    pub fn verb(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Status => "is-active",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "restart" => Some(Self::Restart),
            "status" | "is-active" => Some(Self::Status),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("'{0}' command not found, make sure it is on PATH")]
    NotFound(String),
    #[error("Command to {action} {unit} timed out")]
    Timeout { action: &'static str, unit: String },
    #[error("{action} {unit} failed: {message}")]
    Failed {
        action: &'static str,
        unit: String,
        exit_code: i32,
        message: String,
    },
    #[error("Could not run service command: {0}")]
    Spawn(String),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "SERVICE_COMMAND_NOT_FOUND",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Failed { .. } => "SERVICE_FAILED",
            Self::Spawn(_) => "SERVICE_SPAWN_FAILED",
        }
    }
}

/// Start/stop/restart/status for the relay service. Success carries a human
/// readable message.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn control(&self, action: ServiceAction) -> Result<String, ServiceError>;

    async fn start(&self) -> Result<String, ServiceError> {
        self.control(ServiceAction::Start).await
    }

    async fn stop(&self) -> Result<String, ServiceError> {
        self.control(ServiceAction::Stop).await
    }

    async fn restart(&self) -> Result<String, ServiceError> {
        self.control(ServiceAction::Restart).await
    }

    async fn status(&self) -> Result<String, ServiceError> {
        self.control(ServiceAction::Status).await
    }
}

/// systemd-backed [`ServiceManager`].
#[derive(Debug, Clone)]
pub struct SystemctlService {
    program: String,
    privilege: Vec<String>,
    unit: String,
    timeout: Duration,
}

impl SystemctlService {
    pub fn new(program: impl Into<String>, unit: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            privilege: Vec::new(),
            unit: unit.into(),
            timeout,
        }
    }

    /// Prefix every invocation with `privilege` (e.g. `["sudo"]`).
    #[must_use]
    pub fn with_privilege(mut self, privilege: Vec<String>) -> Self {
        self.privilege = privilege;
        self
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            config.program.clone(),
            config.name.clone(),
            Duration::from_secs(config.timeout_secs),
        )
        .with_privilege(config.privilege.clone())
    }

    /// Full argv for `action`: `[privilege..., program, verb, unit]`.
    pub fn argv(&self, action: ServiceAction) -> Vec<String> {
        let mut argv = self.privilege.clone();
        argv.push(self.program.clone());
        argv.push(action.verb().to_string());
        argv.push(self.unit.clone());
        argv
    }
}

#[async_trait]
impl ServiceManager for SystemctlService {
    async fn control(&self, action: ServiceAction) -> Result<String, ServiceError> {
        let argv = self.argv(action);
        let Some((program, args)) = argv.split_first() else {
            return Err(ServiceError::Spawn("empty command line".to_string()));
        };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let verb = action.verb();

        let output = match process::run_command(program, &args, self.timeout).await {
            Ok(output) => output,
            Err(ExecError::NotFound(p)) => {
                warn!("Service: '{p}' not found");
                return Err(ServiceError::NotFound(p));
            }
            Err(ExecError::Timeout) => {
                warn!("Service: '{}' timed out after {:?}", argv.join(" "), self.timeout);
                return Err(ServiceError::Timeout {
                    action: verb,
                    unit: self.unit.clone(),
                });
            }
            Err(e) => return Err(ServiceError::Spawn(e.to_string())),
        };

        let stdout = output.stdout.trim();
        let stderr = output.stderr.trim();
        if output.success() {
            info!("Service: {verb} {} ok", self.unit);
            if stdout.is_empty() {
                Ok(format!("{verb} {} successful.", self.unit))
            } else {
                Ok(stdout.to_string())
            }
        } else {
            let message = if !stderr.is_empty() {
                stderr.to_string()
            } else if !stdout.is_empty() {
                stdout.to_string()
            } else {
                format!("Unknown error during {verb} {}.", self.unit)
            };
            warn!(
                "Service: '{}' exited {}: {message}",
                argv.join(" "),
                output.exit_code
            );
            Err(ServiceError::Failed {
                action: verb,
                unit: self.unit.clone(),
                exit_code: output.exit_code,
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argv_layout() {
        let svc = SystemctlService::new("systemctl", "gost.service", Duration::from_secs(15))
            .with_privilege(vec!["sudo".into()]);
        assert_eq!(
            svc.argv(ServiceAction::Restart),
            vec!["sudo", "systemctl", "restart", "gost.service"]
        );
        assert_eq!(svc.argv(ServiceAction::Status)[2], "is-active");
    }

    #[test]
    fn test_action_parse() {
        assert_eq!(ServiceAction::from_str_opt("restart"), Some(ServiceAction::Restart));
        assert_eq!(ServiceAction::from_str_opt("is-active"), Some(ServiceAction::Status));
        assert_eq!(ServiceAction::from_str_opt("reload"), None);
    }

    // `echo` and `false` stand in for systemctl: argv is `<program> <verb> <unit>`.

    #[tokio::test]
    async fn test_success_uses_stdout() {
        let svc = SystemctlService::new("echo", "gost.service", Duration::from_secs(5));
        let msg = svc.restart().await.unwrap();
        assert_eq!(msg, "restart gost.service");
    }

    #[tokio::test]
    async fn test_success_without_output() {
        let svc = SystemctlService::new("true", "gost.service", Duration::from_secs(5));
        assert_eq!(svc.start().await.unwrap(), "start gost.service successful.");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let svc = SystemctlService::new("false", "gost.service", Duration::from_secs(5));
        match svc.stop().await.unwrap_err() {
            ServiceError::Failed {
                action,
                exit_code,
                message,
                ..
            } => {
                assert_eq!(action, "stop");
                assert_eq!(exit_code, 1);
                assert_eq!(message, "Unknown error during stop gost.service.");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let svc = SystemctlService::new("/nonexistent/systemctl", "gost.service", Duration::from_secs(5));
        assert!(matches!(svc.status().await, Err(ServiceError::NotFound(_))));
    }
}
