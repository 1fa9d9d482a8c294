//! SSH reachability checks.
//!
//! A probe opens one SSH session, authenticates with a password and
//! disconnects. Nothing is kept open: the session handle is dropped on every
//! exit path, and explicitly disconnected when authentication got that far.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::keys::PublicKey;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Why a probe failed.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Password cannot be empty for an SSH check")]
    EmptySecret,
    #[error("Authentication failed (wrong username or password)")]
    Authentication,
    #[error("SSH error: {0}")]
    Protocol(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Connection to {host}:{port} timed out")]
    Timeout { host: String, port: u16 },
    #[error("Unexpected error: {0}")]
    Other(String),
}

impl ProbeError {
    /// Stable machine-readable class for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptySecret => "EMPTY_SECRET",
            Self::Authentication => "AUTH_FAILED",
            Self::Protocol(_) => "SSH_ERROR",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Other(_) => "PROBE_FAILED",
        }
    }
}

impl From<russh::Error> for ProbeError {
    fn from(e: russh::Error) -> Self {
        match e {
            // The peer accepted TCP, then closed before completing the SSH
            // exchange: it is not an SSH server.
            russh::Error::IO(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                Self::Protocol(format!("peer closed the connection during the SSH handshake: {io}"))
            }
            russh::Error::IO(io) => Self::Network(io.to_string()),
            russh::Error::ConnectionTimeout => Self::Network("connection timed out".to_string()),
            russh::Error::NotAuthenticated => Self::Authentication,
            other => Self::Protocol(other.to_string()),
        }
    }
}

/// Checks that a host accepts the given SSH credentials.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(
        &self,
        host: &str,
        port: u16,
        username: &str,
        secret: &str,
    ) -> Result<(), ProbeError>;
}

/// [`Prober`] backed by `russh`.
#[derive(Debug, Clone)]
pub struct SshProber {
    timeout: Duration,
}

impl SshProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Accepts any host key: the probe only answers "can we log in", it does not
/// pin hosts.
#[derive(Clone, Debug, Copy)]
struct ProbeHandler;

impl client::Handler for ProbeHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        debug!("Probe: server key {:?}", server_public_key.algorithm());
        Ok(true)
    }
}

#[async_trait]
impl Prober for SshProber {
    async fn probe(
        &self,
        host: &str,
        port: u16,
        username: &str,
        secret: &str,
    ) -> Result<(), ProbeError> {
        if secret.is_empty() {
            return Err(ProbeError::EmptySecret);
        }

        let result = timeout(self.timeout, handshake(host, port, username, secret)).await;
        match result {
            Ok(Ok(())) => {
                debug!("Probe: {username}@{host}:{port} ok");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("Probe: {username}@{host}:{port} failed: {e}");
                Err(e)
            }
            Err(_) => {
                warn!("Probe: {username}@{host}:{port} timed out");
                Err(ProbeError::Timeout {
                    host: host.to_string(),
                    port,
                })
            }
        }
    }
}

/// Resolve, connect, authenticate, disconnect. Dropping the future (on
/// timeout) drops the session handle and closes the socket.
async fn handshake(host: &str, port: u16, username: &str, secret: &str) -> Result<(), ProbeError> {
    let target = format!("{host}:{port}");
    let addr = tokio::net::lookup_host(&target)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to resolve {target}: {e}")))?
        .next()
        .ok_or_else(|| ProbeError::Network(format!("{target} resolved to no addresses")))?;

    let config = Arc::new(client::Config::default());
    let mut session = client::connect(config, addr, ProbeHandler).await?;

    let auth = session.authenticate_password(username, secret).await;
    let outcome = match auth {
        Ok(res) if res.success() => Ok(()),
        Ok(_) => Err(ProbeError::Authentication),
        Err(e) => Err(e.into()),
    };

    if let Err(e) = session
        .disconnect(russh::Disconnect::ByApplication, "", "en")
        .await
    {
        debug!("Probe: disconnect from {target} failed: {e}");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_secret_rejected_before_connecting() {
        // Port 9 on TEST-NET-1 would hang if a connection were attempted.
        let prober = SshProber::new(Duration::from_secs(30));
        let err = prober.probe("192.0.2.1", 9, "root", "").await.unwrap_err();
        assert!(matches!(err, ProbeError::EmptySecret));
        assert_eq!(err.code(), "EMPTY_SECRET");
    }

    #[tokio::test]
    async fn test_refused_connection_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let prober = SshProber::new(Duration::from_secs(5));
        let err = prober
            .probe("127.0.0.1", port, "root", "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Network(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        // Accepts TCP but never speaks SSH.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _accept = tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let prober = SshProber::new(Duration::from_millis(300));
        let err = prober
            .probe("127.0.0.1", port, "root", "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Timeout { port: p, .. } if p == port));
    }

    #[tokio::test]
    async fn test_non_ssh_peer_is_protocol_error() {
        use tokio::io::AsyncWriteExt;

        // Answers like a web server, then hangs up.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _accept = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let _ = sock
                .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
                .await;
            let _ = sock.shutdown().await;
        });

        let prober = SshProber::new(Duration::from_secs(5));
        let err = prober
            .probe("127.0.0.1", port, "root", "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Protocol(_)), "got {err:?}");
        assert_eq!(err.code(), "SSH_ERROR");
    }

    #[test]
    fn test_russh_error_classes() {
        assert!(matches!(
            ProbeError::from(russh::Error::NotAuthenticated),
            ProbeError::Authentication
        ));
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert!(matches!(
            ProbeError::from(russh::Error::IO(refused)),
            ProbeError::Network(_)
        ));
        let eof = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        assert!(matches!(
            ProbeError::from(russh::Error::IO(eof)),
            ProbeError::Protocol(_)
        ));
        assert!(matches!(
            ProbeError::from(russh::Error::Disconnect),
            ProbeError::Protocol(_)
        ));
        assert_eq!(ProbeError::Authentication.code(), "AUTH_FAILED");
    }
}
