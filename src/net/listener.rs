//! TCP listener implementation with optional backpressure.
//!
//! # Responsibilities
//! - Bind to the configured host/port with the configured backlog
//! - Accept incoming TCP connections, bounded by the accept timeout
//! - Enforce `max_workers` via semaphore when configured

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::{AdmissionPolicy, ListenerConfig};

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },
    /// Failed to accept connection.
    #[error("Failed to accept: {0}")]
    Accept(std::io::Error),
}

/// A bound listening socket with its accept timeout.
#[derive(Debug)]
pub struct ListenEndpoint {
    inner: TcpListener,
    local_addr: SocketAddr,
    accept_timeout: Duration,
}

impl ListenEndpoint {
    /// Bind to the configured address.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let address = format!("{}:{}", config.bind_host, config.port);
        let bind_err = |source| ListenerError::Bind {
            address: address.clone(),
            source,
        };

        let addr = tokio::net::lookup_host(&address)
            .await
            .map_err(bind_err)?
            .next()
            .ok_or_else(|| {
                bind_err(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "host resolved to no addresses",
                ))
            })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_err)?;
        socket.set_reuseaddr(true).map_err(bind_err)?;
        socket.bind(addr).map_err(bind_err)?;
        let inner = socket.listen(config.backlog).map_err(bind_err)?;
        let local_addr = inner.local_addr().map_err(bind_err)?;

        tracing::info!(
            address = %local_addr,
            backlog = config.backlog,
            accept_timeout_ms = config.accept_timeout_ms,
            "Listener bound"
        );

        Ok(Self {
            inner,
            local_addr,
            accept_timeout: config.accept_timeout(),
        })
    }

    /// Wait up to the accept timeout for a connection.
    ///
    /// `Ok(None)` means the timeout elapsed; that is not an error.
    pub async fn accept(&self) -> Result<Option<(TcpStream, SocketAddr)>, ListenerError> {
        match tokio::time::timeout(self.accept_timeout, self.inner.accept()).await {
            Err(_) => Ok(None),
            Ok(Ok((stream, addr))) => {
                tracing::debug!(peer_addr = %addr, "Connection accepted");
                Ok(Some((stream, addr)))
            }
            Ok(Err(e)) => Err(ListenerError::Accept(e)),
        }
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn accept_timeout(&self) -> Duration {
        self.accept_timeout
    }
}

/// Admission control at the accept point.
///
/// Without `max_workers` every connection is admitted. With it, `Queue`
/// waits for a free slot before accepting and `Reject` turns away
/// connections that arrive while all slots are taken.
#[derive(Debug, Clone)]
pub struct Admission {
    limit: Option<Arc<Semaphore>>,
    policy: AdmissionPolicy,
}

impl Admission {
    pub fn from_config(config: &ListenerConfig) -> Self {
        Self {
            limit: config.max_workers.map(|n| Arc::new(Semaphore::new(n))),
            policy: config.admission,
        }
    }

    pub fn unbounded() -> Self {
        Self {
            limit: None,
            policy: AdmissionPolicy::Queue,
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.limit.is_some()
    }

    /// Free worker slots, or `None` when unbounded.
    pub fn available(&self) -> Option<usize> {
        self.limit.as_ref().map(|s| s.available_permits())
    }

    /// Under `Queue`, wait for a slot before accepting.
    pub async fn reserve(&self) -> Option<WorkerPermit> {
        match (&self.limit, self.policy) {
            (Some(limit), AdmissionPolicy::Queue) => limit
                .clone()
                .acquire_owned()
                .await
                .ok()
                .map(|permit| WorkerPermit(Some(permit))),
            _ => None,
        }
    }

    /// Admit an accepted connection. `None` means it must be rejected.
    pub fn admit(&self, reserved: Option<WorkerPermit>) -> Option<WorkerPermit> {
        if reserved.is_some() {
            return reserved;
        }
        match &self.limit {
            None => Some(WorkerPermit(None)),
            Some(limit) => limit
                .clone()
                .try_acquire_owned()
                .ok()
                .map(|permit| WorkerPermit(Some(permit))),
        }
    }
}

/// A worker slot. Released when dropped, even if the worker panics.
#[derive(Debug)]
pub struct WorkerPermit(Option<OwnedSemaphorePermit>);

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> ListenerConfig {
        ListenerConfig {
            bind_host: "127.0.0.1".into(),
            port: 0,
            accept_timeout_ms: 50,
            ..ListenerConfig::default()
        }
    }

    #[tokio::test]
    async fn binds_ephemeral_port() {
        let endpoint = ListenEndpoint::bind(&local_config()).await.unwrap();
        assert_ne!(endpoint.local_addr().port(), 0);
        assert_eq!(endpoint.accept_timeout(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn accept_timeout_is_not_an_error() {
        let endpoint = ListenEndpoint::bind(&local_config()).await.unwrap();
        assert!(endpoint.accept().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn accepts_connection() {
        let mut config = local_config();
        config.accept_timeout_ms = 5_000;
        let endpoint = ListenEndpoint::bind(&config).await.unwrap();
        let _client = TcpStream::connect(endpoint.local_addr()).await.unwrap();
        assert!(endpoint.accept().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn bind_conflict_reports_address() {
        let first = ListenEndpoint::bind(&local_config()).await.unwrap();
        let mut config = local_config();
        config.port = first.local_addr().port();
        let err = ListenEndpoint::bind(&config).await.unwrap_err();
        assert!(matches!(err, ListenerError::Bind { .. }));
        assert!(err.to_string().contains("127.0.0.1"));
    }

    #[test]
    fn unbounded_admits_everything() {
        let admission = Admission::unbounded();
        assert!(!admission.is_bounded());
        assert!(admission.admit(None).is_some());
        assert!(admission.available().is_none());
    }

    #[test]
    fn reject_policy_turns_away_when_full() {
        let mut config = local_config();
        config.max_workers = Some(1);
        config.admission = AdmissionPolicy::Reject;
        let admission = Admission::from_config(&config);

        let held = admission.admit(None).unwrap();
        assert_eq!(admission.available(), Some(0));
        assert!(admission.admit(None).is_none());

        drop(held);
        assert!(admission.admit(None).is_some());
    }

    #[tokio::test]
    async fn queue_policy_reserves_before_accept() {
        let mut config = local_config();
        config.max_workers = Some(1);
        let admission = Admission::from_config(&config);

        let reserved = admission.reserve().await;
        assert!(reserved.is_some());
        let permit = admission.admit(reserved).unwrap();

        let waiting = tokio::time::timeout(Duration::from_millis(50), admission.reserve()).await;
        assert!(waiting.is_err());

        drop(permit);
        assert!(admission.reserve().await.is_some());
    }
}
