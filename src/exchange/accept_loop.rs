//! The accept loop.
//!
//! # Responsibilities
//! - Accept connections until stopped, one worker task per connection
//! - Reap finished workers whenever an accept times out or a worker spawns
//! - On stop, join every worker still registered before returning
//!
//! # Design Decisions
//! - Stop is a `CancellationToken` raced against accept, so it takes effect
//!   without waiting out the accept timeout
//! - Any accept error other than the timeout ends the loop for good; the
//!   caller sees `Err` and decides whether to restart
//! - Spawning is unbounded unless `max_workers` is set (see `Admission`)

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ListenerConfig;
use crate::exchange::registry::{ConnectionId, WorkerRegistry};
use crate::exchange::sink::SharedSink;
use crate::exchange::worker::{ConnectionWorker, WorkerSettings};
use crate::net::listener::{Admission, ListenEndpoint, ListenerError, WorkerPermit};
use crate::observability::metrics;
use crate::protocol::ProtocolFactory;

/// Accepts connections and spawns a worker for each.
pub struct AcceptLoop {
    endpoint: ListenEndpoint,
    settings: WorkerSettings,
    sink: SharedSink,
    admission: Admission,
    registry: Arc<WorkerRegistry>,
    stop: CancellationToken,
}

impl AcceptLoop {
    pub fn new(endpoint: ListenEndpoint, settings: WorkerSettings, sink: SharedSink) -> Self {
        Self {
            endpoint,
            settings,
            sink,
            admission: Admission::unbounded(),
            registry: Arc::new(WorkerRegistry::new()),
            stop: CancellationToken::new(),
        }
    }

    /// Bind the configured endpoint and apply its worker settings and admission policy.
    pub async fn bind(
        config: &ListenerConfig,
        protocol: ProtocolFactory,
        sink: SharedSink,
    ) -> Result<Self, ListenerError> {
        let endpoint = ListenEndpoint::bind(config).await?;
        let settings = WorkerSettings::from_config(config, protocol);
        Ok(Self::new(endpoint, settings, sink).with_admission(Admission::from_config(config)))
    }

    pub fn with_admission(mut self, admission: Admission) -> Self {
        self.admission = admission;
        self
    }

    /// Stop when `token` is cancelled, in addition to `stop()`.
    pub fn with_stop_token(mut self, token: CancellationToken) -> Self {
        self.stop = token;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Request the loop to stop. `run` returns once workers are joined.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Accept until stopped or until a fatal accept error.
    pub async fn run(&self) -> Result<(), ListenerError> {
        tracing::info!(
            address = %self.endpoint.local_addr(),
            protocol = self.settings.protocol.name(),
            immediate_reply = self.settings.immediate_reply,
            max_workers = ?self.admission.available(),
            "Accept loop started"
        );

        let result = loop {
            if self.stop.is_cancelled() {
                break Ok(());
            }

            let reserved = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break Ok(()),
                reserved = self.admission.reserve() => reserved,
            };

            let accepted = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break Ok(()),
                accepted = self.endpoint.accept() => accepted,
            };

            match accepted {
                Ok(Some((stream, peer))) => self.spawn_worker(stream, peer, reserved),
                Ok(None) => {
                    let reaped = self.registry.reap();
                    if reaped > 0 {
                        tracing::trace!(
                            reaped,
                            active = self.registry.len(),
                            "Reaped finished workers"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Accept failed, listener is stopping");
                    metrics::record_listener_failure();
                    self.stop.cancel();
                    break Err(e);
                }
            }
        };

        let active = self.registry.len();
        if active > 0 {
            tracing::info!(active, "Waiting for workers to finish");
        }
        let joined = self.registry.join_all().await;
        tracing::info!(joined, "Accept loop stopped");
        result
    }

    fn spawn_worker(&self, stream: TcpStream, peer: SocketAddr, reserved: Option<WorkerPermit>) {
        let Some(permit) = self.admission.admit(reserved) else {
            tracing::warn!(peer_addr = %peer, "Worker limit reached, rejecting connection");
            metrics::record_rejected();
            drop(stream);
            return;
        };
        metrics::record_accepted();

        // accept timeouts are rare under steady traffic, so reap here too
        self.registry.reap();

        let id = ConnectionId::new();
        let worker = ConnectionWorker::new(id, stream, peer, self.settings, self.sink.clone())
            .with_permit(permit);
        self.registry.register(id, tokio::spawn(worker.run()));

        tracing::debug!(
            connection_id = %id,
            peer_addr = %peer,
            active = self.registry.len(),
            "Worker spawned"
        );
    }

    /// Run the loop on its own task.
    pub fn spawn(self) -> AcceptLoopHandle {
        let stop = self.stop.clone();
        let registry = Arc::clone(&self.registry);
        let local_addr = self.local_addr();
        let task = tokio::spawn(async move { self.run().await });
        AcceptLoopHandle {
            stop,
            registry,
            local_addr,
            task,
        }
    }
}

/// Control handle for a spawned accept loop.
#[derive(Debug)]
pub struct AcceptLoopHandle {
    stop: CancellationToken,
    registry: Arc<WorkerRegistry>,
    local_addr: SocketAddr,
    task: JoinHandle<Result<(), ListenerError>>,
}

impl AcceptLoopHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Workers currently registered (not yet reaped or joined).
    pub fn worker_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop accepting and wait until every worker has been joined.
    pub async fn stop(self) -> Result<(), ListenerError> {
        self.stop.cancel();
        self.wait().await
    }

    /// Wait for the loop to end on its own (stop token or fatal error).
    pub async fn wait(self) -> Result<(), ListenerError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(ListenerError::Accept(std::io::Error::other(format!(
                "accept loop task failed: {e}"
            )))),
        }
    }
}
