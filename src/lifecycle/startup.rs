//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration against the protocol registry
//! - Resolve protocol names once, before any socket is opened
//! - Bind the listener and start the accept loop
//!
//! # Design Decisions
//! - Fail fast: an unknown protocol or bad value never reaches a connection
//! - The listener starts last (traffic only when ready)

use thiserror::Error;

use crate::config::validation::{validate_with_registry, ValidationError};
use crate::config::ExchangeConfig;
use crate::exchange::{AcceptLoop, AcceptLoopHandle, Sender, SharedSink};
use crate::lifecycle::Shutdown;
use crate::net::listener::ListenerError;
use crate::protocol::{ProtocolError, ProtocolRegistry};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Bind the configured listener and run its accept loop until `shutdown` triggers.
pub async fn start_listener(
    config: &ExchangeConfig,
    registry: &ProtocolRegistry,
    sink: SharedSink,
    shutdown: &Shutdown,
) -> Result<AcceptLoopHandle, StartupError> {
    validate_with_registry(config, registry).map_err(StartupError::Validation)?;
    let protocol = registry.resolve(&config.listener.protocol)?;

    let accept_loop = AcceptLoop::bind(&config.listener, protocol, sink)
        .await?
        .with_stop_token(shutdown.child_token());

    tracing::info!(
        address = %accept_loop.local_addr(),
        "Listener ready"
    );
    Ok(accept_loop.spawn())
}

/// Build the outbound sender for the configured protocol.
pub fn build_sender(
    config: &ExchangeConfig,
    registry: &ProtocolRegistry,
) -> Result<Sender, StartupError> {
    validate_with_registry(config, registry).map_err(StartupError::Validation)?;
    Ok(Sender::from_config(&config.sender, registry)?)
}
