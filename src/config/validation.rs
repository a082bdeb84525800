//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, backlog > 0)
//! - Check protocol names against the registry
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ExchangeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ExchangeConfig;
use crate::protocol::ProtocolRegistry;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field}: unknown protocol '{name}'")]
    UnknownProtocol { field: &'static str, name: String },

    #[error("observability.metrics_address '{0}' is not a socket address")]
    MetricsAddress(String),
}

/// Validate a configuration against the built-in protocol registry.
pub fn validate_config(config: &ExchangeConfig) -> Result<(), Vec<ValidationError>> {
    validate_with_registry(config, &ProtocolRegistry::builtin())
}

/// Validate a configuration against a caller-supplied registry.
pub fn validate_with_registry(
    config: &ExchangeConfig,
    registry: &ProtocolRegistry,
) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let listener = &config.listener;
    let sender = &config.sender;

    let non_zero = [
        ("listener.backlog", u64::from(listener.backlog)),
        ("listener.accept_timeout_ms", listener.accept_timeout_ms),
        ("listener.read_timeout_ms", listener.read_timeout_ms),
        ("sender.timeout_ms", sender.timeout_ms),
        ("sender.reply_timeout_ms", sender.reply_timeout_ms),
    ];
    for (field, value) in non_zero {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }
    if listener.max_workers == Some(0) {
        errors.push(ValidationError::Zero { field: "listener.max_workers" });
    }

    for (field, name) in [
        ("listener.protocol", &listener.protocol),
        ("sender.protocol", &sender.protocol),
    ] {
        if !registry.contains(name) {
            errors.push(ValidationError::UnknownProtocol {
                field,
                name: name.clone(),
            });
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
