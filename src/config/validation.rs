//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacities > 0, deadlines > 0)
//! - Check that protocol parameters agree with each other
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::{ProtocolKind, ServerConfig};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `queues.send_capacity`.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match config.listener.network.as_str() {
        "tcp" | "tcp4" | "tcp6" => {}
        other => errors.push(ValidationError::new(
            "listener.network",
            format!("unknown network {other:?}, expected tcp, tcp4 or tcp6"),
        )),
    }
    if config.listener.host.is_empty() {
        errors.push(ValidationError::new("listener.host", "must not be empty"));
    }
    if config.listener.accept_deadline_ms == 0 {
        errors.push(ValidationError::new(
            "listener.accept_deadline_ms",
            "must be at least 1",
        ));
    }

    if config.queues.send_capacity == 0 {
        errors.push(ValidationError::new("queues.send_capacity", "must be at least 1"));
    }
    if config.queues.receive_capacity == 0 {
        errors.push(ValidationError::new(
            "queues.receive_capacity",
            "must be at least 1",
        ));
    }

    let protocol = &config.protocol;
    if protocol.max_frame_len == 0 {
        errors.push(ValidationError::new("protocol.max_frame_len", "must be at least 1"));
    }
    if protocol.kind == ProtocolKind::LengthPrefixed {
        let limit: u64 = match protocol.length_width {
            1 => u64::from(u8::MAX),
            2 => u64::from(u16::MAX),
            4 => u64::from(u32::MAX),
            other => {
                errors.push(ValidationError::new(
                    "protocol.length_width",
                    format!("{other} is not one of 1, 2 or 4"),
                ));
                u64::MAX
            }
        };
        if protocol.max_frame_len as u64 > limit {
            errors.push(ValidationError::new(
                "protocol.max_frame_len",
                format!(
                    "{} does not fit a {}-byte length header",
                    protocol.max_frame_len, protocol.length_width
                ),
            ));
        }
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
