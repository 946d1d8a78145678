//! Configuration validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::AppConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("listener.max_connections must be greater than zero")]
    NoConnections,

    #[error("timeouts.keep_alive_timeout_ms must be greater than zero")]
    ZeroKeepAlive,

    #[error(
        "timeouts.headers_timeout_ms ({headers_ms}) must be at least keep_alive_timeout_ms ({keep_alive_ms})"
    )]
    HeadersTimeoutTooShort { headers_ms: u64, keep_alive_ms: u64 },

    #[error("shutdown.rejection_status_code {0} is not a 4xx or 5xx status")]
    RejectionStatus(u16),
}

fn check_address(field: &'static str, value: &str, errors: &mut Vec<ValidationError>) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

/// Check semantic constraints the schema cannot express.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address("listener.bind_address", &config.listener.bind_address, &mut errors);
    if config.observability.metrics_enabled {
        check_address(
            "observability.metrics_address",
            &config.observability.metrics_address,
            &mut errors,
        );
    }

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::NoConnections);
    }

    let timeouts = &config.timeouts;
    if timeouts.keep_alive_timeout_ms == 0 {
        errors.push(ValidationError::ZeroKeepAlive);
    }
    // An idle socket must hit the keep-alive close before a header timeout can.
    if timeouts.headers_timeout_ms < timeouts.keep_alive_timeout_ms {
        errors.push(ValidationError::HeadersTimeoutTooShort {
            headers_ms: timeouts.headers_timeout_ms,
            keep_alive_ms: timeouts.keep_alive_timeout_ms,
        });
    }

    let status = config.shutdown.rejection_status_code;
    if !(400..=599).contains(&status) {
        errors.push(ValidationError::RejectionStatus(status));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
