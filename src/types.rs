//! Crate-wide error and result types

use thiserror::Error;

/// Errors raised by keycleave infrastructure
///
/// Request-level rejections (bad proxy headers, failed attestation) have
/// their own taxonomies in `proxy::ProxyError` and `attest::GateError`;
/// this type covers everything that is not a caller mistake.
#[derive(Debug, Error)]
pub enum KeycleaveError {
    /// MongoDB connection or query failure
    #[error("database error: {0}")]
    Database(String),

    /// Invalid or incomplete startup configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Outbound HTTP failure (upstream destination or DeviceCheck API)
    #[error("http error: {0}")]
    Http(String),

    /// Anything else
    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KeycleaveError>;
