//! Split-key request proxying
//!
//! The forwarder takes an inbound request carrying control headers and a
//! client key share, reconstructs the full secret against the stored server
//! share, rewrites the marked header values, and relays the request to the
//! declared destination. The upstream response comes back unmodified.
//!
//! Control header protocol:
//!
//! - `Keycleave_ASSOCIATION_ID`: id of the stored key share
//! - `Keycleave_HTTP_METHOD`: verbatim target verb
//! - `Keycleave_DESTINATION`: absolute target URL
//! - any header containing `%Keycleave_PARTIAL_KEY:<client share>%`
//!
//! Control headers, the validation headers, and the device-token header are
//! stripped before forwarding; everything else passes through unchanged.

pub mod directive;
pub mod forward;

pub use directive::{
    extract_client_share, rewrite_headers, strip_internal_headers, ProxyDirective,
};
pub use forward::proxy_request;

use hyper::StatusCode;
use thiserror::Error;

use crate::keysplit::SplitError;

/// Header carrying the key share association id
pub const ASSOCIATION_ID_HEADER: &str = "Keycleave_ASSOCIATION_ID";
/// Header carrying the target HTTP method
pub const HTTP_METHOD_HEADER: &str = "Keycleave_HTTP_METHOD";
/// Header carrying the target destination URL
pub const DESTINATION_HEADER: &str = "Keycleave_DESTINATION";
/// Header selecting the device validation mode
pub const VALIDATION_MODE_HEADER: &str = "Keycleave_VALIDATION_MODE";
/// Header carrying the Apple team id for attestation
pub const APPLE_TEAM_ID_HEADER: &str = "Keycleave_APPLE_TEAM_ID";
/// Header carrying the DeviceCheck device token
pub const DEVICE_TOKEN_HEADER: &str = "X-Apple-Device-Token";
/// Opening marker of the in-header partial key placeholder
pub const PARTIAL_KEY_MARKER: &str = "%Keycleave_PARTIAL_KEY:";

/// Proxy rejection taxonomy
///
/// Every variant is terminal for the request; nothing is sent upstream
/// after a rejection.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("association id header missing")]
    AssociationIdMissing,

    #[error("no header contains a partial key placeholder")]
    PartialKeyMissing,

    #[error("http method header missing")]
    HttpMethodMissing,

    #[error("destination header missing")]
    DestinationMissing,

    #[error("key share was not found")]
    KeyNotFound,

    #[error("partial key was not found in placeholder")]
    PartialKeyNotFound,

    #[error("destination is not in the allow-list")]
    DestinationNotAllowed,

    #[error("invalid destination: {0}")]
    BadDestination(String),

    #[error("rewritten header value is not a legal header")]
    BadHeaderValue,

    #[error(transparent)]
    Reconstruct(#[from] SplitError),

    #[error("store error: {0}")]
    Store(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),
}

impl ProxyError {
    /// HTTP status this rejection maps to
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Machine-distinguishable reason code for the error body
    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::AssociationIdMissing => "association_id_missing",
            ProxyError::PartialKeyMissing => "partial_key_missing",
            ProxyError::HttpMethodMissing => "http_method_missing",
            ProxyError::DestinationMissing => "destination_missing",
            ProxyError::KeyNotFound => "key_not_found",
            ProxyError::PartialKeyNotFound => "partial_key_not_found",
            ProxyError::DestinationNotAllowed => "destination_not_allowed",
            ProxyError::BadDestination(_) => "bad_destination",
            ProxyError::BadHeaderValue => "bad_header_value",
            ProxyError::Reconstruct(SplitError::Decode(_)) => "share_decode_error",
            ProxyError::Reconstruct(SplitError::LengthMismatch { .. }) => "share_length_mismatch",
            ProxyError::Reconstruct(SplitError::Utf8) => "share_utf8_error",
            ProxyError::Store(_) => "store_error",
            ProxyError::Upstream(_) => "upstream_error",
        }
    }
}
