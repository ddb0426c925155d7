//! The /proxy endpoint
//!
//! Pipeline per request: device attestation gate, then the forwarder.
//! Either the whole pipeline completes and the upstream response is
//! relayed, or the request dies here with a 4xx and nothing reaches the
//! destination.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use tracing::warn;

use crate::attest;
use crate::proxy;
use crate::server::AppState;

use super::error_response;

/// Handle POST /proxy
pub async fn handle_proxy_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Response<Full<Bytes>> {
    let Some(store) = &state.store else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "store_unavailable",
            "Proxying requires a database connection",
        );
    };

    let (parts, body) = req.into_parts();

    // The gate runs first; a rejected request touches no secret material
    if let Err(e) = attest::enforce(
        store.as_ref(),
        &state.gate,
        state.verifier_factory.as_ref(),
        &parts.headers,
    )
    .await
    {
        warn!(code = e.code(), "Device validation rejected proxy request: {}", e);
        return error_response(e.status(), e.code(), &e.to_string());
    }

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("Proxy request body error: {}", e);
            return error_response(
                StatusCode::BAD_REQUEST,
                "body_error",
                "Failed to read request body",
            );
        }
    };

    match proxy::proxy_request(
        store.as_ref(),
        &state.http,
        &state.allowlist,
        &parts.headers,
        body,
    )
    .await
    {
        Ok(response) => response,
        Err(e) => {
            warn!(code = e.code(), "Proxy request rejected: {}", e);
            error_response(e.status(), e.code(), &e.to_string())
        }
    }
}
