//! HTTP server implementation
//!
//! hyper http1 with TokioIo, one task per connection. Requests are routed
//! with a plain method/path match; the proxy endpoint runs the attestation
//! gate before the forwarder, everything under /me is the authenticated
//! management surface.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::attest::{DeviceCheckFactory, GateConfig, VerifierCredential, VerifierFactory};
use crate::config::Args;
use crate::db::MongoStore;
use crate::routes;
use crate::types::{KeycleaveError, Result};

/// Shared application state
///
/// Everything here is immutable after startup; per-request state (the
/// reconstructed secret, the attestation verifier) never lives in it.
pub struct AppState {
    pub args: Args,
    pub store: Option<Arc<MongoStore>>,
    /// Shared outbound HTTP client (upstream forwarding + DeviceCheck)
    pub http: reqwest::Client,
    /// Attestation gate configuration, fixed at startup
    pub gate: GateConfig,
    /// Builds one fresh verifier per gated request
    pub verifier_factory: Arc<dyn VerifierFactory>,
    /// Destination host allow-list; empty allows any destination
    pub allowlist: Vec<String>,
}

impl AppState {
    /// Build application state from configuration
    ///
    /// Fails fast when the default attestation credential is malformed.
    pub fn new(args: Args, store: Option<MongoStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(args.request_timeout_ms))
            .build()
            .map_err(|e| KeycleaveError::Http(format!("failed to build HTTP client: {}", e)))?;

        let gate = GateConfig {
            default_credential: default_credential(&args)?,
        };

        let verifier_factory: Arc<dyn VerifierFactory> = if args.dev_mode {
            Arc::new(DeviceCheckFactory::sandbox(http.clone()))
        } else {
            Arc::new(DeviceCheckFactory::production(http.clone()))
        };

        let allowlist = args.destination_allowlist_entries();

        Ok(Self {
            args,
            store: store.map(Arc::new),
            http,
            gate,
            verifier_factory,
            allowlist,
        })
    }
}

/// Assemble and sanity-check the startup-registered signing credential
fn default_credential(args: &Args) -> Result<Option<VerifierCredential>> {
    let (Some(pem), Some(kid), Some(iss)) = (
        &args.apple_jwt_private_key,
        &args.apple_jwt_kid,
        &args.apple_jwt_iss,
    ) else {
        return Ok(None);
    };

    let private_key = pem.replace("\\n", "\n");
    jsonwebtoken::EncodingKey::from_ec_pem(private_key.as_bytes())
        .map_err(|e| KeycleaveError::Config(format!("APPLE_JWT_PRIVATE_KEY is not ES256: {}", e)))?;

    Ok(Some(VerifierCredential {
        team_id: iss.clone(),
        key_id: kid.clone(),
        private_key,
        bypass_token: args.apple_jwt_bypass_token.clone(),
    }))
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Keycleave listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - DeviceCheck sandbox endpoint in use");
    }
    if state.allowlist.is_empty() {
        warn!("No destination allow-list configured - any destination may be proxied to");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        // Liveness probe
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            routes::health_check(Arc::clone(&state))
        }

        // Version info for deployment verification
        (Method::GET, "/version") => routes::version_info(),

        // CORS preflight
        (Method::OPTIONS, _) => preflight_response(),

        // The split-key proxy: attestation gate, then forwarder
        (Method::POST, "/proxy") => routes::handle_proxy_request(req, Arc::clone(&state)).await,

        // Management surface (identity-provider bearer auth)
        (_, p) if p == "/me" || p.starts_with("/me/") => {
            routes::handle_account_request(req, Arc::clone(&state), &path).await
        }

        _ => routes::not_found_response(&path),
    };

    Ok(response)
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}
