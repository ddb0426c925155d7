//! The proxy forwarder
//!
//! Resolves the stored server share for the request's association id,
//! reconstructs the full secret against the client share carried in the
//! placeholder, rewrites the marked headers, and relays the request to the
//! declared destination. The reconstructed secret lives only for the
//! duration of the outbound call and is never cached or persisted.

use bson::oid::ObjectId;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::HeaderMap;
use hyper::Response;
use tracing::{debug, warn};

use crate::db::CredentialStore;
use crate::keysplit;

use super::{
    extract_client_share, rewrite_headers, strip_internal_headers, ProxyDirective, ProxyError,
};

/// Response headers that must not be relayed from the upstream
///
/// Hop-by-hop headers plus content-length, which is recomputed from the
/// relayed body.
const HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Forward a proxy request to its declared destination
///
/// Either the full pipeline completes (reconstruct, rewrite, send, relay)
/// or the request is rejected before anything reaches the destination.
pub async fn proxy_request(
    store: &dyn CredentialStore,
    http: &reqwest::Client,
    allowlist: &[String],
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response<Full<Bytes>>, ProxyError> {
    let directive = ProxyDirective::from_headers(headers)?;

    let url = reqwest::Url::parse(&directive.destination)
        .map_err(|e| ProxyError::BadDestination(e.to_string()))?;
    check_allowlist(&url, allowlist)?;

    let method = reqwest::Method::from_bytes(directive.method.as_bytes())
        .map_err(|e| ProxyError::BadDestination(format!("invalid method: {}", e)))?;

    let outbound_headers = strip_internal_headers(headers);

    // An unparseable association id can never match a stored share
    let share_id =
        ObjectId::parse_str(&directive.association_id).map_err(|_| ProxyError::KeyNotFound)?;
    let key_share = store
        .find_key_share(&share_id)
        .await
        .map_err(|e| ProxyError::Store(e.to_string()))?
        .ok_or(ProxyError::KeyNotFound)?;

    let client_share = extract_client_share(headers).ok_or(ProxyError::PartialKeyNotFound)?;
    let secret = keysplit::reconstruct(&key_share.server_share, &client_share)?;

    let outbound_headers = rewrite_headers(&outbound_headers, &client_share, &secret)?;

    debug!(
        association_id = %directive.association_id,
        method = %method,
        destination = %url,
        "Forwarding proxied request"
    );

    let upstream = http
        .request(method, url)
        .headers(outbound_headers)
        .body(body)
        .send()
        .await
        .map_err(|e| {
            warn!(error = %e, "Upstream request failed");
            ProxyError::Upstream(e.to_string())
        })?;

    relay_response(upstream).await
}

/// Relay the upstream response verbatim (status, headers, body)
async fn relay_response(upstream: reqwest::Response) -> Result<Response<Full<Bytes>>, ProxyError> {
    let status = upstream.status();
    let headers = upstream.headers().clone();

    let body = upstream
        .bytes()
        .await
        .map_err(|e| ProxyError::Upstream(format!("failed to read upstream body: {}", e)))?;

    let mut builder = Response::builder().status(status);
    for (name, value) in headers.iter() {
        if HOP_HEADERS.iter().any(|h| name.as_str().eq_ignore_ascii_case(h)) {
            continue;
        }
        builder = builder.header(name, value);
    }

    builder
        .body(Full::new(body))
        .map_err(|e| ProxyError::Upstream(format!("failed to build relay response: {}", e)))
}

fn check_allowlist(url: &reqwest::Url, allowlist: &[String]) -> Result<(), ProxyError> {
    if allowlist.is_empty() {
        return Ok(());
    }

    // A leading dot admits subdomains; a bare entry matches its host exactly
    let host = url.host_str().unwrap_or("");
    let allowed = allowlist.iter().any(|entry| {
        if let Some(suffix) = entry.strip_prefix('.') {
            host == suffix || host.ends_with(&format!(".{}", suffix))
        } else {
            host == entry
        }
    });

    if allowed {
        Ok(())
    } else {
        Err(ProxyError::DestinationNotAllowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{AttestationCredentialDoc, KeyShareDoc, UserDoc};
    use crate::keysplit::SplitError;
    use crate::proxy::{
        ASSOCIATION_ID_HEADER, DESTINATION_HEADER, HTTP_METHOD_HEADER, PARTIAL_KEY_MARKER,
    };
    use crate::types::{KeycleaveError, Result as KcResult};
    use async_trait::async_trait;
    use http_body_util::BodyExt;
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::collections::HashMap;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    struct FakeStore {
        shares: HashMap<ObjectId, KeyShareDoc>,
    }

    impl FakeStore {
        fn with_share(id: ObjectId, server_share: &str) -> Self {
            let mut share = KeyShareDoc::new(
                "stripe".to_string(),
                None,
                server_share.to_string(),
                ObjectId::new(),
            );
            share._id = Some(id);
            Self {
                shares: HashMap::from([(id, share)]),
            }
        }
    }

    #[async_trait]
    impl CredentialStore for FakeStore {
        async fn find_key_share(&self, id: &ObjectId) -> KcResult<Option<KeyShareDoc>> {
            Ok(self.shares.get(id).cloned())
        }

        async fn find_project_owner(&self, _: &ObjectId) -> KcResult<Option<UserDoc>> {
            Ok(None)
        }

        async fn find_attestation_credential(
            &self,
            _: &str,
            _: &ObjectId,
        ) -> KcResult<Option<AttestationCredentialDoc>> {
            Ok(None)
        }

        async fn upsert_attestation_credential(
            &self,
            _: &ObjectId,
            _: &str,
            _: &str,
            _: &str,
            _: Option<&str>,
        ) -> KcResult<AttestationCredentialDoc> {
            Err(KeycleaveError::Internal("not supported in tests".into()))
        }
    }

    struct RecordedRequest {
        method: String,
        path: String,
        headers: HeaderMap,
        body: Bytes,
    }

    /// Local destination stand-in that records everything it receives
    async fn spawn_upstream() -> (String, mpsc::UnboundedReceiver<RecordedRequest>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                let tx = tx.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req: Request<Incoming>| {
                        let tx = tx.clone();
                        async move {
                            let (parts, body) = req.into_parts();
                            let body = body.collect().await.unwrap().to_bytes();
                            let _ = tx.send(RecordedRequest {
                                method: parts.method.to_string(),
                                path: parts.uri.path().to_string(),
                                headers: parts.headers,
                                body,
                            });
                            Ok::<_, hyper::Error>(
                                Response::builder()
                                    .status(StatusCode::OK)
                                    .header("X-Upstream", "reached")
                                    .body(Full::new(Bytes::from("upstream-ok")))
                                    .unwrap(),
                            )
                        }
                    });
                    let _ = http1::Builder::new().serve_connection(io, service).await;
                });
            }
        });

        (format!("http://{}", addr), rx)
    }

    fn proxy_headers(association_id: &str, destination: &str, client_share: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ASSOCIATION_ID_HEADER, association_id.parse().unwrap());
        headers.insert(HTTP_METHOD_HEADER, "POST".parse().unwrap());
        headers.insert(DESTINATION_HEADER, destination.parse().unwrap());
        headers.insert(
            "X-Api-Key",
            format!("{}{}%", PARTIAL_KEY_MARKER, client_share)
                .parse()
                .unwrap(),
        );
        headers.insert("Content-Type", "application/json".parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn test_end_to_end_forwarding() {
        let (base_url, mut rx) = spawn_upstream().await;

        let secret = "sk_live_abc";
        let shares = keysplit::split(secret.as_bytes());
        let id = ObjectId::new();
        let store = FakeStore::with_share(id, &shares.server_share);

        let headers = proxy_headers(
            &id.to_hex(),
            &format!("{}/v1/charge", base_url),
            &shares.client_share,
        );

        let response = proxy_request(
            &store,
            &reqwest::Client::new(),
            &[],
            &headers,
            Bytes::from(r#"{"amount":42}"#),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("X-Upstream").unwrap(), "reached");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"upstream-ok");

        let recorded = rx.recv().await.unwrap();
        assert_eq!(recorded.method, "POST");
        assert_eq!(recorded.path, "/v1/charge");
        assert_eq!(recorded.body, Bytes::from(r#"{"amount":42}"#));
        // The marked header arrives rewritten to the full secret
        assert_eq!(recorded.headers.get("x-api-key").unwrap(), secret);
        assert_eq!(
            recorded.headers.get("content-type").unwrap(),
            "application/json"
        );
        // Control headers never leak upstream
        assert!(recorded.headers.get(ASSOCIATION_ID_HEADER).is_none());
        assert!(recorded.headers.get(HTTP_METHOD_HEADER).is_none());
        assert!(recorded.headers.get(DESTINATION_HEADER).is_none());
    }

    #[tokio::test]
    async fn test_unknown_key_rejected_before_forwarding() {
        let (base_url, mut rx) = spawn_upstream().await;
        let store = FakeStore {
            shares: HashMap::new(),
        };

        let shares = keysplit::split(b"whatever");
        let headers = proxy_headers(
            &ObjectId::new().to_hex(),
            &format!("{}/v1/charge", base_url),
            &shares.client_share,
        );

        let err = proxy_request(
            &store,
            &reqwest::Client::new(),
            &[],
            &headers,
            Bytes::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ProxyError::KeyNotFound));
        assert!(rx.try_recv().is_err(), "destination must never be called");
    }

    #[tokio::test]
    async fn test_unparseable_association_id_is_key_not_found() {
        let store = FakeStore {
            shares: HashMap::new(),
        };
        let shares = keysplit::split(b"whatever");
        let headers = proxy_headers("not-an-id", "http://127.0.0.1:9/x", &shares.client_share);

        let err = proxy_request(
            &store,
            &reqwest::Client::new(),
            &[],
            &headers,
            Bytes::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ProxyError::KeyNotFound));
    }

    #[tokio::test]
    async fn test_mismatched_shares_rejected_before_forwarding() {
        let (base_url, mut rx) = spawn_upstream().await;

        let id = ObjectId::new();
        // Server share of a different length than the client share
        let store = FakeStore::with_share(id, &keysplit::split(b"short").server_share);
        let client_share = keysplit::split(b"a longer secret").client_share;

        let headers = proxy_headers(&id.to_hex(), &format!("{}/x", base_url), &client_share);

        let err = proxy_request(
            &store,
            &reqwest::Client::new(),
            &[],
            &headers,
            Bytes::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            ProxyError::Reconstruct(SplitError::LengthMismatch { .. })
        ));
        assert!(rx.try_recv().is_err(), "destination must never be called");
    }

    #[tokio::test]
    async fn test_allowlist_blocks_unlisted_destination() {
        let id = ObjectId::new();
        let shares = keysplit::split(b"secret");
        let store = FakeStore::with_share(id, &shares.server_share);

        let headers = proxy_headers(&id.to_hex(), "http://127.0.0.1:9/x", &shares.client_share);

        let err = proxy_request(
            &store,
            &reqwest::Client::new(),
            &["api.example.com".to_string()],
            &headers,
            Bytes::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ProxyError::DestinationNotAllowed));
    }
}
