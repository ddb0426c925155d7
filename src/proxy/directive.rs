//! Control header extraction and rewriting
//!
//! Pure header-map transforms; no I/O. The placeholder is located with a
//! plain substring scan, not a regex.

use hyper::header::{HeaderMap, HeaderValue};

use super::{
    ProxyError, APPLE_TEAM_ID_HEADER, ASSOCIATION_ID_HEADER, DESTINATION_HEADER,
    DEVICE_TOKEN_HEADER, HTTP_METHOD_HEADER, PARTIAL_KEY_MARKER, VALIDATION_MODE_HEADER,
};

/// The forwarding instructions carried in control headers
#[derive(Debug, Clone)]
pub struct ProxyDirective {
    /// Key share association id, as sent (resolved to a document later)
    pub association_id: String,
    /// Target verb, verbatim; non-standard verbs are allowed
    pub method: String,
    /// Absolute destination URL
    pub destination: String,
}

impl ProxyDirective {
    /// Extract the directive from an inbound header map
    ///
    /// Each missing field is its own rejection so callers can tell exactly
    /// which header was absent.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ProxyError> {
        let association_id = header_str(headers, ASSOCIATION_ID_HEADER)
            .ok_or(ProxyError::AssociationIdMissing)?
            .to_string();

        if !headers
            .iter()
            .any(|(_, v)| v.to_str().map(|s| s.contains(PARTIAL_KEY_MARKER)).unwrap_or(false))
        {
            return Err(ProxyError::PartialKeyMissing);
        }

        let method = header_str(headers, HTTP_METHOD_HEADER)
            .ok_or(ProxyError::HttpMethodMissing)?
            .to_string();

        let destination = header_str(headers, DESTINATION_HEADER)
            .ok_or(ProxyError::DestinationMissing)?
            .to_string();

        Ok(Self {
            association_id,
            method,
            destination,
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Copy the header map minus control headers and hop-specific headers
///
/// Everything else passes through to the destination in original order.
pub fn strip_internal_headers(headers: &HeaderMap) -> HeaderMap {
    const INTERNAL: [&str; 7] = [
        ASSOCIATION_ID_HEADER,
        HTTP_METHOD_HEADER,
        DESTINATION_HEADER,
        VALIDATION_MODE_HEADER,
        APPLE_TEAM_ID_HEADER,
        DEVICE_TOKEN_HEADER,
        "host",
    ];

    let mut out = HeaderMap::new();
    for (name, value) in headers.iter() {
        if INTERNAL.iter().any(|h| name.as_str().eq_ignore_ascii_case(h)) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Extract the client share from the first header carrying the placeholder
///
/// The share is the non-empty text between `%Keycleave_PARTIAL_KEY:` and
/// the next `%`.
pub fn extract_client_share(headers: &HeaderMap) -> Option<String> {
    for (_, value) in headers.iter() {
        let Ok(text) = value.to_str() else { continue };
        if let Some(share) = scan_placeholder(text) {
            return Some(share.to_string());
        }
    }
    None
}

fn scan_placeholder(text: &str) -> Option<&str> {
    let start = text.find(PARTIAL_KEY_MARKER)? + PARTIAL_KEY_MARKER.len();
    let rest = &text[start..];
    let end = rest.find('%')?;
    if end == 0 {
        return None;
    }
    Some(&rest[..end])
}

/// Substitute the reconstructed secret into every marked header value
///
/// The full `%Keycleave_PARTIAL_KEY:<share>%` occurrence is replaced with
/// the secret; the rest of each value is untouched. All occurrences use the
/// one reconstructed value.
pub fn rewrite_headers(
    headers: &HeaderMap,
    client_share: &str,
    secret: &str,
) -> Result<HeaderMap, ProxyError> {
    let placeholder = format!("{}{}%", PARTIAL_KEY_MARKER, client_share);

    let mut out = HeaderMap::new();
    for (name, value) in headers.iter() {
        let rewritten = match value.to_str() {
            Ok(text) if text.contains(PARTIAL_KEY_MARKER) => {
                let replaced = text.replace(&placeholder, secret);
                HeaderValue::from_str(&replaced).map_err(|_| ProxyError::BadHeaderValue)?
            }
            _ => value.clone(),
        };
        out.append(name.clone(), rewritten);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ASSOCIATION_ID_HEADER, "665f1e2a9c3b4d5e6f708192".parse().unwrap());
        headers.insert(HTTP_METHOD_HEADER, "POST".parse().unwrap());
        headers.insert(
            DESTINATION_HEADER,
            "https://api.example.com/v1/charge".parse().unwrap(),
        );
        headers.insert(
            "X-Api-Key",
            "%Keycleave_PARTIAL_KEY:Zm9v%".parse().unwrap(),
        );
        headers.insert("Content-Type", "application/json".parse().unwrap());
        headers
    }

    #[test]
    fn test_directive_extraction() {
        let directive = ProxyDirective::from_headers(&full_headers()).unwrap();
        assert_eq!(directive.association_id, "665f1e2a9c3b4d5e6f708192");
        assert_eq!(directive.method, "POST");
        assert_eq!(directive.destination, "https://api.example.com/v1/charge");
    }

    #[test]
    fn test_each_missing_header_is_distinct() {
        let mut headers = full_headers();
        headers.remove(ASSOCIATION_ID_HEADER);
        assert!(matches!(
            ProxyDirective::from_headers(&headers),
            Err(ProxyError::AssociationIdMissing)
        ));

        let mut headers = full_headers();
        headers.remove("X-Api-Key");
        assert!(matches!(
            ProxyDirective::from_headers(&headers),
            Err(ProxyError::PartialKeyMissing)
        ));

        let mut headers = full_headers();
        headers.remove(HTTP_METHOD_HEADER);
        assert!(matches!(
            ProxyDirective::from_headers(&headers),
            Err(ProxyError::HttpMethodMissing)
        ));

        let mut headers = full_headers();
        headers.remove(DESTINATION_HEADER);
        assert!(matches!(
            ProxyDirective::from_headers(&headers),
            Err(ProxyError::DestinationMissing)
        ));
    }

    #[test]
    fn test_nonstandard_method_is_passed_verbatim() {
        let mut headers = full_headers();
        headers.insert(HTTP_METHOD_HEADER, "PURGE".parse().unwrap());
        let directive = ProxyDirective::from_headers(&headers).unwrap();
        assert_eq!(directive.method, "PURGE");
    }

    #[test]
    fn test_strip_removes_control_and_hop_headers() {
        let mut headers = full_headers();
        headers.insert(VALIDATION_MODE_HEADER, "deviceCheck".parse().unwrap());
        headers.insert(APPLE_TEAM_ID_HEADER, "XYZ789GHI0".parse().unwrap());
        headers.insert(DEVICE_TOKEN_HEADER, "token".parse().unwrap());
        headers.insert("Host", "proxy.keycleave.dev".parse().unwrap());

        let stripped = strip_internal_headers(&headers);

        assert!(stripped.get(ASSOCIATION_ID_HEADER).is_none());
        assert!(stripped.get(HTTP_METHOD_HEADER).is_none());
        assert!(stripped.get(DESTINATION_HEADER).is_none());
        assert!(stripped.get(VALIDATION_MODE_HEADER).is_none());
        assert!(stripped.get(APPLE_TEAM_ID_HEADER).is_none());
        assert!(stripped.get(DEVICE_TOKEN_HEADER).is_none());
        assert!(stripped.get("host").is_none());
        // Non-control headers survive
        assert_eq!(stripped.get("Content-Type").unwrap(), "application/json");
        assert!(stripped.get("X-Api-Key").is_some());
    }

    #[test]
    fn test_client_share_extraction() {
        let headers = full_headers();
        assert_eq!(extract_client_share(&headers).unwrap(), "Zm9v");
    }

    #[test]
    fn test_share_must_be_nonempty_and_terminated() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Api-Key", "%Keycleave_PARTIAL_KEY:%".parse().unwrap());
        assert!(extract_client_share(&headers).is_none());

        let mut headers = HeaderMap::new();
        headers.insert("X-Api-Key", "%Keycleave_PARTIAL_KEY:Zm9v".parse().unwrap());
        assert!(extract_client_share(&headers).is_none());
    }

    #[test]
    fn test_rewrite_substitutes_placeholder() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Authorization",
            "Bearer %Keycleave_PARTIAL_KEY:Zm9v%".parse().unwrap(),
        );
        headers.insert("Content-Type", "application/json".parse().unwrap());

        let rewritten = rewrite_headers(&headers, "Zm9v", "secret123").unwrap();

        assert_eq!(rewritten.get("Authorization").unwrap(), "Bearer secret123");
        assert_eq!(rewritten.get("Content-Type").unwrap(), "application/json");
    }

    #[test]
    fn test_rewrite_substitutes_every_marked_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Authorization",
            "Bearer %Keycleave_PARTIAL_KEY:Zm9v%".parse().unwrap(),
        );
        headers.insert(
            "X-Api-Key",
            "%Keycleave_PARTIAL_KEY:Zm9v%".parse().unwrap(),
        );

        let rewritten = rewrite_headers(&headers, "Zm9v", "sk_live_abc").unwrap();

        assert_eq!(rewritten.get("Authorization").unwrap(), "Bearer sk_live_abc");
        assert_eq!(rewritten.get("X-Api-Key").unwrap(), "sk_live_abc");
    }
}
