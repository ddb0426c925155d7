//! Caller identity from the external identity provider
//!
//! The dashboard operator authenticates somewhere else entirely; what
//! reaches us is a bearer JWT minted by that provider and validated here
//! with a shared HS256 secret. The subject claim is the caller identifier.
//! Users are provisioned on first sight; there are no registration or
//! login routes in this service.

use hyper::header::HeaderMap;
use hyper::StatusCode;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

use crate::db::schemas::UserDoc;
use crate::db::MongoStore;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid bearer token: {0}")]
    InvalidToken(String),

    #[error("store error: {0}")]
    Store(String),
}

impl IdentityError {
    pub fn status(&self) -> StatusCode {
        match self {
            IdentityError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

/// Claims we require from the identity provider's token
#[derive(Debug, Deserialize)]
struct IdpClaims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

/// Extract a bearer token from the Authorization header
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Validate the token against the shared secret and return its subject
pub fn verify_token(secret: &str, token: &str) -> Result<String, IdentityError> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<IdpClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| IdentityError::InvalidToken(e.to_string()))?;

    Ok(data.claims.sub)
}

/// Resolve the authenticated caller for a management request
///
/// Provisions the user record on first sight of a new subject.
pub async fn authenticate(
    store: &MongoStore,
    secret: &str,
    headers: &HeaderMap,
) -> Result<UserDoc, IdentityError> {
    let token = extract_bearer(headers).ok_or(IdentityError::MissingToken)?;
    let subject = verify_token(secret, token)?;

    store
        .ensure_user(&subject, "subject")
        .await
        .map_err(|e| IdentityError::Store(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        exp: usize,
    }

    fn mint(secret: &str, sub: &str, exp: usize) -> String {
        encode(
            &Header::default(),
            &TestClaims {
                sub: sub.to_string(),
                exp,
            },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn far_future() -> usize {
        (chrono::Utc::now().timestamp() + 3600) as usize
    }

    #[test]
    fn test_bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer(&headers).is_none());

        headers.insert("Authorization", "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(extract_bearer(&headers), Some("abc.def.ghi"));

        headers.insert("Authorization", "Basic dXNlcjpwYXNz".parse().unwrap());
        assert!(extract_bearer(&headers).is_none());
    }

    #[test]
    fn test_valid_token_yields_subject() {
        let token = mint("shared-secret", "user_2xYz", far_future());
        assert_eq!(verify_token("shared-secret", &token).unwrap(), "user_2xYz");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = mint("shared-secret", "user_2xYz", far_future());
        assert!(matches!(
            verify_token("other-secret", &token),
            Err(IdentityError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = mint(
            "shared-secret",
            "user_2xYz",
            (chrono::Utc::now().timestamp() - 3600) as usize,
        );
        assert!(matches!(
            verify_token("shared-secret", &token),
            Err(IdentityError::InvalidToken(_))
        ));
    }
}
