//! Secret splitting for API keys.
//!
//! # Algorithm
//!
//! A secret is split into two complementary shares with a one-time pad:
//! the server share is fresh random bytes of the secret's length, and the
//! client share is the bytewise XOR of secret and server share. Either
//! share alone is uniformly random and reveals nothing about the secret;
//! XOR-ing both recovers it exactly.
//!
//! Shares are base64-encoded so they can travel in HTTP headers and be
//! stored as plain strings. The split is stateless and performs no I/O;
//! reconstruction happens transiently at proxy time and the result is
//! never persisted.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

/// Reconstruction failures. All are terminal; malformed input is never
/// retried or partially decoded.
#[derive(Debug, Error)]
pub enum SplitError {
    /// A share is not valid base64
    #[error("share is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    /// Decoded shares are not the same length
    #[error("share length mismatch: server {server} bytes, client {client} bytes")]
    LengthMismatch { server: usize, client: usize },

    /// The joined bytes are not valid UTF-8
    #[error("reconstructed secret is not valid UTF-8")]
    Utf8,
}

/// The two halves of a split secret, base64-encoded.
///
/// The client share is returned to the caller exactly once at registration
/// and never stored; only the server share is persisted.
#[derive(Debug, Clone)]
pub struct SplitSecret {
    pub client_share: String,
    pub server_share: String,
}

/// Split a secret into two complementary shares.
///
/// The server share is drawn from the OS cryptographically secure RNG, so
/// both shares are independent of the secret when observed alone.
pub fn split(secret: &[u8]) -> SplitSecret {
    let mut server = vec![0u8; secret.len()];
    OsRng.fill_bytes(&mut server);

    let client: Vec<u8> = secret
        .iter()
        .zip(server.iter())
        .map(|(s, r)| s ^ r)
        .collect();

    SplitSecret {
        client_share: BASE64.encode(&client),
        server_share: BASE64.encode(&server),
    }
}

/// Reconstruct the original secret from both shares.
///
/// Fails hard on invalid base64, on mismatched share lengths, and when the
/// joined bytes are not the UTF-8 text the secret was at split time.
pub fn reconstruct(server_share_b64: &str, client_share_b64: &str) -> Result<String, SplitError> {
    let server = Zeroizing::new(BASE64.decode(server_share_b64)?);
    let client = Zeroizing::new(BASE64.decode(client_share_b64)?);

    if server.len() != client.len() {
        return Err(SplitError::LengthMismatch {
            server: server.len(),
            client: client.len(),
        });
    }

    let joined: Zeroizing<Vec<u8>> = Zeroizing::new(
        server
            .iter()
            .zip(client.iter())
            .map(|(s, c)| s ^ c)
            .collect(),
    );

    String::from_utf8(joined.to_vec()).map_err(|_| SplitError::Utf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let secret = "sk_live_abc";
        let shares = split(secret.as_bytes());
        let recovered = reconstruct(&shares.server_share, &shares.client_share).unwrap();
        assert_eq!(recovered, secret);
    }

    #[test]
    fn test_round_trip_utf8() {
        let secret = "clé-secrète-日本語-🔑";
        let shares = split(secret.as_bytes());
        let recovered = reconstruct(&shares.server_share, &shares.client_share).unwrap();
        assert_eq!(recovered, secret);
    }

    #[test]
    fn test_shares_have_secret_length() {
        let secret = b"0123456789abcdef";
        let shares = split(secret);
        assert_eq!(BASE64.decode(&shares.server_share).unwrap().len(), secret.len());
        assert_eq!(BASE64.decode(&shares.client_share).unwrap().len(), secret.len());
    }

    #[test]
    fn test_splits_are_unique() {
        let secret = b"same secret, different pads";
        let a = split(secret);
        let b = split(secret);
        assert_ne!(a.server_share, b.server_share);
        assert_ne!(a.client_share, b.client_share);
    }

    #[test]
    fn test_share_distribution_is_uniform() {
        // A single share must look like noise regardless of the secret.
        // Over 8 KiB of shares the mean byte value sits near 127.5; a wide
        // tolerance keeps this deterministic in practice (>19 sigma).
        let secret = vec![b'A'; 8192];
        let shares = split(&secret);

        for share in [&shares.server_share, &shares.client_share] {
            let bytes = BASE64.decode(share).unwrap();
            let mean = bytes.iter().map(|&b| b as f64).sum::<f64>() / bytes.len() as f64;
            assert!(
                (110.0..146.0).contains(&mean),
                "share mean {mean} outside uniform range"
            );
            let distinct = bytes.iter().collect::<std::collections::HashSet<_>>().len();
            assert!(distinct > 100, "share has only {distinct} distinct byte values");
        }
    }

    #[test]
    fn test_invalid_base64_rejected() {
        let shares = split(b"secret");
        let err = reconstruct("not~~base64", &shares.client_share).unwrap_err();
        assert!(matches!(err, SplitError::Decode(_)));

        let err = reconstruct(&shares.server_share, "!!!").unwrap_err();
        assert!(matches!(err, SplitError::Decode(_)));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let shares = split(b"a much longer secret value");
        let short = BASE64.encode(b"abc");
        let err = reconstruct(&shares.server_share, &short).unwrap_err();
        assert!(matches!(err, SplitError::LengthMismatch { .. }));
    }

    #[test]
    fn test_non_utf8_reconstruction_rejected() {
        // Shares that XOR to 0xFF bytes cannot be a UTF-8 secret
        let server = BASE64.encode([0x00u8, 0x00]);
        let client = BASE64.encode([0xFFu8, 0xFE]);
        let err = reconstruct(&server, &client).unwrap_err();
        assert!(matches!(err, SplitError::Utf8));
    }
}
