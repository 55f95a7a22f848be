//! Credential token verification
//!
//! Tokens are issued elsewhere; this module only verifies them. A token is
//! `identity.expires.signature` where `expires` is a Unix timestamp in
//! seconds and `signature` is the SHA-256 of `identity.expires` plus the
//! shared secret, as 64 hex characters.
//!
//! Pure functions only; no HTTP framework dependencies here.

use sha2::{Digest, Sha256};

/// Authentication failure reasons
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Token does not have the `identity.expires.signature` shape
    Malformed,
    /// Token expiry is in the past
    Expired { expired_at: i64 },
    /// Signature does not match the calculated value
    InvalidSignature,
    /// Token has been revoked before its natural expiry
    Revoked,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Malformed => write!(f, "malformed credential token"),
            AuthError::Expired { expired_at } => {
                write!(f, "credential token expired at {}", expired_at)
            }
            AuthError::InvalidSignature => write!(f, "invalid credential signature"),
            AuthError::Revoked => write!(f, "credential token revoked"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Calculate the token signature for an identity/expiry pair
///
/// SHA-256 over `identity.expires` with the shared secret appended as a
/// decimal string, rendered as 64 hex characters.
pub fn calculate_signature(identity: &str, expires: i64, shared_secret: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}.{}{}", identity, expires, shared_secret).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Assemble a signed token (used by tests and by operators minting
/// development credentials; production issuance is out of scope)
pub fn sign_token(identity: &str, expires: i64, shared_secret: i64) -> String {
    format!(
        "{}.{}.{}",
        identity,
        expires,
        calculate_signature(identity, expires, shared_secret)
    )
}

/// SHA-256 fingerprint of a whole token, the revocation-cache key (the
/// cache never stores raw credentials)
pub fn token_fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Verify a token's shape, signature, and expiry against `now` (Unix
/// seconds). Returns the embedded identity on success.
///
/// Revocation is a separate check with its own availability semantics; see
/// the server's revocation cache.
pub fn verify_token(token: &str, shared_secret: i64, now: i64) -> Result<String, AuthError> {
    // Split from the right so identities may themselves contain dots
    let mut parts = token.rsplitn(3, '.');
    let signature = parts.next().ok_or(AuthError::Malformed)?;
    let expires_str = parts.next().ok_or(AuthError::Malformed)?;
    let identity = parts.next().ok_or(AuthError::Malformed)?;

    if identity.is_empty() || signature.len() != 64 {
        return Err(AuthError::Malformed);
    }

    let expires: i64 = expires_str.parse().map_err(|_| AuthError::Malformed)?;

    let calculated = calculate_signature(identity, expires, shared_secret);
    if signature != calculated {
        return Err(AuthError::InvalidSignature);
    }

    if expires <= now {
        return Err(AuthError::Expired {
            expired_at: expires,
        });
    }

    Ok(identity.to_string())
}
