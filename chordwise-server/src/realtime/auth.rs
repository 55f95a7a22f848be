//! Handshake authentication
//!
//! The credential verifier and revocation cache are collaborators with
//! in-scope interfaces. The revocation check returns a typed three-way
//! result so the handshake chooses the fail-open fallback consciously:
//! an unavailable cache admits the connection (availability over strict
//! revocation enforcement) and logs the degradation.

use async_trait::async_trait;
use chordwise_common::api::auth::{token_fingerprint, verify_token, AuthError};
use chordwise_common::{Error, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

/// Validates a signed credential token
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> std::result::Result<String, AuthError>;
}

/// Verifier backed by the configured shared secret
pub struct SharedSecretVerifier {
    shared_secret: i64,
}

impl SharedSecretVerifier {
    pub fn new(shared_secret: i64) -> Self {
        Self { shared_secret }
    }
}

#[async_trait]
impl CredentialVerifier for SharedSecretVerifier {
    async fn verify(&self, token: &str) -> std::result::Result<String, AuthError> {
        verify_token(token, self.shared_secret, Utc::now().timestamp())
    }
}

/// Typed revocation lookup result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationCheck {
    /// Token is not revoked
    Clear,
    /// Token was invalidated before its natural expiry
    Revoked,
    /// The cache itself could not answer
    Unavailable,
}

/// Revocation cache collaborator
#[async_trait]
pub trait RevocationCache: Send + Sync {
    async fn check(&self, token: &str) -> RevocationCheck;
}

/// Revocation cache over the revoked_tokens table
pub struct DbRevocationCache {
    db: SqlitePool,
}

impl DbRevocationCache {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Record a revocation (operator tooling and tests)
    pub async fn revoke(&self, token: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO revoked_tokens (token_fingerprint, revoked_at) VALUES (?, ?)",
        )
        .bind(token_fingerprint(token))
        .bind(Utc::now())
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RevocationCache for DbRevocationCache {
    async fn check(&self, token: &str) -> RevocationCheck {
        let row: std::result::Result<Option<(i64,)>, sqlx::Error> =
            sqlx::query_as("SELECT 1 FROM revoked_tokens WHERE token_fingerprint = ?")
                .bind(token_fingerprint(token))
                .fetch_optional(&self.db)
                .await;

        match row {
            Ok(Some(_)) => RevocationCheck::Revoked,
            Ok(None) => RevocationCheck::Clear,
            Err(e) => {
                tracing::warn!(error = %e, "Revocation cache lookup failed");
                RevocationCheck::Unavailable
            }
        }
    }
}

/// Handshake authentication context
pub struct AuthContext {
    verifier: Arc<dyn CredentialVerifier>,
    revocation: Arc<dyn RevocationCache>,
    handshake_timeout: Duration,
}

impl AuthContext {
    pub fn new(
        verifier: Arc<dyn CredentialVerifier>,
        revocation: Arc<dyn RevocationCache>,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            verifier,
            revocation,
            handshake_timeout,
        }
    }

    /// Authenticate a handshake token within a bounded time.
    ///
    /// Missing/invalid/expired/revoked tokens refuse the connection before
    /// any subscription state exists. A slow credential check fails fast
    /// rather than hanging the handshake. An unavailable revocation cache
    /// fails open.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<String> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Authentication("missing credential token".to_string()))?;

        let identity = tokio::time::timeout(self.handshake_timeout, self.verifier.verify(token))
            .await
            .map_err(|_| Error::Authentication("credential check timed out".to_string()))?
            .map_err(|e| Error::Authentication(e.to_string()))?;

        let check = tokio::time::timeout(self.handshake_timeout, self.revocation.check(token))
            .await
            .unwrap_or(RevocationCheck::Unavailable);

        match check {
            RevocationCheck::Revoked => {
                Err(Error::Authentication(AuthError::Revoked.to_string()))
            }
            RevocationCheck::Clear => Ok(identity),
            RevocationCheck::Unavailable => {
                tracing::warn!(
                    identity = %identity,
                    "Revocation cache unavailable; admitting connection unchecked"
                );
                Ok(identity)
            }
        }
    }
}
