//! Notification fabric: handshake, registries, fan-out

pub mod auth;
pub mod connection;
pub mod notifier;
pub mod registry;

pub use auth::{AuthContext, CredentialVerifier, DbRevocationCache, RevocationCache, RevocationCheck, SharedSecretVerifier};
pub use notifier::JobNotifier;
pub use registry::{ConnectionId, SubscriptionRegistry};
