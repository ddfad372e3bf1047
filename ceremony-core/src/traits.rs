//! Collaborator seams.
//!
//! The core stays IO-free by depending on narrow traits for everything it
//! does not own: cryptographic verification, durable credential storage, and
//! payload transport. Implementations are injected by the embedding
//! application; mocks live in [`crate::mock`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ceremony::{Ceremony, CeremonyKind};
use crate::error::Result;

/// A registered credential. Created once on successful registration, read on
/// every authentication, never mutated except revocation (deletion).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialDescriptor {
    /// Credential id (base64url), as the authenticator reports it.
    pub id: String,
    pub subject: String,
    /// Opaque public-key handle owned by the validator; the core never looks
    /// inside it.
    pub public_key: serde_json::Value,
    pub transports: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Validator output for `start`: what the client needs, and what the
/// verifier needs back at `finish`.
#[derive(Debug, Clone)]
pub struct PreparedCeremony {
    /// Public ceremony options handed to the client (for WebAuthn, the
    /// options passed to `navigator.credentials`).
    pub public: serde_json::Value,
    /// Opaque verifier-side state stored in the ceremony record.
    pub state: serde_json::Value,
}

/// Successful verification of a client assertion.
#[derive(Debug, Clone)]
pub struct Verification {
    pub subject: String,
    pub credential_id: String,
    /// Newly attested credential to persist. `Some` for registration only.
    pub new_credential: Option<CredentialDescriptor>,
}

/// Cryptographic verification of attestations and assertions. The core
/// sequences the ceremony; this trait owns every byte of crypto.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    /// Build the client-facing options and verifier state for a new
    /// ceremony. `allowed` is the subject's registered credentials
    /// (authentication only; empty for registration or usernameless flows).
    async fn prepare(
        &self,
        kind: CeremonyKind,
        subject: Option<&str>,
        challenge: &[u8],
        allowed: &[CredentialDescriptor],
    ) -> Result<PreparedCeremony>;

    /// Verify the client's assertion against the ceremony's stored state.
    async fn verify(&self, ceremony: &Ceremony, assertion: &serde_json::Value)
        -> Result<Verification>;
}

/// Durable credential storage. Owned externally; the core only reads the
/// per-subject list when building an authentication challenge and saves the
/// descriptor a successful registration produced.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn save(&self, descriptor: CredentialDescriptor) -> Result<()>;
    async fn list_for(&self, subject: &str) -> Result<Vec<CredentialDescriptor>>;
    async fn find(&self, credential_id: &str) -> Result<Option<CredentialDescriptor>>;
    async fn revoke(&self, credential_id: &str) -> Result<()>;
}

/// Opaque payload transport to the client. The core depends only on
/// send/ack semantics; failures surface as `TransportTimeout` and are the
/// one error class [`crate::retry::RetryPolicy`] may absorb.
#[async_trait]
pub trait TransportCollaborator: Send + Sync {
    async fn send(&self, payload: serde_json::Value) -> Result<serde_json::Value>;
}
