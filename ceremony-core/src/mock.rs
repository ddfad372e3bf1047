//! Mock collaborators for testing.
//!
//! WARNING: Do not use in production - the mock validator does no
//! cryptography. It only checks that the assertion echoes the ceremony's
//! challenge, which is enough to exercise every state-machine path.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::time::Duration;

use crate::ceremony::{Ceremony, CeremonyKind};
use crate::error::{CeremonyError, Result};
use crate::traits::{
    CredentialDescriptor, CredentialRepository, CredentialValidator, PreparedCeremony,
    Verification,
};

/// Mock validator: an assertion is valid iff its `challenge` field echoes
/// the challenge issued at start.
#[derive(Debug, Default)]
pub struct MockValidator {
    /// Artificial verification latency, for exercising transport timeouts.
    delay: Option<Duration>,
}

impl MockValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `verify` call by `delay`.
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay: Some(delay) }
    }

    /// Build an assertion that will pass verification for `ceremony`.
    pub fn assertion_for(ceremony: &Ceremony, credential_id: &str) -> serde_json::Value {
        serde_json::json!({
            "challenge": ceremony.challenge_b64(),
            "credential_id": credential_id,
            "subject": ceremony.subject,
        })
    }
}

#[async_trait]
impl CredentialValidator for MockValidator {
    async fn prepare(
        &self,
        kind: CeremonyKind,
        subject: Option<&str>,
        challenge: &[u8],
        allowed: &[CredentialDescriptor],
    ) -> Result<PreparedCeremony> {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
        let challenge_b64 = URL_SAFE_NO_PAD.encode(challenge);

        let public = serde_json::json!({
            "kind": kind.as_str(),
            "challenge": challenge_b64,
            "subject": subject,
            "allow_credentials": allowed.iter().map(|c| c.id.clone()).collect::<Vec<_>>(),
        });
        let state = serde_json::json!({ "challenge": challenge_b64 });

        Ok(PreparedCeremony { public, state })
    }

    async fn verify(
        &self,
        ceremony: &Ceremony,
        assertion: &serde_json::Value,
    ) -> Result<Verification> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let expected = ceremony.validator_state["challenge"]
            .as_str()
            .unwrap_or_default();
        let presented = assertion["challenge"].as_str().unwrap_or_default();
        if expected.is_empty() || presented != expected {
            return Err(CeremonyError::VerificationFailed(
                "challenge mismatch".into(),
            ));
        }

        let credential_id = assertion["credential_id"]
            .as_str()
            .unwrap_or("mock-credential")
            .to_string();
        let subject = ceremony
            .subject
            .clone()
            .or_else(|| assertion["subject"].as_str().map(str::to_string))
            .ok_or_else(|| CeremonyError::VerificationFailed("no subject identity".into()))?;

        let new_credential = match ceremony.kind {
            CeremonyKind::Registration => Some(CredentialDescriptor {
                id: credential_id.clone(),
                subject: subject.clone(),
                public_key: serde_json::json!({ "mock": true }),
                transports: vec!["internal".into()],
                created_at: Utc::now(),
            }),
            CeremonyKind::Authentication => None,
        };

        Ok(Verification {
            subject,
            credential_id,
            new_credential,
        })
    }
}

/// In-memory credential repository.
#[derive(Debug, Default)]
pub struct InMemoryCredentials {
    credentials: DashMap<String, CredentialDescriptor>,
}

impl InMemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

#[async_trait]
impl CredentialRepository for InMemoryCredentials {
    async fn save(&self, descriptor: CredentialDescriptor) -> Result<()> {
        self.credentials.insert(descriptor.id.clone(), descriptor);
        Ok(())
    }

    async fn list_for(&self, subject: &str) -> Result<Vec<CredentialDescriptor>> {
        Ok(self
            .credentials
            .iter()
            .filter(|entry| entry.value().subject == subject)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn find(&self, credential_id: &str) -> Result<Option<CredentialDescriptor>> {
        Ok(self
            .credentials
            .get(credential_id)
            .map(|entry| entry.value().clone()))
    }

    async fn revoke(&self, credential_id: &str) -> Result<()> {
        self.credentials.remove(credential_id);
        Ok(())
    }
}
