//! Application state module
//!
//! Defines shared state accessible across all request handlers.

use std::sync::Arc;

use ceremony_core::{CeremonyStateMachine, ChallengeStore};

use crate::config::Config;
use crate::storage::CredentialStorage;
use crate::webauthn::{SetupError, WebauthnValidator};

/// Application state containing shared resources.
pub struct AppState {
    /// Ceremony state machine wired to the WebAuthn validator
    pub machine: CeremonyStateMachine<WebauthnValidator, CredentialStorage>,
    /// Credential storage, shared with the machine's repository seam
    pub storage: Arc<CredentialStorage>,
}

impl AppState {
    /// Build state over the given storage backend.
    pub fn with_storage(
        config: &Config,
        storage: Arc<CredentialStorage>,
    ) -> Result<Self, SetupError> {
        let validator = WebauthnValidator::from_config(config, storage.clone())?;
        let store = ChallengeStore::new(
            chrono::Duration::seconds(config.challenge_ttl_secs),
            config.challenge_capacity,
        );
        let machine = CeremonyStateMachine::with_store(
            Arc::new(validator),
            storage.clone(),
            store,
            std::time::Duration::from_secs(config.validator_timeout_secs),
        );

        Ok(Self { machine, storage })
    }

    /// Build state from the environment: PostgreSQL credential storage when
    /// `DATABASE_URL` is set, in-memory otherwise.
    pub async fn from_env(config: &Config) -> Result<Self, String> {
        let storage = CredentialStorage::from_env()
            .await
            .map_err(|e| format!("Failed to create credential storage: {e}"))?;
        Self::with_storage(config, Arc::new(storage))
            .map_err(|e| format!("Failed to create WebAuthn validator: {e}"))
    }

    /// Create with in-memory storage (for testing)
    pub fn in_memory(config: &Config) -> Result<Self, SetupError> {
        Self::with_storage(config, Arc::new(CredentialStorage::in_memory()))
    }
}
