//! Ceremony state machine.
//!
//! Drives a single registration or authentication ceremony:
//! `AwaitingClientResponse → Validating → {Completed | Failed}`. The
//! challenge is consumed (single use) before any cryptographic work, so a
//! replayed finish never reaches the validator; supersession is re-checked
//! after verification, so a late success on a superseded ceremony is
//! discarded rather than applied.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::ceremony::{CeremonyKind, CeremonyOutcome, CeremonyState, ChallengePayload};
use crate::coordinator::AttemptCoordinator;
use crate::error::{CeremonyError, Result};
use crate::store::ChallengeStore;
use crate::traits::{CredentialRepository, CredentialValidator};

/// Cap on a single validator call.
pub const DEFAULT_VALIDATOR_TIMEOUT: Duration = Duration::from_secs(15);

pub struct CeremonyStateMachine<V, R> {
    store: ChallengeStore,
    coordinator: AttemptCoordinator,
    validator: Arc<V>,
    repository: Arc<R>,
    validator_timeout: Duration,
}

impl<V, R> CeremonyStateMachine<V, R>
where
    V: CredentialValidator,
    R: CredentialRepository,
{
    pub fn new(validator: Arc<V>, repository: Arc<R>) -> Self {
        Self::with_store(
            validator,
            repository,
            ChallengeStore::default(),
            DEFAULT_VALIDATOR_TIMEOUT,
        )
    }

    pub fn with_store(
        validator: Arc<V>,
        repository: Arc<R>,
        store: ChallengeStore,
        validator_timeout: Duration,
    ) -> Self {
        Self {
            store,
            coordinator: AttemptCoordinator::new(),
            validator,
            repository,
            validator_timeout,
        }
    }

    /// Start a ceremony: supersede any in-flight attempt for the subject,
    /// issue a single-use challenge, and return the payload the client needs
    /// to run the cryptographic ceremony.
    pub async fn start(
        &self,
        kind: CeremonyKind,
        subject: Option<&str>,
    ) -> Result<ChallengePayload> {
        let allowed = match (kind, subject) {
            (CeremonyKind::Authentication, Some(subject)) => {
                self.repository.list_for(subject).await?
            }
            _ => Vec::new(),
        };

        let attempt = self.coordinator.acquire(subject, kind);
        let ceremony = self
            .store
            .create(kind, subject, attempt.clone(), Utc::now())
            .inspect_err(|_| self.coordinator.release(&attempt))?;

        let prepared = match self
            .validator
            .prepare(kind, subject, &ceremony.challenge, &allowed)
            .await
            .and_then(|prepared| {
                self.store
                    .set_validator_state(&ceremony.id, prepared.state.clone())?;
                Ok(prepared)
            }) {
            Ok(prepared) => prepared,
            Err(error) => {
                self.store.discard(&ceremony.id);
                self.coordinator.release(&attempt);
                return Err(error);
            }
        };

        tracing::info!(
            ceremony_id = %ceremony.id,
            kind = kind.as_str(),
            "Ceremony started"
        );

        let challenge = ceremony.challenge_b64();
        Ok(ChallengePayload {
            ceremony_id: ceremony.id,
            challenge,
            public: prepared.public,
            expires_at: ceremony.expires_at,
        })
    }

    /// Finish a ceremony with the client's assertion.
    ///
    /// Ordering is the security core: consume first (replay barrier), then
    /// supersession check, then cryptographic verification, then a second
    /// supersession check before anything is persisted.
    pub async fn finish(
        &self,
        ceremony_id: &str,
        assertion: &serde_json::Value,
    ) -> Result<CeremonyOutcome> {
        let mut ceremony = self.store.consume(ceremony_id, Utc::now())?;

        if !self.coordinator.is_current(&ceremony.attempt) {
            tracing::warn!(ceremony_id = %ceremony.id, "Finish on a superseded ceremony");
            return Err(CeremonyError::Superseded);
        }

        ceremony.state = CeremonyState::Validating;

        let verification = match tokio::time::timeout(
            self.validator_timeout,
            self.validator.verify(&ceremony, assertion),
        )
        .await
        {
            Ok(Ok(verification)) => verification,
            Ok(Err(error)) => {
                self.fail(&mut ceremony);
                return Err(error);
            }
            Err(_) => {
                self.fail(&mut ceremony);
                return Err(CeremonyError::TransportTimeout(
                    "credential validator timed out".into(),
                ));
            }
        };

        // A supersession that landed while verification was in flight wins:
        // the late success is discarded, not applied.
        if !self.coordinator.is_current(&ceremony.attempt) {
            tracing::warn!(
                ceremony_id = %ceremony.id,
                "Verification finished after supersession, discarding"
            );
            ceremony.state = CeremonyState::Failed;
            return Err(CeremonyError::Superseded);
        }

        if let Some(descriptor) = &verification.new_credential {
            if let Err(error) = self.repository.save(descriptor.clone()).await {
                self.fail(&mut ceremony);
                return Err(error);
            }
        }

        ceremony.state = CeremonyState::Completed;
        self.coordinator.release(&ceremony.attempt);

        tracing::info!(
            ceremony_id = %ceremony.id,
            kind = ceremony.kind.as_str(),
            subject = %verification.subject,
            "Ceremony completed"
        );

        Ok(CeremonyOutcome {
            kind: ceremony.kind,
            subject: verification.subject,
            credential_id: verification.credential_id,
        })
    }

    fn fail(&self, ceremony: &mut crate::ceremony::Ceremony) {
        ceremony.state = CeremonyState::Failed;
        self.coordinator.release(&ceremony.attempt);
    }

    /// Remove expired ceremonies and release their coordinator slots,
    /// including slots orphaned by expired consumes. Returns how many
    /// records were swept.
    pub fn sweep_expired(&self) -> usize {
        let removed = self.store.expire_sweep(Utc::now());
        for ceremony in &removed {
            self.coordinator.release(&ceremony.attempt);
        }
        for token in self.store.take_orphaned_attempts() {
            self.coordinator.release(&token);
        }
        removed.len()
    }

    pub fn pending_count(&self) -> usize {
        self.store.pending_count()
    }

    pub fn live_attempts(&self) -> usize {
        self.coordinator.live_slots()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{InMemoryCredentials, MockValidator};
    use chrono::Duration as ChronoDuration;

    type Machine = CeremonyStateMachine<MockValidator, InMemoryCredentials>;

    fn machine() -> (Machine, Arc<InMemoryCredentials>) {
        let repository = Arc::new(InMemoryCredentials::new());
        let machine = CeremonyStateMachine::new(Arc::new(MockValidator::new()), repository.clone());
        (machine, repository)
    }

    fn assertion(payload: &ChallengePayload, credential_id: &str) -> serde_json::Value {
        serde_json::json!({
            "challenge": payload.challenge,
            "credential_id": credential_id,
        })
    }

    #[tokio::test]
    async fn test_registration_roundtrip_persists_credential() {
        let (machine, repository) = machine();

        let payload = machine
            .start(CeremonyKind::Registration, Some("alice"))
            .await
            .unwrap();
        let outcome = machine
            .finish(&payload.ceremony_id, &assertion(&payload, "cred-1"))
            .await
            .unwrap();

        assert_eq!(outcome.subject, "alice");
        assert_eq!(outcome.credential_id, "cred-1");
        assert_eq!(repository.len(), 1);
        assert_eq!(machine.pending_count(), 0);
        assert_eq!(machine.live_attempts(), 0);
    }

    #[tokio::test]
    async fn test_authentication_lists_allowed_credentials() {
        let (machine, repository) = machine();
        repository
            .save(crate::traits::CredentialDescriptor {
                id: "cred-1".into(),
                subject: "alice".into(),
                public_key: serde_json::json!({}),
                transports: vec![],
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let payload = machine
            .start(CeremonyKind::Authentication, Some("alice"))
            .await
            .unwrap();
        assert_eq!(payload.public["allow_credentials"][0], "cred-1");

        let outcome = machine
            .finish(&payload.ceremony_id, &assertion(&payload, "cred-1"))
            .await
            .unwrap();
        assert_eq!(outcome.subject, "alice");
        // Authentication never creates credentials
        assert_eq!(repository.len(), 1);
    }

    #[tokio::test]
    async fn test_finish_twice_reports_invalid_ceremony() {
        let (machine, _) = machine();

        let payload = machine
            .start(CeremonyKind::Authentication, Some("alice"))
            .await
            .unwrap();
        let good = assertion(&payload, "cred-1");

        machine.finish(&payload.ceremony_id, &good).await.unwrap();
        let err = machine
            .finish(&payload.ceremony_id, &good)
            .await
            .unwrap_err();
        assert!(err.is_invalid_ceremony());
    }

    #[tokio::test]
    async fn test_tampered_assertion_consumes_challenge() {
        let (machine, repository) = machine();

        let payload = machine
            .start(CeremonyKind::Authentication, Some("alice"))
            .await
            .unwrap();
        let tampered = serde_json::json!({
            "challenge": "dGFtcGVyZWQ",
            "credential_id": "cred-1",
        });

        let err = machine
            .finish(&payload.ceremony_id, &tampered)
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::VerificationFailed(_)));
        assert!(repository.is_empty());

        // The challenge was consumed before verification, so a repeat finish
        // collapses to the generic invalid-ceremony failure.
        let err = machine
            .finish(&payload.ceremony_id, &assertion(&payload, "cred-1"))
            .await
            .unwrap_err();
        assert!(err.is_invalid_ceremony());
    }

    #[tokio::test]
    async fn test_second_start_supersedes_first() {
        let (machine, repository) = machine();

        let first = machine
            .start(CeremonyKind::Registration, Some("alice"))
            .await
            .unwrap();
        let second = machine
            .start(CeremonyKind::Registration, Some("alice"))
            .await
            .unwrap();

        let err = machine
            .finish(&first.ceremony_id, &assertion(&first, "cred-old"))
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::Superseded));
        assert!(repository.is_empty(), "superseded attempt must not persist");

        let outcome = machine
            .finish(&second.ceremony_id, &assertion(&second, "cred-new"))
            .await
            .unwrap();
        assert_eq!(outcome.credential_id, "cred-new");
        assert_eq!(repository.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_ceremony_fails_finish() {
        let repository = Arc::new(InMemoryCredentials::new());
        let machine = CeremonyStateMachine::with_store(
            Arc::new(MockValidator::new()),
            repository,
            ChallengeStore::new(ChronoDuration::milliseconds(20), 64),
            DEFAULT_VALIDATOR_TIMEOUT,
        );

        let payload = machine
            .start(CeremonyKind::Registration, Some("alice"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let err = machine
            .finish(&payload.ceremony_id, &assertion(&payload, "cred-1"))
            .await
            .unwrap_err();
        assert!(err.is_invalid_ceremony());
        assert_eq!(machine.pending_count(), 0);

        // The record was removed by consume; the sweep still reclaims the
        // orphaned attempt slot.
        machine.sweep_expired();
        assert_eq!(machine.live_attempts(), 0);
    }

    #[tokio::test]
    async fn test_sweep_releases_coordinator_slots() {
        let repository = Arc::new(InMemoryCredentials::new());
        let machine = CeremonyStateMachine::with_store(
            Arc::new(MockValidator::new()),
            repository,
            ChallengeStore::new(ChronoDuration::milliseconds(20), 64),
            DEFAULT_VALIDATOR_TIMEOUT,
        );

        machine
            .start(CeremonyKind::Registration, Some("alice"))
            .await
            .unwrap();
        assert_eq!(machine.live_attempts(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(machine.sweep_expired(), 1);
        assert_eq!(machine.pending_count(), 0);
        assert_eq!(machine.live_attempts(), 0);
    }

    #[tokio::test]
    async fn test_slow_validator_surfaces_transport_timeout() {
        let repository = Arc::new(InMemoryCredentials::new());
        let machine = CeremonyStateMachine::with_store(
            Arc::new(MockValidator::with_delay(Duration::from_millis(100))),
            repository.clone(),
            ChallengeStore::default(),
            Duration::from_millis(10),
        );

        let payload = machine
            .start(CeremonyKind::Registration, Some("alice"))
            .await
            .unwrap();
        let err = machine
            .finish(&payload.ceremony_id, &assertion(&payload, "cred-1"))
            .await
            .unwrap_err();

        assert!(matches!(err, CeremonyError::TransportTimeout(_)));
        assert!(repository.is_empty());
        assert_eq!(machine.live_attempts(), 0);
    }

    #[tokio::test]
    async fn test_usernameless_authentication() {
        let (machine, _) = machine();

        let payload = machine
            .start(CeremonyKind::Authentication, None)
            .await
            .unwrap();
        let outcome = machine
            .finish(
                &payload.ceremony_id,
                &serde_json::json!({
                    "challenge": payload.challenge,
                    "credential_id": "cred-1",
                    "subject": "alice",
                }),
            )
            .await
            .unwrap();

        assert_eq!(outcome.subject, "alice");
    }
}
