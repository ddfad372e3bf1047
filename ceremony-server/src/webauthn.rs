//! WebAuthn credential validator
//!
//! Implements the core's `CredentialValidator` seam with `webauthn-rs`. The
//! verifier-side state (`PasskeyRegistration` / `PasskeyAuthentication`) is
//! serialized into the ceremony record at start and restored at finish,
//! which is what the `danger-allow-state-serialisation` feature is for.
//!
//! Usernameless authentication uses the discoverable-credential flow: the
//! authenticator names the credential, and we resolve it from storage.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use std::sync::Arc;
use url::Url;
use webauthn_rs::prelude::*;

use ceremony_core::{
    Ceremony, CeremonyError, CeremonyKind, CredentialDescriptor, CredentialValidator,
    PreparedCeremony, Verification,
};

use crate::config::Config;
use crate::storage::CredentialStorage;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Invalid origin URL: {0}")]
    InvalidOrigin(String),
    #[error("WebAuthn error: {0:?}")]
    Webauthn(WebauthnError),
}

/// WebAuthn-backed credential validator
pub struct WebauthnValidator {
    webauthn: Webauthn,
    storage: Arc<CredentialStorage>,
}

impl WebauthnValidator {
    /// Create a validator for the given Relying Party identity.
    pub fn new(
        rp_id: &str,
        rp_origin: &Url,
        rp_name: &str,
        storage: Arc<CredentialStorage>,
    ) -> Result<Self, SetupError> {
        let webauthn = WebauthnBuilder::new(rp_id, rp_origin)
            .map_err(SetupError::Webauthn)?
            .rp_name(rp_name)
            .allow_subdomains(false)
            .build()
            .map_err(SetupError::Webauthn)?;

        Ok(Self { webauthn, storage })
    }

    /// Create a validator from server configuration.
    pub fn from_config(
        config: &Config,
        storage: Arc<CredentialStorage>,
    ) -> Result<Self, SetupError> {
        let origin = Url::parse(&config.rp_origin)
            .map_err(|e| SetupError::InvalidOrigin(e.to_string()))?;
        Self::new(&config.rp_id, &origin, &config.rp_name, storage)
    }

    fn passkey_of(descriptor: &CredentialDescriptor) -> Result<Passkey, CeremonyError> {
        serde_json::from_value(descriptor.public_key.clone())
            .map_err(|e| CeremonyError::Storage(format!("corrupt passkey handle: {e}")))
    }

    /// Persist the rotated passkey handle and sign counter after a
    /// successful authentication.
    async fn record_authentication(
        &self,
        credential_id: &str,
        mut passkey: Passkey,
        result: &AuthenticationResult,
    ) -> Result<(), CeremonyError> {
        passkey.update_credential(result);
        let handle = serde_json::to_value(&passkey)
            .map_err(|e| CeremonyError::Storage(format!("serialize passkey: {e}")))?;

        let updated = self
            .storage
            .update_passkey(credential_id, &handle, result.counter())
            .await
            .map_err(CeremonyError::from)?;
        if !updated {
            // Revoked while the ceremony was in flight
            return Err(CeremonyError::VerificationFailed(
                "credential no longer registered".into(),
            ));
        }
        Ok(())
    }

    async fn verify_registration(
        &self,
        ceremony: &Ceremony,
        assertion: &serde_json::Value,
    ) -> Result<Verification, CeremonyError> {
        let subject = ceremony.subject.clone().ok_or_else(|| {
            CeremonyError::VerificationFailed("registration requires a subject".into())
        })?;

        let credential: RegisterPublicKeyCredential = serde_json::from_value(assertion.clone())
            .map_err(|e| CeremonyError::VerificationFailed(format!("malformed credential: {e}")))?;
        let state: PasskeyRegistration =
            serde_json::from_value(ceremony.validator_state["registration"].clone())
                .map_err(|e| CeremonyError::Storage(format!("corrupt ceremony state: {e}")))?;

        let passkey = self
            .webauthn
            .finish_passkey_registration(&credential, &state)
            .map_err(|e| CeremonyError::VerificationFailed(format!("{e:?}")))?;

        let credential_id = URL_SAFE_NO_PAD.encode(passkey.cred_id());
        let public_key = serde_json::to_value(&passkey)
            .map_err(|e| CeremonyError::Storage(format!("serialize passkey: {e}")))?;

        Ok(Verification {
            subject: subject.clone(),
            credential_id: credential_id.clone(),
            new_credential: Some(CredentialDescriptor {
                id: credential_id,
                subject,
                public_key,
                transports: Vec::new(),
                created_at: Utc::now(),
            }),
        })
    }

    async fn verify_authentication(
        &self,
        ceremony: &Ceremony,
        assertion: &serde_json::Value,
    ) -> Result<Verification, CeremonyError> {
        let credential: PublicKeyCredential = serde_json::from_value(assertion.clone())
            .map_err(|e| CeremonyError::VerificationFailed(format!("malformed assertion: {e}")))?;

        if let Some(state) = ceremony.validator_state.get("authentication") {
            // Known-subject flow: the allow-list was fixed at start.
            let state: PasskeyAuthentication = serde_json::from_value(state.clone())
                .map_err(|e| CeremonyError::Storage(format!("corrupt ceremony state: {e}")))?;

            let result = self
                .webauthn
                .finish_passkey_authentication(&credential, &state)
                .map_err(|e| CeremonyError::VerificationFailed(format!("{e:?}")))?;

            let credential_id = URL_SAFE_NO_PAD.encode(result.cred_id());
            let descriptor = self
                .storage
                .get(&credential_id)
                .await
                .map_err(CeremonyError::from)?
                .ok_or_else(|| {
                    CeremonyError::VerificationFailed("credential no longer registered".into())
                })?
                .descriptor;

            let passkey = Self::passkey_of(&descriptor)?;
            self.record_authentication(&credential_id, passkey, &result)
                .await?;

            Ok(Verification {
                subject: descriptor.subject,
                credential_id,
                new_credential: None,
            })
        } else {
            // Usernameless flow: the authenticator names the credential.
            let state: DiscoverableAuthentication =
                serde_json::from_value(ceremony.validator_state["discoverable"].clone())
                    .map_err(|e| CeremonyError::Storage(format!("corrupt ceremony state: {e}")))?;

            let (_user_id, cred_id) = self
                .webauthn
                .identify_discoverable_authentication(&credential)
                .map_err(|e| CeremonyError::VerificationFailed(format!("{e:?}")))?;
            let credential_id = URL_SAFE_NO_PAD.encode(cred_id);

            let descriptor = self
                .storage
                .get(&credential_id)
                .await
                .map_err(CeremonyError::from)?
                .ok_or_else(|| {
                    CeremonyError::VerificationFailed("unknown discoverable credential".into())
                })?
                .descriptor;
            let passkey = Self::passkey_of(&descriptor)?;

            let result = self
                .webauthn
                .finish_discoverable_authentication(
                    &credential,
                    state,
                    &[DiscoverableKey::from(&passkey)],
                )
                .map_err(|e| CeremonyError::VerificationFailed(format!("{e:?}")))?;

            self.record_authentication(&credential_id, passkey, &result)
                .await?;

            Ok(Verification {
                subject: descriptor.subject,
                credential_id,
                new_credential: None,
            })
        }
    }
}

#[async_trait]
impl CredentialValidator for WebauthnValidator {
    async fn prepare(
        &self,
        kind: CeremonyKind,
        subject: Option<&str>,
        _challenge: &[u8],
        allowed: &[CredentialDescriptor],
    ) -> ceremony_core::Result<PreparedCeremony> {
        match (kind, subject) {
            (CeremonyKind::Registration, Some(subject)) => {
                let user_id = Uuid::new_v4();
                let (ccr, state) = self
                    .webauthn
                    .start_passkey_registration(user_id, subject, subject, None)
                    .map_err(|e| CeremonyError::Storage(format!("webauthn: {e:?}")))?;

                Ok(PreparedCeremony {
                    public: serde_json::to_value(&ccr)
                        .map_err(|e| CeremonyError::Storage(e.to_string()))?,
                    state: serde_json::json!({
                        "registration": serde_json::to_value(&state)
                            .map_err(|e| CeremonyError::Storage(e.to_string()))?,
                    }),
                })
            }
            (CeremonyKind::Registration, None) => Err(CeremonyError::VerificationFailed(
                "registration requires a subject".into(),
            )),
            (CeremonyKind::Authentication, Some(_)) => {
                let passkeys: Vec<Passkey> = allowed
                    .iter()
                    .map(Self::passkey_of)
                    .collect::<Result<_, _>>()?;
                if passkeys.is_empty() {
                    return Err(CeremonyError::VerificationFailed(
                        "no credentials registered for subject".into(),
                    ));
                }

                let (rcr, state) = self
                    .webauthn
                    .start_passkey_authentication(&passkeys)
                    .map_err(|e| CeremonyError::Storage(format!("webauthn: {e:?}")))?;

                Ok(PreparedCeremony {
                    public: serde_json::to_value(&rcr)
                        .map_err(|e| CeremonyError::Storage(e.to_string()))?,
                    state: serde_json::json!({
                        "authentication": serde_json::to_value(&state)
                            .map_err(|e| CeremonyError::Storage(e.to_string()))?,
                    }),
                })
            }
            (CeremonyKind::Authentication, None) => {
                let (rcr, state) = self
                    .webauthn
                    .start_discoverable_authentication()
                    .map_err(|e| CeremonyError::Storage(format!("webauthn: {e:?}")))?;

                Ok(PreparedCeremony {
                    public: serde_json::to_value(&rcr)
                        .map_err(|e| CeremonyError::Storage(e.to_string()))?,
                    state: serde_json::json!({
                        "discoverable": serde_json::to_value(&state)
                            .map_err(|e| CeremonyError::Storage(e.to_string()))?,
                    }),
                })
            }
        }
    }

    async fn verify(
        &self,
        ceremony: &Ceremony,
        assertion: &serde_json::Value,
    ) -> ceremony_core::Result<Verification> {
        match ceremony.kind {
            CeremonyKind::Registration => self.verify_registration(ceremony, assertion).await,
            CeremonyKind::Authentication => self.verify_authentication(ceremony, assertion).await,
        }
    }
}

impl std::fmt::Debug for WebauthnValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebauthnValidator")
            .field("webauthn", &"<Webauthn instance>")
            .finish()
    }
}
