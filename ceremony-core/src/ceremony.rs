//! Ceremony entity and its lifecycle types.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coordinator::AttemptToken;

/// Challenge length in bytes. The WebAuthn spec floor is 16; we match the
/// 32-byte challenges the rest of the ecosystem issues.
pub const CHALLENGE_LEN: usize = 32;

/// Which ceremony a challenge was issued for. A challenge issued for one
/// kind is never valid for the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CeremonyKind {
    Registration,
    Authentication,
}

impl CeremonyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Authentication => "authentication",
        }
    }
}

/// Ceremony lifecycle states.
///
/// `AwaitingClientResponse` covers creation through challenge hand-out (the
/// challenge is returned in the same call that creates it). `Completed` and
/// `Failed` are terminal; there is no transition out of either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CeremonyState {
    AwaitingClientResponse,
    Validating,
    Completed,
    Failed,
}

impl CeremonyState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A single registration or authentication ceremony, from challenge issuance
/// to verification. Owned by the `ChallengeStore` while pending; mutated only
/// by the state machine.
#[derive(Debug, Clone)]
pub struct Ceremony {
    /// Opaque ceremony id (UUIDv4), handed to the client to correlate finish.
    pub id: String,
    pub kind: CeremonyKind,
    /// Subject the ceremony is for. `None` for usernameless authentication.
    pub subject: Option<String>,
    /// Single-use random challenge bytes.
    pub challenge: Vec<u8>,
    pub state: CeremonyState,
    /// Opaque verifier-side state produced by the validator at `start` and
    /// required back at `finish`.
    pub validator_state: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Coordinator slot ownership for this attempt.
    pub attempt: AttemptToken,
}

impl Ceremony {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Challenge bytes as base64url, the encoding the client sees.
    pub fn challenge_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.challenge)
    }
}

/// What `start` hands back to the transport: everything the client needs to
/// run the cryptographic ceremony externally.
#[derive(Debug, Clone, Serialize)]
pub struct ChallengePayload {
    pub ceremony_id: String,
    /// base64url challenge bytes.
    pub challenge: String,
    /// Validator-specific public options (for WebAuthn: the credential
    /// creation / request options passed to `navigator.credentials`).
    pub public: serde_json::Value,
    pub expires_at: DateTime<Utc>,
}

/// Result of a successfully finished ceremony.
#[derive(Debug, Clone, Serialize)]
pub struct CeremonyOutcome {
    pub kind: CeremonyKind,
    /// Verified subject identity.
    pub subject: String,
    /// Credential that was created (registration) or asserted
    /// (authentication).
    pub credential_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ceremony(expires_in: i64) -> Ceremony {
        let now = Utc::now();
        Ceremony {
            id: "c1".into(),
            kind: CeremonyKind::Registration,
            subject: Some("alice".into()),
            challenge: vec![0xab; CHALLENGE_LEN],
            state: CeremonyState::AwaitingClientResponse,
            validator_state: serde_json::Value::Null,
            created_at: now,
            expires_at: now + Duration::seconds(expires_in),
            attempt: AttemptToken::detached(),
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(CeremonyState::Completed.is_terminal());
        assert!(CeremonyState::Failed.is_terminal());
        assert!(!CeremonyState::AwaitingClientResponse.is_terminal());
        assert!(!CeremonyState::Validating.is_terminal());
    }

    #[test]
    fn test_expiry_is_strict() {
        let c = ceremony(120);
        assert!(!c.is_expired(Utc::now()));
        assert!(c.is_expired(c.expires_at + Duration::seconds(1)));
        // Exactly at the deadline is still valid
        assert!(!c.is_expired(c.expires_at));
    }

    #[test]
    fn test_challenge_b64_roundtrip() {
        let c = ceremony(120);
        let decoded = URL_SAFE_NO_PAD.decode(c.challenge_b64()).unwrap();
        assert_eq!(decoded, c.challenge);
    }
}
