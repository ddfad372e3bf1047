use thiserror::Error;

#[derive(Error, Debug)]
pub enum CeremonyError {
    #[error("ceremony not found")]
    NotFound,

    #[error("challenge expired")]
    Expired,

    #[error("challenge already consumed")]
    AlreadyConsumed,

    #[error("ceremony superseded by a newer attempt")]
    Superseded,

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("challenge store capacity exceeded")]
    CapacityExceeded,

    #[error("retries exhausted after {0} attempts")]
    RetriesExhausted(u32),

    #[error("transport timeout: {0}")]
    TransportTimeout(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl CeremonyError {
    /// Whether this error must collapse to the generic invalid-ceremony
    /// message on the user-facing surface. The three variants are kept
    /// distinct internally for logging and race diagnosis only.
    pub fn is_invalid_ceremony(&self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::Expired | Self::AlreadyConsumed
        )
    }

    /// Transport-layer failures are the only errors a caller may retry.
    /// `VerificationFailed`, `AlreadyConsumed` and `Superseded` are final:
    /// retrying them would mask a security-relevant race.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransportTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, CeremonyError>;
