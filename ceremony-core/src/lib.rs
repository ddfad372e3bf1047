//! Ceremony Core - credential ceremony state machine and challenge lifecycle
//!
//! This crate provides the server-side core that makes passkey registration
//! and authentication flows secure: single-use challenge issuance, ceremony
//! state transitions, per-subject attempt supersession, and bounded retry for
//! transport failures. Cryptographic verification and durable credential
//! storage are external collaborators injected through narrow traits.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ceremony_core::{CeremonyKind, CeremonyStateMachine, InMemoryCredentials, MockValidator};
//!
//! # async fn example() -> ceremony_core::Result<()> {
//! // Use the mock validator for testing (in production, a WebAuthn adapter)
//! let machine = CeremonyStateMachine::new(
//!     Arc::new(MockValidator::new()),
//!     Arc::new(InMemoryCredentials::new()),
//! );
//!
//! // Hand the challenge payload to the client...
//! let payload = machine.start(CeremonyKind::Registration, Some("alice")).await?;
//!
//! // ...and finish with the assertion it produced.
//! let assertion = serde_json::json!({ "challenge": payload.challenge });
//! let outcome = machine.finish(&payload.ceremony_id, &assertion).await?;
//! # Ok(())
//! # }
//! ```

pub mod ceremony;
pub mod coordinator;
pub mod error;
pub mod machine;
pub mod mock;
pub mod retry;
pub mod store;
pub mod traits;

// Re-export main types for convenience
pub use ceremony::{
    Ceremony, CeremonyKind, CeremonyOutcome, CeremonyState, ChallengePayload, CHALLENGE_LEN,
};
pub use coordinator::{AttemptCoordinator, AttemptToken};
pub use error::{CeremonyError, Result};
pub use machine::{CeremonyStateMachine, DEFAULT_VALIDATOR_TIMEOUT};
pub use mock::{InMemoryCredentials, MockValidator};
pub use retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
pub use store::{ChallengeStore, DEFAULT_CAPACITY, DEFAULT_TTL_SECS};
pub use traits::{
    CredentialDescriptor, CredentialRepository, CredentialValidator, PreparedCeremony,
    TransportCollaborator, Verification,
};
