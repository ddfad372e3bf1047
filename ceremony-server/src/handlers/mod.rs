//! HTTP request handlers

pub mod ceremony;
pub mod credentials;
pub mod health;

pub use ceremony::{
    finish_authentication, finish_registration, start_authentication, start_registration,
    FinishCeremonyRequest, FinishCeremonyResponse, StartAuthenticationRequest,
    StartCeremonyResponse, StartRegistrationRequest,
};
pub use credentials::{list_credentials, revoke_credential, CredentialListResponse, CredentialSummary};
pub use health::{health, ready, HealthResponse, ReadyResponse};
