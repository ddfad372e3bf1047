//! Ceremony Server Library - REST API components for passkey ceremonies
//!
//! This library exposes the server components for use in integration tests.
//! The main binary uses these same components.

pub mod config;
pub mod error;
pub mod handlers;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod storage;
pub mod webauthn;

pub use config::Config;
pub use error::ApiError;
pub use openapi::ApiDoc;
pub use routes::create_router;
pub use state::AppState;
pub use storage::{CredentialStorage, PostgresCredentialStore, StorageError, StoredCredential};
pub use webauthn::{SetupError, WebauthnValidator};
