//! Ceremony endpoint handlers
//!
//! Implements the start/finish pairs the browser client drives for passkey
//! registration and authentication. Each start issues a single-use challenge
//! and supersedes any in-flight attempt for the same subject; each finish
//! consumes the challenge before any verification work.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use ceremony_core::{CeremonyKind, CeremonyOutcome, ChallengePayload};

use crate::error::ApiError;
use crate::state::AppState;

/// Request to start passkey registration
#[derive(Debug, Deserialize, ToSchema)]
pub struct StartRegistrationRequest {
    /// Account name the new passkey will belong to
    #[schema(example = "alice")]
    pub username: String,
}

/// Request to start passkey authentication. An empty body means
/// usernameless (discoverable-credential) authentication.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct StartAuthenticationRequest {
    /// Account name, if known up front
    #[serde(default)]
    #[schema(example = "alice")]
    pub username: Option<String>,
}

/// Response containing the ceremony challenge
#[derive(Debug, Serialize, ToSchema)]
pub struct StartCeremonyResponse {
    /// Ceremony id, echoed back in the finish request
    pub ceremony_id: String,
    /// base64url single-use challenge bound to this ceremony
    pub challenge: String,
    /// WebAuthn options to pass to `navigator.credentials`
    #[schema(value_type = Object)]
    pub public_key: serde_json::Value,
    /// When the challenge stops being accepted
    pub expires_at: DateTime<Utc>,
}

impl From<ChallengePayload> for StartCeremonyResponse {
    fn from(payload: ChallengePayload) -> Self {
        Self {
            ceremony_id: payload.ceremony_id,
            challenge: payload.challenge,
            public_key: payload.public,
            expires_at: payload.expires_at,
        }
    }
}

/// Request to finish a ceremony
#[derive(Debug, Deserialize, ToSchema)]
pub struct FinishCeremonyRequest {
    /// Ceremony id from the start response
    pub ceremony_id: String,
    /// Credential or assertion produced by `navigator.credentials`
    #[schema(value_type = Object)]
    pub response: serde_json::Value,
}

/// Response for a completed ceremony
#[derive(Debug, Serialize, ToSchema)]
pub struct FinishCeremonyResponse {
    /// Which ceremony completed
    #[schema(value_type = String)]
    pub kind: CeremonyKind,
    /// Verified subject identity
    pub subject: String,
    /// Credential created (registration) or asserted (authentication)
    pub credential_id: String,
}

impl From<CeremonyOutcome> for FinishCeremonyResponse {
    fn from(outcome: CeremonyOutcome) -> Self {
        Self {
            kind: outcome.kind,
            subject: outcome.subject,
            credential_id: outcome.credential_id,
        }
    }
}

/// POST /ceremony/register/start
///
/// Start passkey registration for a username. A prior unfinished
/// registration for the same username is superseded.
#[utoipa::path(
    post,
    path = "/ceremony/register/start",
    tag = "Ceremony",
    request_body = StartRegistrationRequest,
    responses(
        (status = 200, description = "Registration challenge created", body = StartCeremonyResponse),
        (status = 503, description = "Too many pending ceremonies")
    )
)]
pub async fn start_registration(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartRegistrationRequest>,
) -> Result<Json<StartCeremonyResponse>, ApiError> {
    let payload = state
        .machine
        .start(CeremonyKind::Registration, Some(&req.username))
        .await?;

    tracing::info!(ceremony_id = %payload.ceremony_id, "Registration ceremony started");
    Ok(Json(payload.into()))
}

/// POST /ceremony/register/finish
///
/// Complete passkey registration with the authenticator's credential.
#[utoipa::path(
    post,
    path = "/ceremony/register/finish",
    tag = "Ceremony",
    request_body = FinishCeremonyRequest,
    responses(
        (status = 200, description = "Registration completed", body = FinishCeremonyResponse),
        (status = 400, description = "Invalid or expired ceremony"),
        (status = 401, description = "Credential verification failed"),
        (status = 409, description = "Ceremony superseded by a newer attempt")
    )
)]
pub async fn finish_registration(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FinishCeremonyRequest>,
) -> Result<Json<FinishCeremonyResponse>, ApiError> {
    let outcome = state.machine.finish(&req.ceremony_id, &req.response).await?;

    tracing::info!(
        ceremony_id = %req.ceremony_id,
        credential_id = %outcome.credential_id,
        "Registration ceremony completed"
    );
    Ok(Json(outcome.into()))
}

/// POST /ceremony/auth/start
///
/// Start passkey authentication. With a username the challenge carries the
/// subject's allowed credentials; with an empty body the discoverable
/// (usernameless) flow is used.
#[utoipa::path(
    post,
    path = "/ceremony/auth/start",
    tag = "Ceremony",
    request_body = StartAuthenticationRequest,
    responses(
        (status = 200, description = "Authentication challenge created", body = StartCeremonyResponse),
        (status = 401, description = "No credentials registered for subject"),
        (status = 503, description = "Too many pending ceremonies")
    )
)]
pub async fn start_authentication(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartAuthenticationRequest>,
) -> Result<Json<StartCeremonyResponse>, ApiError> {
    let payload = state
        .machine
        .start(CeremonyKind::Authentication, req.username.as_deref())
        .await?;

    tracing::info!(
        ceremony_id = %payload.ceremony_id,
        usernameless = req.username.is_none(),
        "Authentication ceremony started"
    );
    Ok(Json(payload.into()))
}

/// POST /ceremony/auth/finish
///
/// Complete passkey authentication with the authenticator's assertion.
#[utoipa::path(
    post,
    path = "/ceremony/auth/finish",
    tag = "Ceremony",
    request_body = FinishCeremonyRequest,
    responses(
        (status = 200, description = "Authentication completed", body = FinishCeremonyResponse),
        (status = 400, description = "Invalid or expired ceremony"),
        (status = 401, description = "Credential verification failed"),
        (status = 409, description = "Ceremony superseded by a newer attempt")
    )
)]
pub async fn finish_authentication(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FinishCeremonyRequest>,
) -> Result<Json<FinishCeremonyResponse>, ApiError> {
    let outcome = state.machine.finish(&req.ceremony_id, &req.response).await?;

    tracing::info!(
        ceremony_id = %req.ceremony_id,
        subject = %outcome.subject,
        "Authentication ceremony completed"
    );
    Ok(Json(outcome.into()))
}
