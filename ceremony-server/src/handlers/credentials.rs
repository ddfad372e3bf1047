//! Credential management handlers
//!
//! Listing and revocation of registered credentials. Revocation is the only
//! mutation a stored credential supports.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use ceremony_core::{CredentialDescriptor, CredentialRepository};

use crate::error::ApiError;
use crate::state::AppState;

/// A registered credential, without its public-key handle
#[derive(Debug, Serialize, ToSchema)]
pub struct CredentialSummary {
    pub id: String,
    pub subject: String,
    pub transports: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<CredentialDescriptor> for CredentialSummary {
    fn from(descriptor: CredentialDescriptor) -> Self {
        Self {
            id: descriptor.id,
            subject: descriptor.subject,
            transports: descriptor.transports,
            created_at: descriptor.created_at,
        }
    }
}

/// Response listing a subject's credentials
#[derive(Debug, Serialize, ToSchema)]
pub struct CredentialListResponse {
    pub credentials: Vec<CredentialSummary>,
}

/// GET /subjects/{subject}/credentials
///
/// List the credentials registered for a subject.
#[utoipa::path(
    get,
    path = "/subjects/{subject}/credentials",
    tag = "Credentials",
    params(("subject" = String, Path, description = "Subject account name")),
    responses(
        (status = 200, description = "Credential list", body = CredentialListResponse)
    )
)]
pub async fn list_credentials(
    State(state): State<Arc<AppState>>,
    Path(subject): Path<String>,
) -> Result<Json<CredentialListResponse>, ApiError> {
    let credentials = state.storage.list_for(&subject).await?;

    Ok(Json(CredentialListResponse {
        credentials: credentials.into_iter().map(CredentialSummary::from).collect(),
    }))
}

/// DELETE /credentials/{credential_id}
///
/// Revoke a credential. In-flight ceremonies that already asserted this
/// credential will fail verification when they observe the deletion.
#[utoipa::path(
    delete,
    path = "/credentials/{credential_id}",
    tag = "Credentials",
    params(("credential_id" = String, Path, description = "Credential id (base64url)")),
    responses(
        (status = 204, description = "Credential revoked"),
        (status = 404, description = "Credential not found")
    )
)]
pub async fn revoke_credential(
    State(state): State<Arc<AppState>>,
    Path(credential_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.storage.find(&credential_id).await?.is_none() {
        return Err(ApiError::not_found("Credential not found"));
    }

    state.storage.revoke(&credential_id).await?;
    tracing::info!(credential_id = %credential_id, "Credential revoked");
    Ok(StatusCode::NO_CONTENT)
}
