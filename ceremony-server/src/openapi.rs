//! OpenAPI documentation configuration
//!
//! Generates the OpenAPI 3.0 specification for the ceremony API.

use utoipa::OpenApi;

use crate::handlers::{
    CredentialListResponse, CredentialSummary, FinishCeremonyRequest, FinishCeremonyResponse,
    HealthResponse, ReadyResponse, StartAuthenticationRequest, StartCeremonyResponse,
    StartRegistrationRequest,
};

/// Ceremony API - OpenAPI Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Ceremony Server",
        version = "0.1.0",
        description = r#"
## Passkey ceremony API

Server-side core for WebAuthn passkey registration and authentication:

- **Single-use challenges** - every ceremony gets a fresh challenge that is
  atomically consumed on finish, so a replayed finish always fails
- **Attempt supersession** - starting a new ceremony for a subject
  invalidates the previous one; only the latest attempt can complete
- **Bounded TTL** - challenges expire after a fixed window and are swept

### How it works

1. `POST /ceremony/register/start` (or `/ceremony/auth/start`) returns a
   challenge and the options for `navigator.credentials`
2. The browser runs the cryptographic ceremony with the authenticator
3. `POST .../finish` submits the credential or assertion for verification
"#,
        license(
            name = "MIT OR Apache-2.0",
            url = "https://github.com/ceremony-rs/ceremony/blob/main/LICENSE"
        )
    ),
    servers(
        (url = "http://localhost:3000", description = "Local development server")
    ),
    tags(
        (name = "Ceremony", description = "Passkey registration and authentication ceremonies"),
        (name = "Credentials", description = "Registered credential listing and revocation"),
        (name = "Health", description = "Service health and readiness endpoints")
    ),
    paths(
        crate::handlers::health::health,
        crate::handlers::health::ready,
        crate::handlers::ceremony::start_registration,
        crate::handlers::ceremony::finish_registration,
        crate::handlers::ceremony::start_authentication,
        crate::handlers::ceremony::finish_authentication,
        crate::handlers::credentials::list_credentials,
        crate::handlers::credentials::revoke_credential,
    ),
    components(
        schemas(
            HealthResponse,
            ReadyResponse,
            StartRegistrationRequest,
            StartAuthenticationRequest,
            StartCeremonyResponse,
            FinishCeremonyRequest,
            FinishCeremonyResponse,
            CredentialListResponse,
            CredentialSummary,
        )
    )
)]
pub struct ApiDoc;
