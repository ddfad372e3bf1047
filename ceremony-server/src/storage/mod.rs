//! Credential storage module
//!
//! Provides durable storage for registered credentials:
//! - **PostgreSQL** (production): credentials survive restarts.
//! - **In-memory** (development fallback): used when `DATABASE_URL` is unset.
//!
//! Pending ceremonies never touch this module - they live in the core's
//! in-memory `ChallengeStore` and are gone on restart by design.

mod postgres;

pub use postgres::PostgresCredentialStore;

use async_trait::async_trait;
use ceremony_core::{CeremonyError, CredentialDescriptor, CredentialRepository};
use dashmap::DashMap;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Database migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<StorageError> for CeremonyError {
    fn from(err: StorageError) -> Self {
        CeremonyError::Storage(err.to_string())
    }
}

/// A credential as this server stores it: the core descriptor plus the
/// authenticator sign counter the webauthn adapter maintains.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub descriptor: CredentialDescriptor,
    pub sign_count: u32,
}

/// Credential storage backend
enum CredentialBackend {
    /// PostgreSQL storage (production)
    Postgres(PostgresCredentialStore),
    /// In-memory storage (development fallback)
    Memory(DashMap<String, StoredCredential>),
}

/// Unified credential storage
pub struct CredentialStorage {
    backend: CredentialBackend,
}

impl CredentialStorage {
    /// Create storage with PostgreSQL backend
    pub async fn with_postgres(database_url: &str) -> Result<Self, StorageError> {
        let pg_store = PostgresCredentialStore::new(database_url).await?;
        pg_store.migrate().await?;

        Ok(Self {
            backend: CredentialBackend::Postgres(pg_store),
        })
    }

    /// Create storage with in-memory backend (development only)
    pub fn in_memory() -> Self {
        tracing::warn!("Using in-memory credential storage - credentials will be lost on restart!");
        Self {
            backend: CredentialBackend::Memory(DashMap::new()),
        }
    }

    /// Create storage from environment
    ///
    /// Uses PostgreSQL if `DATABASE_URL` is set, otherwise falls back to
    /// in-memory.
    pub async fn from_env() -> Result<Self, StorageError> {
        match std::env::var("DATABASE_URL") {
            Ok(url) if !url.is_empty() => {
                tracing::info!("Using PostgreSQL credential storage");
                Self::with_postgres(&url).await
            }
            _ => {
                tracing::warn!("DATABASE_URL not set, using in-memory storage");
                Ok(Self::in_memory())
            }
        }
    }

    /// Check if using persistent storage
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, CredentialBackend::Postgres(_))
    }

    /// Check database health (always Ok for memory backend)
    pub async fn check_health(&self) -> Result<(), StorageError> {
        match &self.backend {
            CredentialBackend::Postgres(pg) => pg.check_health().await,
            CredentialBackend::Memory(_) => Ok(()),
        }
    }

    /// Get a credential with its sign counter
    pub async fn get(&self, credential_id: &str) -> Result<Option<StoredCredential>, StorageError> {
        match &self.backend {
            CredentialBackend::Postgres(pg) => pg.get_credential(credential_id).await,
            CredentialBackend::Memory(map) => {
                Ok(map.get(credential_id).map(|entry| entry.value().clone()))
            }
        }
    }

    /// Update a credential's public-key handle and sign counter after a
    /// successful authentication. Returns false if the credential is gone
    /// (revoked while the ceremony was in flight).
    pub async fn update_passkey(
        &self,
        credential_id: &str,
        public_key: &serde_json::Value,
        sign_count: u32,
    ) -> Result<bool, StorageError> {
        match &self.backend {
            CredentialBackend::Postgres(pg) => {
                pg.update_credential(credential_id, public_key, sign_count).await
            }
            CredentialBackend::Memory(map) => {
                if let Some(mut entry) = map.get_mut(credential_id) {
                    entry.descriptor.public_key = public_key.clone();
                    entry.sign_count = sign_count;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Get total credential count (for stats)
    pub async fn credential_count(&self) -> Result<usize, StorageError> {
        match &self.backend {
            CredentialBackend::Postgres(pg) => pg.credential_count().await,
            CredentialBackend::Memory(map) => Ok(map.len()),
        }
    }
}

#[async_trait]
impl CredentialRepository for CredentialStorage {
    async fn save(&self, descriptor: CredentialDescriptor) -> ceremony_core::Result<()> {
        match &self.backend {
            CredentialBackend::Postgres(pg) => {
                pg.store_credential(&descriptor, 0).await?;
            }
            CredentialBackend::Memory(map) => {
                map.insert(
                    descriptor.id.clone(),
                    StoredCredential {
                        descriptor,
                        sign_count: 0,
                    },
                );
            }
        }
        Ok(())
    }

    async fn list_for(&self, subject: &str) -> ceremony_core::Result<Vec<CredentialDescriptor>> {
        match &self.backend {
            CredentialBackend::Postgres(pg) => Ok(pg.list_for(subject).await?),
            CredentialBackend::Memory(map) => Ok(map
                .iter()
                .filter(|entry| entry.value().descriptor.subject == subject)
                .map(|entry| entry.value().descriptor.clone())
                .collect()),
        }
    }

    async fn find(&self, credential_id: &str) -> ceremony_core::Result<Option<CredentialDescriptor>> {
        Ok(self
            .get(credential_id)
            .await
            .map_err(CeremonyError::from)?
            .map(|stored| stored.descriptor))
    }

    async fn revoke(&self, credential_id: &str) -> ceremony_core::Result<()> {
        match &self.backend {
            CredentialBackend::Postgres(pg) => {
                pg.delete_credential(credential_id).await?;
            }
            CredentialBackend::Memory(map) => {
                map.remove(credential_id);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for CredentialStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match &self.backend {
            CredentialBackend::Postgres(_) => "PostgreSQL",
            CredentialBackend::Memory(_) => "Memory",
        };
        f.debug_struct("CredentialStorage")
            .field("backend", &backend)
            .finish()
    }
}
