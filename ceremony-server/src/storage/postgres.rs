//! PostgreSQL storage for registered credentials
//!
//! Provides persistent storage so credentials survive server restarts.

use ceremony_core::CredentialDescriptor;
use sqlx::PgPool;

use super::{StorageError, StoredCredential};

/// PostgreSQL-backed credential storage
pub struct PostgresCredentialStore {
    pool: PgPool,
}

impl PostgresCredentialStore {
    /// Create a new PostgreSQL credential store
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        tracing::info!("Connected to PostgreSQL database");
        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        tracing::info!("Database migrations completed");
        Ok(())
    }

    /// Check database connection health
    pub async fn check_health(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(())
    }

    /// Store a new credential
    pub async fn store_credential(
        &self,
        descriptor: &CredentialDescriptor,
        sign_count: u32,
    ) -> Result<(), StorageError> {
        let transports = serde_json::to_value(&descriptor.transports)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO credentials
                (credential_id, subject, public_key, transports, sign_count, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (credential_id) DO UPDATE SET
                public_key = EXCLUDED.public_key,
                sign_count = EXCLUDED.sign_count,
                last_used_at = NOW()
            "#,
        )
        .bind(&descriptor.id)
        .bind(&descriptor.subject)
        .bind(&descriptor.public_key)
        .bind(&transports)
        .bind(sign_count as i32)
        .bind(descriptor.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        tracing::info!(credential_id = %descriptor.id, "Credential stored in database");
        Ok(())
    }

    /// Get a credential by ID
    pub async fn get_credential(
        &self,
        credential_id: &str,
    ) -> Result<Option<StoredCredential>, StorageError> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT credential_id, subject, public_key, transports, sign_count, created_at
            FROM credentials
            WHERE credential_id = $1
            "#,
        )
        .bind(credential_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        row.map(CredentialRow::into_stored_credential).transpose()
    }

    /// List a subject's credentials
    pub async fn list_for(
        &self,
        subject: &str,
    ) -> Result<Vec<CredentialDescriptor>, StorageError> {
        let rows = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT credential_id, subject, public_key, transports, sign_count, created_at
            FROM credentials
            WHERE subject = $1
            ORDER BY created_at
            "#,
        )
        .bind(subject)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        rows.into_iter()
            .map(|row| row.into_stored_credential().map(|s| s.descriptor))
            .collect()
    }

    /// Update credential after successful authentication
    pub async fn update_credential(
        &self,
        credential_id: &str,
        public_key: &serde_json::Value,
        sign_count: u32,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET public_key = $2, sign_count = $3, last_used_at = NOW()
            WHERE credential_id = $1
            "#,
        )
        .bind(credential_id)
        .bind(public_key)
        .bind(sign_count as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a credential (revocation). Returns whether a row was removed.
    pub async fn delete_credential(&self, credential_id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM credentials WHERE credential_id = $1")
            .bind(credential_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Get total credential count (for stats)
    pub async fn credential_count(&self) -> Result<usize, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM credentials")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(count as usize)
    }
}

/// Database row for credentials
#[derive(sqlx::FromRow)]
struct CredentialRow {
    credential_id: String,
    subject: String,
    public_key: serde_json::Value,
    transports: serde_json::Value,
    sign_count: i32,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl CredentialRow {
    fn into_stored_credential(self) -> Result<StoredCredential, StorageError> {
        let transports: Vec<String> = serde_json::from_value(self.transports)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        Ok(StoredCredential {
            descriptor: CredentialDescriptor {
                id: self.credential_id,
                subject: self.subject,
                public_key: self.public_key,
                transports,
                created_at: self.created_at,
            },
            sign_count: self.sign_count as u32,
        })
    }
}

impl std::fmt::Debug for PostgresCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresCredentialStore")
            .field("pool", &"<PgPool>")
            .finish()
    }
}
