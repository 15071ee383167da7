//! User directory store.
//!
//! The engine reads user records and fills in their conversation id; it never
//! deletes. Upserts are last-writer-wins per record.

use async_trait::async_trait;
use sqlx::PgPool;

use herald_common::types::UserRecord;

use crate::error::DispatchError;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Point lookup by the stable directory id.
    async fn find_by_id(&self, aad_id: &str) -> Result<Option<UserRecord>, DispatchError>;

    /// Case-insensitive lookup matching either the email or the UPN.
    ///
    /// When several records match, the most recently updated one wins.
    async fn find_by_address(&self, address: &str) -> Result<Option<UserRecord>, DispatchError>;

    /// Every record in the directory, in no particular order.
    async fn list_all(&self) -> Result<Vec<UserRecord>, DispatchError>;

    /// Insert or merge `user`. Absent optional fields keep their stored value.
    async fn upsert(&self, user: &UserRecord) -> Result<(), DispatchError>;
}

/// PostgreSQL-backed directory over the `users` table.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_id(&self, aad_id: &str) -> Result<Option<UserRecord>, DispatchError> {
        let user = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE aad_id = $1")
            .bind(aad_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn find_by_address(&self, address: &str) -> Result<Option<UserRecord>, DispatchError> {
        let user = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT *
            FROM users
            WHERE LOWER(email) = LOWER($1) OR LOWER(upn) = LOWER($1)
            ORDER BY updated_at DESC, aad_id ASC
            LIMIT 1
            "#,
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn list_all(&self) -> Result<Vec<UserRecord>, DispatchError> {
        let users = sqlx::query_as::<_, UserRecord>("SELECT * FROM users")
            .fetch_all(&self.pool)
            .await?;

        Ok(users)
    }

    async fn upsert(&self, user: &UserRecord) -> Result<(), DispatchError> {
        sqlx::query(
            r#"
            INSERT INTO users (aad_id, upn, email, conversation_id, service_url, tenant_id, user_id, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (aad_id) DO UPDATE SET
                upn = COALESCE(EXCLUDED.upn, users.upn),
                email = COALESCE(EXCLUDED.email, users.email),
                conversation_id = COALESCE(EXCLUDED.conversation_id, users.conversation_id),
                service_url = EXCLUDED.service_url,
                tenant_id = EXCLUDED.tenant_id,
                user_id = EXCLUDED.user_id,
                updated_at = NOW()
            "#,
        )
        .bind(&user.aad_id)
        .bind(&user.upn)
        .bind(&user.email)
        .bind(&user.conversation_id)
        .bind(&user.service_url)
        .bind(&user.tenant_id)
        .bind(&user.user_id)
        .execute(&self.pool)
        .await?;

        tracing::debug!(aad_id = %user.aad_id, "User record upserted");
        Ok(())
    }
}
