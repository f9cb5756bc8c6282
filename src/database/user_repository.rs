use crate::database::error::DatabaseError;
use crate::database::repository::{StoreResult, UserDirectory};
use async_trait::async_trait;
use sqlx::PgPool;

/// Looks up internal user ids by the identity provider's subject or by email.
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for UserRepository {
    async fn resolve_user(&self, external_id: &str) -> StoreResult<Option<i64>> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn resolve_user_by_email(&self, email: &str) -> StoreResult<Option<i64>> {
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM users WHERE LOWER(email) = LOWER($1) ORDER BY id ASC LIMIT 1",
        )
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
