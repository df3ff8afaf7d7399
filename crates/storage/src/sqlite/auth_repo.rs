use amigo_core::model::UserId;
use chrono::{DateTime, Utc};

use super::SqliteRepository;
use super::mapping::{db_err, to_i64, user_id};
use crate::repository::{AuthTokenRepository, StorageError};

#[async_trait::async_trait]
impl AuthTokenRepository for SqliteRepository {
    async fn insert_token(
        &self,
        token: &str,
        user: UserId,
        created_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO auth_tokens (token, user_id, created_at) VALUES (?1, ?2, ?3)")
            .bind(token)
            .bind(to_i64("user_id", user.value())?)
            .bind(created_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn user_for_token(&self, token: &str) -> Result<Option<UserId>, StorageError> {
        let row = sqlx::query("SELECT user_id FROM auth_tokens WHERE token = ?1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|row| user_id(&row, "user_id")).transpose()
    }

    async fn revoke_token(&self, token: &str) -> Result<bool, StorageError> {
        let res = sqlx::query("DELETE FROM auth_tokens WHERE token = ?1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(res.rows_affected() > 0)
    }
}
