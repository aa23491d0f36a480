use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use teamdesk_core::domain::user::{SessionToken, User};

use super::{decode_timestamp, encode_timestamp, RepositoryError, UserRepository};
use crate::DbPool;

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn session_from_row(row: &SqliteRow) -> Result<SessionToken, RepositoryError> {
    let created_at: String = row.try_get("created_at")?;
    Ok(SessionToken {
        secret: row.try_get("secret")?,
        user_id: row.try_get("user_id")?,
        created_at: decode_timestamp("created_at", &created_at)?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
    })
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn find(&self, id: &str) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query("SELECT id, username, totp_secret FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(User {
                id: row.try_get("id")?,
                username: row.try_get("username")?,
                totp_secret: row.try_get("totp_secret")?,
            })),
            None => Ok(None),
        }
    }

    async fn ensure_user(&self, id: &str, username: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO users (id, username) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET username = excluded.username",
        )
        .bind(id)
        .bind(username)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_totp_secret(
        &self,
        id: &str,
        username: &str,
        secret: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO users (id, username, totp_secret) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 username = excluded.username,
                 totp_secret = excluded.totp_secret",
        )
        .bind(id)
        .bind(username)
        .bind(secret)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_session(&self, session: &SessionToken) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO session_tokens (secret, user_id, created_at, ip_address, user_agent)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&session.secret)
        .bind(&session.user_id)
        .bind(encode_timestamp(session.created_at))
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_session(&self, secret: &str) -> Result<Option<SessionToken>, RepositoryError> {
        let row = sqlx::query(
            "SELECT secret, user_id, created_at, ip_address, user_agent
             FROM session_tokens WHERE secret = ?",
        )
        .bind(secret)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionToken>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT secret, user_id, created_at, ip_address, user_agent
             FROM session_tokens WHERE user_id = ? ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(session_from_row).collect()
    }

    async fn revoke_session(&self, user_id: &str, secret: &str) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM session_tokens WHERE secret = ? AND user_id = ?")
            .bind(secret)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(deleted.rows_affected() > 0)
    }
}
