//! Persistent storage for the session's bearer tokens.
//!
//! Both tokens live in the `local_storage` table under two fixed keys. They
//! are written and cleared together, never individually.

use sqlx::sqlite::SqlitePool;

/// Storage key for the short-lived access token.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Storage key for the long-lived refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Store for the access/refresh token pair.
#[derive(Clone)]
pub struct TokenStore {
    pool: SqlitePool,
}

impl TokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist both tokens, replacing whatever was stored before.
    pub async fn save(&self, access: &str, refresh: &str) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in [(ACCESS_TOKEN_KEY, access), (REFRESH_TOKEN_KEY, refresh)] {
            sqlx::query(
                "INSERT INTO local_storage (key, value) VALUES (?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn load_access(&self) -> Result<Option<String>, sqlx::Error> {
        self.load(ACCESS_TOKEN_KEY).await
    }

    pub async fn load_refresh(&self) -> Result<Option<String>, sqlx::Error> {
        self.load(REFRESH_TOKEN_KEY).await
    }

    /// Remove both tokens.
    pub async fn clear(&self) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM local_storage WHERE key IN (?, ?)")
            .bind(ACCESS_TOKEN_KEY)
            .bind(REFRESH_TOKEN_KEY)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM local_storage WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }
}
