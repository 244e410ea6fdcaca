//! Database repository for refresh token records.
//!
//! Records are inserted on issuance and deleted on rotation, logout or
//! hijack containment; they are never updated. Only bcrypt hashes of the
//! secrets are stored, so lookup scans the live records and compares the
//! presented secret against each hash.

use crate::database::models::{CreateRefreshToken, RefreshToken};
use crate::utils::jwt::TokenIssuer;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqlitePool, Transaction};

const SELECT_COLUMNS: &str = r#"
    SELECT id, user_id, token_hash, expires_at, created_at,
           access_token_fingerprint, user_agent, ip_address
    FROM refresh_tokens
"#;

/// Repository for refresh token database operations.
pub struct RefreshTokenRepository<'a> {
    /// Shared SQLite connection pool
    pool: &'a SqlitePool,
}

impl<'a> RefreshTokenRepository<'a> {
    /// Creates a new RefreshTokenRepository instance.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a new refresh token record.
    pub async fn save(&self, token: CreateRefreshToken) -> Result<RefreshToken> {
        let mut tx = self.pool.begin().await?;
        let saved = insert(&mut tx, token).await?;
        tx.commit().await?;
        Ok(saved)
    }

    /// Records whose expiry lies strictly after `now`.
    pub async fn find_live(&self, now: DateTime<Utc>) -> Result<Vec<RefreshToken>> {
        let query = format!("{SELECT_COLUMNS} WHERE expires_at > ? ORDER BY created_at");
        let tokens = sqlx::query_as::<_, RefreshToken>(&query)
            .bind(now)
            .fetch_all(self.pool)
            .await?;

        Ok(tokens)
    }

    /// Finds the live record whose hash matches the presented raw secret.
    ///
    /// This is a linear scan with one bcrypt comparison per live record.
    ///
    /// # Returns
    /// The first matching record, `None` if no live record verifies
    pub async fn find_by_presented_secret(
        &self,
        presented: &str,
        issuer: &TokenIssuer,
    ) -> Result<Option<RefreshToken>> {
        let candidates = self.find_live(Utc::now()).await?;

        Ok(candidates
            .into_iter()
            .find(|candidate| issuer.verify_refresh_secret(presented, &candidate.token_hash)))
    }

    /// Removes every record owned by the user.
    ///
    /// # Returns
    /// Number of records deleted
    pub async fn delete_all_for_user(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = ?")
            .bind(user_id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Removes records that expired at or before `now`.
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= ?")
            .bind(now)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Starts consuming a record: deletes it inside a transaction that stays
    /// open until the replacement is saved.
    ///
    /// # Returns
    /// `None` when nothing was deleted, meaning another exchange consumed the
    /// record first.
    pub async fn begin_rotation(&self, token_hash: &str) -> Result<Option<PendingRotation>> {
        let mut tx = self.pool.begin().await?;

        if delete_by_token(&mut *tx, token_hash).await? == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        Ok(Some(PendingRotation { tx }))
    }

    #[cfg(test)]
    pub async fn count_for_user(&self, user_id: &str) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM refresh_tokens WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(self.pool)
            .await?;

        Ok(count)
    }
}

/// A consumed record whose delete has not been committed yet.
///
/// Dropping it without calling [`PendingRotation::complete`] rolls the delete
/// back.
pub struct PendingRotation {
    tx: Transaction<'static, Sqlite>,
}

impl PendingRotation {
    /// Inserts the replacement record and commits the rotation.
    pub async fn complete(mut self, replacement: CreateRefreshToken) -> Result<RefreshToken> {
        let saved = insert(&mut self.tx, replacement).await?;
        self.tx.commit().await?;
        Ok(saved)
    }
}

/// Removes the record with the given hash. Absent records are not an error.
///
/// # Returns
/// Number of records deleted, zero or one
async fn delete_by_token<'e, E>(executor: E, token_hash: &str) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = ?")
        .bind(token_hash)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

async fn insert(
    tx: &mut Transaction<'static, Sqlite>,
    token: CreateRefreshToken,
) -> Result<RefreshToken> {
    let saved = sqlx::query_as::<_, RefreshToken>(
        r#"
        INSERT INTO refresh_tokens
            (id, user_id, token_hash, expires_at, created_at,
             access_token_fingerprint, user_agent, ip_address)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id, user_id, token_hash, expires_at, created_at,
                  access_token_fingerprint, user_agent, ip_address
        "#,
    )
    .bind(token.id)
    .bind(token.user_id)
    .bind(token.token_hash)
    .bind(token.expires_at)
    .bind(Utc::now())
    .bind(token.access_token_fingerprint)
    .bind(token.user_agent)
    .bind(token.ip_address)
    .fetch_one(&mut **tx)
    .await?;

    Ok(saved)
}
