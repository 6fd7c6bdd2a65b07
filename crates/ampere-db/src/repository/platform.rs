//! # Platform Repository
//!
//! Persistence of the platform directory. The full [`Platform`] is stored as
//! JSON; status, role and tokens are mirrored into columns for lookups.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use ampere_core::{ConnectionStatus, Platform};

use super::to_millis;
use crate::error::{DbError, DbResult};

const SELECT_BODY: &str = "SELECT body FROM platforms";

/// Repository for platform directory operations.
#[derive(Debug, Clone)]
pub struct PlatformRepository {
    pool: SqlitePool,
}

impl PlatformRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PlatformRepository { pool }
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<Platform>> {
        let row = sqlx::query(&format!("{} WHERE id = ?1", SELECT_BODY))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode(&r)).transpose()
    }

    /// Returns the local platform, if registered.
    pub async fn get_local(&self) -> DbResult<Option<Platform>> {
        let row = sqlx::query(&format!("{} WHERE is_local = 1", SELECT_BODY))
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode(&r)).transpose()
    }

    /// Finds the remote platform that presents `token` (token A or token B).
    pub async fn find_by_token(&self, token: &str) -> DbResult<Option<Platform>> {
        let row = sqlx::query(&format!(
            "{} WHERE is_local = 0 AND (token_b = ?1 OR token_a = ?1) ORDER BY token_b = ?1 DESC LIMIT 1",
            SELECT_BODY
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| decode(&r)).transpose()
    }

    pub async fn list(&self) -> DbResult<Vec<Platform>> {
        let rows = sqlx::query(&format!("{} ORDER BY id", SELECT_BODY))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode).collect()
    }

    /// Remote platforms with status `CONNECTED`.
    pub async fn list_connected_remotes(&self) -> DbResult<Vec<Platform>> {
        let rows = sqlx::query(&format!(
            "{} WHERE is_local = 0 AND status = ?1 ORDER BY id",
            SELECT_BODY
        ))
        .bind(ConnectionStatus::Connected.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode).collect()
    }

    /// Inserts or replaces a platform.
    pub async fn save(&self, platform: &Platform) -> DbResult<()> {
        let body = serde_json::to_string(platform)?;

        debug!(platform_id = %platform.id, status = %platform.status, "Saving platform");

        sqlx::query(
            r#"
            INSERT INTO platforms (
                id, is_local, status, role, token_a, token_b, token_c, body, last_updated_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                is_local = excluded.is_local,
                status = excluded.status,
                role = excluded.role,
                token_a = excluded.token_a,
                token_b = excluded.token_b,
                token_c = excluded.token_c,
                body = excluded.body,
                last_updated_ms = excluded.last_updated_ms
            "#,
        )
        .bind(&platform.id)
        .bind(platform.is_local)
        .bind(platform.status.as_str())
        .bind(platform.role.as_str())
        .bind(&platform.token_a)
        .bind(&platform.token_b)
        .bind(&platform.token_c)
        .bind(body)
        .bind(to_millis(platform.last_updated))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Saves `platform` unless it equals the stored copy (ignoring `last_updated`).
    ///
    /// Returns `None` when nothing changed.
    pub async fn merge(&self, platform: &Platform) -> DbResult<Option<Platform>> {
        if let Some(existing) = self.get(&platform.id).await? {
            let mut candidate = platform.clone();
            candidate.last_updated = existing.last_updated;
            if candidate == existing {
                return Ok(None);
            }
        }
        self.save(platform).await?;
        Ok(Some(platform.clone()))
    }

    /// Changes the connection status of a platform.
    pub async fn set_status(
        &self,
        id: &str,
        status: ConnectionStatus,
        now: DateTime<Utc>,
    ) -> DbResult<Platform> {
        let mut platform = self
            .get(id)
            .await?
            .ok_or_else(|| DbError::not_found("Platform", id))?;
        platform.status = status;
        platform.last_updated = now;
        self.save(&platform).await?;
        Ok(platform)
    }
}

fn decode(row: &sqlx::sqlite::SqliteRow) -> DbResult<Platform> {
    let body: String = row.try_get("body")?;
    Ok(serde_json::from_str(&body)?)
}
