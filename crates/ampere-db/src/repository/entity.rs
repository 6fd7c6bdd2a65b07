//! # Entity Repository
//!
//! One generic repository for every [`SyncEntity`] type. Rows are keyed by
//! (module, party, id), since object ids are only unique within the party
//! that publishes them. Each row carries the owning platform, an optional external
//! reference and the time of the last successful outbound push.
//!
//! ## Merge Semantics (last write wins)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  merge(platform, entity)                                                │
//! │       │                                                                 │
//! │       ├── no stored row                    → INSERT, Some(entity)       │
//! │       ├── same body, same owner            → None   (no-op)             │
//! │       ├── stored last_updated is newer     → None   (stale write)       │
//! │       └── otherwise                        → UPDATE, Some(entity)       │
//! │                                                                         │
//! │  The read and the write run in one transaction.                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::fmt;
use std::marker::PhantomData;
use tracing::debug;

use ampere_core::{PartyKey, Stored, SyncEntity};

use super::{from_millis, to_millis, Page};
use crate::error::DbResult;

/// Filter for [`EntityRepository::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    /// Only entities owned by this platform.
    pub platform_id: Option<String>,
    /// Skip entities owned by this platform.
    pub exclude_platform_id: Option<String>,
    /// Inclusive lower bound on `last_updated`.
    pub date_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `last_updated`.
    pub date_to: Option<DateTime<Utc>>,
    pub offset: u64,
    pub limit: u64,
}

/// Repository for one entity type.
pub struct EntityRepository<T> {
    pool: SqlitePool,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for EntityRepository<T> {
    fn clone(&self) -> Self {
        EntityRepository {
            pool: self.pool.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: SyncEntity> fmt::Debug for EntityRepository<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRepository")
            .field("module", &T::MODULE)
            .finish()
    }
}

impl<T: SyncEntity> EntityRepository<T> {
    pub fn new(pool: SqlitePool) -> Self {
        EntityRepository {
            pool,
            _entity: PhantomData,
        }
    }

    pub async fn get(&self, party: &PartyKey, id: &str) -> DbResult<Option<Stored<T>>> {
        let row = sqlx::query(
            r#"
            SELECT platform_id, ref_id, last_sent_ms, body FROM entities
            WHERE module = ?1 AND country_code = ?2 AND party_id = ?3 AND id = ?4
            "#,
        )
        .bind(T::MODULE.as_str())
        .bind(&party.country_code)
        .bind(&party.party_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| decode(&r)).transpose()
    }

    /// Unconditionally stores `entity` as owned by `platform_id`.
    pub async fn put(&self, platform_id: &str, entity: &T) -> DbResult<()> {
        let body = serde_json::to_string(entity)?;
        upsert(&self.pool, platform_id, entity, &body).await
    }

    /// Stores `entity` unless the write is a no-op or stale.
    ///
    /// Returns `None` when nothing was written.
    pub async fn merge(&self, platform_id: &str, entity: &T) -> DbResult<Option<T>> {
        let body = serde_json::to_string(entity)?;
        let party = entity.party();
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            r#"
            SELECT platform_id, last_updated_ms, body FROM entities
            WHERE module = ?1 AND country_code = ?2 AND party_id = ?3 AND id = ?4
            "#,
        )
        .bind(T::MODULE.as_str())
        .bind(&party.country_code)
        .bind(&party.party_id)
        .bind(entity.id())
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            let stored_platform: String = row.try_get("platform_id")?;
            let stored_updated: i64 = row.try_get("last_updated_ms")?;
            let stored_body: String = row.try_get("body")?;

            if stored_body == body && stored_platform == platform_id {
                debug!(kind = T::KIND, %party, id = entity.id(), "Merge produced no changes");
                return Ok(None);
            }
            if stored_updated > to_millis(entity.last_updated()) {
                debug!(kind = T::KIND, %party, id = entity.id(), "Ignoring stale write");
                return Ok(None);
            }
        }

        upsert(&mut *tx, platform_id, entity, &body).await?;
        tx.commit().await?;

        Ok(Some(entity.clone()))
    }

    /// Returns one page of matching entities, oldest update first.
    pub async fn search(&self, criteria: &SearchCriteria) -> DbResult<Page<Stored<T>>> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM entities WHERE module = ");
        count.push_bind(T::MODULE.as_str());
        push_filters(&mut count, criteria);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Sqlite>::new(
            "SELECT platform_id, ref_id, last_sent_ms, body FROM entities WHERE module = ",
        );
        select.push_bind(T::MODULE.as_str());
        push_filters(&mut select, criteria);
        select
            .push(" ORDER BY last_updated_ms, country_code, party_id, id LIMIT ")
            .push_bind(criteria.limit as i64)
            .push(" OFFSET ")
            .push_bind(criteria.offset as i64);

        let rows = select.build().fetch_all(&self.pool).await?;
        let items = rows.iter().map(decode).collect::<DbResult<Vec<_>>>()?;

        Ok(Page {
            items,
            total: total as u64,
            offset: criteria.offset,
            limit: criteria.limit,
        })
    }

    /// Records a successful outbound push.
    pub async fn mark_sent(&self, party: &PartyKey, id: &str, at: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE entities SET last_sent_ms = ?1
            WHERE module = ?2 AND country_code = ?3 AND party_id = ?4 AND id = ?5
            "#,
        )
        .bind(to_millis(at))
        .bind(T::MODULE.as_str())
        .bind(&party.country_code)
        .bind(&party.party_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn set_ref_id(&self, party: &PartyKey, id: &str, ref_id: Option<&str>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE entities SET ref_id = ?1
            WHERE module = ?2 AND country_code = ?3 AND party_id = ?4 AND id = ?5
            "#,
        )
        .bind(ref_id)
        .bind(T::MODULE.as_str())
        .bind(&party.country_code)
        .bind(&party.party_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, criteria: &SearchCriteria) {
    if let Some(platform_id) = &criteria.platform_id {
        qb.push(" AND platform_id = ").push_bind(platform_id.clone());
    }
    if let Some(platform_id) = &criteria.exclude_platform_id {
        qb.push(" AND platform_id <> ").push_bind(platform_id.clone());
    }
    if let Some(from) = criteria.date_from {
        qb.push(" AND last_updated_ms >= ").push_bind(to_millis(from));
    }
    if let Some(to) = criteria.date_to {
        qb.push(" AND last_updated_ms < ").push_bind(to_millis(to));
    }
}

/// Binds owned values only, so the query outlives any executor borrow.
async fn upsert<'e, E, T>(executor: E, platform_id: &str, entity: &T, body: &str) -> DbResult<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
    T: SyncEntity,
{
    let party = entity.party();
    sqlx::query(
        r#"
        INSERT INTO entities (
            module, id, country_code, party_id, platform_id, last_updated_ms, body
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(module, country_code, party_id, id) DO UPDATE SET
            platform_id = excluded.platform_id,
            last_updated_ms = excluded.last_updated_ms,
            body = excluded.body
        "#,
    )
    .bind(T::MODULE.as_str())
    .bind(entity.id().to_string())
    .bind(party.country_code)
    .bind(party.party_id)
    .bind(platform_id.to_string())
    .bind(to_millis(entity.last_updated()))
    .bind(body.to_string())
    .execute(executor)
    .await?;
    Ok(())
}

fn decode<T: SyncEntity>(row: &SqliteRow) -> DbResult<Stored<T>> {
    let body: String = row.try_get("body")?;
    let last_sent: Option<i64> = row.try_get("last_sent_ms")?;
    Ok(Stored {
        entity: serde_json::from_str(&body)?,
        platform_id: row.try_get("platform_id")?,
        ref_id: row.try_get("ref_id")?,
        last_sent: last_sent.map(from_millis),
    })
}
