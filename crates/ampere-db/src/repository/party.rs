//! # Party Repository
//!
//! Parties keyed by (country code, party id). Client-info updates land here
//! too, since client info is the published status of a party.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use ampere_core::{ClientInfo, ConnectionStatus, Party, PartyKey, Role};

use super::{to_millis, Page};
use crate::error::DbResult;

/// Repository for party operations.
#[derive(Debug, Clone)]
pub struct PartyRepository {
    pool: SqlitePool,
}

impl PartyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PartyRepository { pool }
    }

    pub async fn get(&self, key: &PartyKey) -> DbResult<Option<Party>> {
        let row = sqlx::query("SELECT body FROM parties WHERE country_code = ?1 AND party_id = ?2")
            .bind(&key.country_code)
            .bind(&key.party_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode(&r)).transpose()
    }

    pub async fn list(&self) -> DbResult<Vec<Party>> {
        let rows = sqlx::query("SELECT body FROM parties ORDER BY country_code, party_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode).collect()
    }

    pub async fn list_by_platform(&self, platform_id: &str) -> DbResult<Vec<Party>> {
        let rows = sqlx::query(
            "SELECT body FROM parties WHERE platform_id = ?1 ORDER BY country_code, party_id",
        )
        .bind(platform_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode).collect()
    }

    /// One page of client-info rows, one per party role, for parties not
    /// hosted by `exclude_platform_id`.
    ///
    /// ```text
    /// parties ──LEFT JOIN json_each(roles)──► (party, role) rows ──► LIMIT/OFFSET
    /// ```
    ///
    /// A party without roles yields a single `OTHER` row; a party without a
    /// reported status is published as `CONNECTED`.
    pub async fn search_client_info(
        &self,
        exclude_platform_id: &str,
        offset: u64,
        limit: u64,
    ) -> DbResult<Page<ClientInfo>> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM parties p
            LEFT JOIN json_each(p.body, '$.roles') AS r
            WHERE p.platform_id <> ?1
            "#,
        )
        .bind(exclude_platform_id)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(
            r#"
            SELECT p.body AS body, r.value AS role
            FROM parties p
            LEFT JOIN json_each(p.body, '$.roles') AS r
            WHERE p.platform_id <> ?1
            ORDER BY p.country_code, p.party_id, r.value
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(exclude_platform_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let party = decode(row)?;
            let role: Option<String> = row.try_get("role")?;
            let role = match role {
                Some(role) => serde_json::from_value(serde_json::Value::String(role))?,
                None => Role::Other,
            };
            items.push(ClientInfo {
                party_id: party.party_id,
                country_code: party.country_code,
                role,
                status: party.status.unwrap_or(ConnectionStatus::Connected),
                last_updated: party.last_updated,
            });
        }

        Ok(Page {
            items,
            total: total as u64,
            offset,
            limit,
        })
    }

    /// Upserts a party. A stored party absorbs the incoming roles and details.
    ///
    /// Returns `None` when the stored copy did not change.
    pub async fn merge(&self, party: &Party) -> DbResult<Option<Party>> {
        let merged = match self.get(&party.key()).await? {
            Some(existing) => {
                let mut merged = existing.clone();
                merged.absorb(party);
                if merged == existing {
                    return Ok(None);
                }
                merged
            }
            None => party.clone(),
        };

        self.save(&merged).await?;
        Ok(Some(merged))
    }

    /// Creates a minimal party for an unknown identity.
    ///
    /// Returns true when the party was created.
    pub async fn ensure(&self, key: &PartyKey, platform_id: &str, now: DateTime<Utc>) -> DbResult<bool> {
        if self.get(key).await?.is_some() {
            return Ok(false);
        }
        debug!(party = %key, platform_id, "Auto-provisioning party");
        let result = sqlx::query(
            r#"
            INSERT INTO parties (country_code, party_id, platform_id, body, last_updated_ms)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(country_code, party_id) DO NOTHING
            "#,
        )
        .bind(&key.country_code)
        .bind(&key.party_id)
        .bind(platform_id)
        .bind(serde_json::to_string(&Party::provisioned(key, platform_id, now))?)
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Applies a client-info update to the party it describes.
    ///
    /// Stale updates (older `last_updated`) and identical ones are no-ops.
    pub async fn merge_client_info(&self, platform_id: &str, info: &ClientInfo) -> DbResult<Option<Party>> {
        let key = info.party();
        let mut party = match self.get(&key).await? {
            Some(existing) if existing.last_updated > info.last_updated => return Ok(None),
            Some(existing) => existing,
            None => Party::provisioned(&key, platform_id, info.last_updated),
        };
        let before = party.clone();

        if !party.roles.contains(&info.role) {
            party.roles.push(info.role);
            party.roles.sort();
        }
        party.status = Some(info.status);
        party.platform_id = platform_id.to_string();
        party.last_updated = info.last_updated;

        if party == before {
            return Ok(None);
        }
        self.save(&party).await?;
        Ok(Some(party))
    }

    pub async fn delete_by_platform(&self, platform_id: &str) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM parties WHERE platform_id = ?1")
            .bind(platform_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn save(&self, party: &Party) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO parties (country_code, party_id, platform_id, body, last_updated_ms)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(country_code, party_id) DO UPDATE SET
                platform_id = excluded.platform_id,
                body = excluded.body,
                last_updated_ms = excluded.last_updated_ms
            "#,
        )
        .bind(&party.country_code)
        .bind(&party.party_id)
        .bind(&party.platform_id)
        .bind(serde_json::to_string(party)?)
        .bind(to_millis(party.last_updated))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn decode(row: &sqlx::sqlite::SqliteRow) -> DbResult<Party> {
    let body: String = row.try_get("body")?;
    Ok(serde_json::from_str(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_db;
    use chrono::Duration;

    fn party(platform_id: &str, roles: Vec<Role>) -> Party {
        Party {
            country_code: "NL".into(),
            party_id: "ABC".into(),
            platform_id: platform_id.into(),
            roles,
            business_details: None,
            status: None,
            last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_merge_unions_roles() {
        let db = test_db().await;
        let repo = db.parties();

        assert!(repo.merge(&party("remote-a", vec![Role::Cpo])).await.unwrap().is_some());
        let merged = repo
            .merge(&party("remote-a", vec![Role::Emsp]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merged.roles, vec![Role::Cpo, Role::Emsp]);

        // Same roles again: nothing to do
        let mut again = party("remote-a", vec![Role::Cpo]);
        again.last_updated = merged.last_updated;
        assert!(repo.merge(&again).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ensure_provisions_once() {
        let db = test_db().await;
        let repo = db.parties();
        let key = PartyKey::new("DE", "NEW");

        assert!(repo.ensure(&key, "remote-a", Utc::now()).await.unwrap());
        assert!(!repo.ensure(&key, "remote-a", Utc::now()).await.unwrap());
        assert_eq!(repo.list_by_platform("remote-a").await.unwrap().len(), 1);
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_client_info_updates_status() {
        let db = test_db().await;
        let repo = db.parties();
        let now = Utc::now();
        let info = ClientInfo {
            party_id: "ABC".into(),
            country_code: "NL".into(),
            role: Role::Cpo,
            status: ConnectionStatus::Offline,
            last_updated: now,
        };

        let party = repo.merge_client_info("remote-a", &info).await.unwrap().unwrap();
        assert_eq!(party.status, Some(ConnectionStatus::Offline));
        assert!(repo.merge_client_info("remote-a", &info).await.unwrap().is_none());

        let stale = ClientInfo {
            status: ConnectionStatus::Connected,
            last_updated: now - Duration::minutes(1),
            ..info
        };
        assert!(repo.merge_client_info("remote-a", &stale).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_client_info_pages_one_row_per_role() {
        let db = test_db().await;
        let repo = db.parties();
        repo.merge(&party("remote-a", vec![Role::Cpo, Role::Emsp])).await.unwrap();
        repo.ensure(&PartyKey::new("DE", "BARE"), "remote-b", Utc::now())
            .await
            .unwrap();
        repo.ensure(&PartyKey::new("FR", "OWN"), "caller", Utc::now())
            .await
            .unwrap();

        let all = repo.search_client_info("caller", 0, 10).await.unwrap();
        assert_eq!(all.total, 3);
        let rows: Vec<(String, Role)> = all
            .items
            .iter()
            .map(|i| (i.party_id.clone(), i.role))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("BARE".to_string(), Role::Other),
                ("ABC".to_string(), Role::Cpo),
                ("ABC".to_string(), Role::Emsp),
            ]
        );
        assert!(all.items.iter().all(|i| i.status == ConnectionStatus::Connected));

        let page = repo.search_client_info("caller", 1, 1).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].role, Role::Cpo);
    }

    #[tokio::test]
    async fn test_delete_by_platform() {
        let db = test_db().await;
        let repo = db.parties();
        repo.merge(&party("remote-a", vec![Role::Cpo])).await.unwrap();
        assert_eq!(repo.delete_by_platform("remote-a").await.unwrap(), 1);
        assert!(repo.list_by_platform("remote-a").await.unwrap().is_empty());
    }
}
