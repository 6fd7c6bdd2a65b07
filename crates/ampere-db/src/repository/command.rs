//! # Command Repository
//!
//! Stores commands and guards their single terminal transition.
//!
//! ## Conditional Transition
//! ```text
//! UPDATE commands SET status = ?, body = ?
//!  WHERE id = ? AND status = 'ACCEPTED_REQUEST'
//!
//! rows_affected = 1  → this caller won the transition
//! rows_affected = 0  → another writer (late result or deadline sweep) won
//! ```

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use ampere_core::{Command, CommandKind, CommandStatus};

use super::to_millis;
use crate::error::DbResult;

/// Which side issued the commands a sweep is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuedBy<'a> {
    /// Commands issued by the local platform (identified by its id).
    Local(&'a str),
    /// Commands issued by any platform other than the local one.
    Remote(&'a str),
}

/// Repository for command operations.
#[derive(Debug, Clone)]
pub struct CommandRepository {
    pool: SqlitePool,
}

impl CommandRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CommandRepository { pool }
    }

    pub async fn insert(&self, command: &Command) -> DbResult<()> {
        debug!(command_id = %command.id, kind = %command.kind(), "Storing command");

        sqlx::query(
            r#"
            INSERT INTO commands (
                id, kind, status, platform_id, target_ref, auth_reference,
                deadline_ms, last_updated_ms, body
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&command.id)
        .bind(command.kind().as_str())
        .bind(command.status.as_str())
        .bind(&command.platform_id)
        .bind(command.target_ref())
        .bind(&command.auth_reference)
        .bind(to_millis(command.deadline))
        .bind(to_millis(command.last_updated))
        .bind(serde_json::to_string(command)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<Command>> {
        let row = sqlx::query("SELECT body FROM commands WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode(&r)).transpose()
    }

    /// Persists a transition out of `ACCEPTED_REQUEST`.
    ///
    /// Returns false when the stored command was no longer pending.
    pub async fn complete(&self, command: &Command) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE commands
               SET status = ?1, last_updated_ms = ?2, body = ?3
             WHERE id = ?4 AND status = ?5
            "#,
        )
        .bind(command.status.as_str())
        .bind(to_millis(command.last_updated))
        .bind(serde_json::to_string(command)?)
        .bind(&command.id)
        .bind(CommandStatus::AcceptedRequest.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Pending commands whose deadline lies before `now`.
    pub async fn find_expired(&self, now: DateTime<Utc>, issued_by: IssuedBy<'_>) -> DbResult<Vec<Command>> {
        let (clause, local_id) = match issued_by {
            IssuedBy::Local(id) => ("platform_id = ?3", id),
            IssuedBy::Remote(id) => ("platform_id <> ?3", id),
        };
        let sql = format!(
            "SELECT body FROM commands WHERE status = ?1 AND deadline_ms < ?2 AND {} ORDER BY deadline_ms",
            clause
        );

        let rows = sqlx::query(&sql)
            .bind(CommandStatus::AcceptedRequest.as_str())
            .bind(to_millis(now))
            .bind(local_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode).collect()
    }

    /// Commands of `kind` that refer to a session or reservation.
    pub async fn find_by_target(&self, kind: CommandKind, target_ref: &str) -> DbResult<Vec<Command>> {
        let rows = sqlx::query(
            "SELECT body FROM commands WHERE kind = ?1 AND target_ref = ?2 ORDER BY last_updated_ms",
        )
        .bind(kind.as_str())
        .bind(target_ref)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode).collect()
    }
}

fn decode(row: &sqlx::sqlite::SqliteRow) -> DbResult<Command> {
    let body: String = row.try_get("body")?;
    Ok(serde_json::from_str(&body)?)
}
