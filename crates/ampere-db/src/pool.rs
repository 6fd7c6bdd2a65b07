//! # Database Pool Management
//!
//! Connection pool creation and configuration for SQLite.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Database Connection Pool                           │
//! │                                                                         │
//! │  Hub startup                                                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbConfig::new(path) ← Configure pool settings                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config).await ← Create pool + run migrations            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────┐                           │
//! │  │            SqlitePool                    │                           │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐       │                           │
//! │  │  │Conn1│ │Conn2│ │Conn3│ │Conn4│ ...   │  (max_connections)        │
//! │  │  └─────┘ └─────┘ └─────┘ └─────┘       │                           │
//! │  └─────────────────────────────────────────┘                           │
//! │       │                                                                 │
//! │       │ Shared by HTTP handlers, pull workers and sweeps               │
//! │       ▼                                                                 │
//! │  db.platforms() / db.parties() / db.entities::<T>() / db.commands()    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use ampere_core::SyncEntity;

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::command::CommandRepository;
use crate::repository::entity::EntityRepository;
use crate::repository::party::PartyRepository;
use crate::repository::platform::PlatformRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/ampere/hub.db")
///     .max_connections(8)
///     .min_connections(1);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file, `None` for an in-memory database.
    pub database_path: Option<PathBuf>,

    /// Maximum number of connections in the pool.
    /// Default: 8 (pull workers write concurrently)
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    pub min_connections: u32,

    /// Connection acquire timeout.
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection, `None` keeps connections forever.
    pub idle_timeout: Option<Duration>,

    /// Whether to run migrations on connect.
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a new database configuration with the given path.
    ///
    /// The file is created if it doesn't exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: Some(path.into()),
            max_connections: 8,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            run_migrations: true,
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets whether to run migrations on connect.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// A single connection that never idles out holds the database alive.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: None,
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: None,
            run_migrations: true,
        }
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let options = match &self.database_path {
            Some(path) => SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
                // Readers don't block writers, writers don't block readers
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .create_if_missing(true),
            None => SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?,
        };
        Ok(options)
    }
}

// =============================================================================
// Database
// =============================================================================

/// Main database handle providing repository access.
///
/// Cloning is cheap: all clones share one pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Creates the connection pool and runs migrations (if enabled).
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = ?config.database_path,
            "Initializing database connection"
        );

        let connect_options = config.connect_options()?;
        debug!("Connection options configured");

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(config.idle_timeout);
        if config.database_path.is_none() {
            pool_options = pool_options.max_lifetime(None::<Duration>);
        }

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database pool created"
        );

        let db = Database { pool };

        if config.run_migrations {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Runs database migrations. Idempotent.
    pub async fn run_migrations(&self) -> DbResult<()> {
        info!("Running database migrations");
        migrations::run_migrations(&self.pool).await?;
        info!("Migrations complete");
        Ok(())
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns the platform directory repository.
    pub fn platforms(&self) -> PlatformRepository {
        PlatformRepository::new(self.pool.clone())
    }

    pub fn parties(&self) -> PartyRepository {
        PartyRepository::new(self.pool.clone())
    }

    /// Returns the repository for one entity type.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let stored = db.entities::<Location>().get(&PartyKey::new("NL", "ABC"), "LOC1").await?;
    /// ```
    pub fn entities<T: SyncEntity>(&self) -> EntityRepository<T> {
        EntityRepository::new(self.pool.clone())
    }

    pub fn commands(&self) -> CommandRepository {
        CommandRepository::new(self.pool.clone())
    }

    /// Deletes every party and entity owned by `platform_id`.
    ///
    /// The platform row and its command history are kept.
    /// Returns the number of deleted rows.
    pub async fn purge_platform_data(&self, platform_id: &str) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;

        let parties = sqlx::query("DELETE FROM parties WHERE platform_id = ?1")
            .bind(platform_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let entities = sqlx::query("DELETE FROM entities WHERE platform_id = ?1")
            .bind(platform_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        info!(platform_id, parties, entities, "Purged platform data");
        Ok(parties + entities)
    }

    /// Closes the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// Checks if the database is healthy (can execute queries).
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{location, remote_platform};
    use ampere_core::{Location, Party, PartyKey};
    use chrono::Utc;

    #[tokio::test]
    async fn test_in_memory_database() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.health_check().await);

        let (total, applied) = migrations::migration_status(db.pool()).await.unwrap();
        assert_eq!(total, applied);
    }

    #[tokio::test]
    async fn test_config_builder() {
        let config = DbConfig::new("/tmp/ampere-test.db")
            .max_connections(10)
            .min_connections(2);

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert!(config.idle_timeout.is_some());
    }

    #[tokio::test]
    async fn test_purge_platform_data_keeps_other_platforms() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.platforms().save(&remote_platform("remote-a")).await.unwrap();

        db.entities::<Location>().put("remote-a", &location("LOC1")).await.unwrap();
        db.entities::<Location>().put("remote-b", &location("LOC2")).await.unwrap();
        db.parties()
            .merge(&Party::provisioned(&PartyKey::new("NL", "ABC"), "remote-a", Utc::now()))
            .await
            .unwrap();

        let party = PartyKey::new("NL", "ABC");
        let deleted = db.purge_platform_data("remote-a").await.unwrap();
        assert_eq!(deleted, 2);
        assert!(db.entities::<Location>().get(&party, "LOC1").await.unwrap().is_none());
        assert!(db.entities::<Location>().get(&party, "LOC2").await.unwrap().is_some());
        assert!(db.platforms().get("remote-a").await.unwrap().is_some());
    }
}
