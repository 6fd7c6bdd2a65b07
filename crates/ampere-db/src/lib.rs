//! # ampere-db: Database Layer for Ampere Hub
//!
//! Everything the hub persists lives here: the platform directory, parties,
//! synchronized entities and commands. SQLite through sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Ampere Hub Data Flow                             │
//! │                                                                         │
//! │  HTTP handler / pull worker / deadline sweep                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     ampere-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │  │   │
//! │  │   │               │    │ PlatformRepo   │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ PartyRepo      │    │ 001_initial  │  │   │
//! │  │   │               │    │ EntityRepo<T>  │    │              │  │   │
//! │  │   │               │    │ CommandRepo    │    │              │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database (hub.db, WAL mode)                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ampere_db::{Database, DbConfig};
//! use ampere_core::Location;
//!
//! let db = Database::new(DbConfig::new("hub.db")).await?;
//! let changed = db.entities::<Location>().merge("remote-a", &location).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

#[cfg(test)]
pub(crate) mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::command::{CommandRepository, IssuedBy};
pub use repository::entity::{EntityRepository, SearchCriteria};
pub use repository::party::PartyRepository;
pub use repository::platform::PlatformRepository;
pub use repository::Page;
