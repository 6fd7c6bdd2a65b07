//! # Repository Module
//!
//! Database repository implementations for Ampere Hub.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Sync engine / HTTP handler                                            │
//! │       │                                                                 │
//! │       │  db.entities::<Location>().merge("remote-a", &location)        │
//! │       ▼                                                                 │
//! │  EntityRepository<Location>                                            │
//! │  ├── get(&self, party, id)                                             │
//! │  ├── merge(&self, platform_id, entity)  → Some(new) | None (no-op)     │
//! │  ├── put(&self, platform_id, entity)                                   │
//! │  └── search(&self, criteria)            → Page<Stored<T>>              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (JSON body + lookup columns)                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`PlatformRepository`](platform::PlatformRepository) - Platform directory
//! - [`PartyRepository`](party::PartyRepository) - Parties and client info
//! - [`EntityRepository`](entity::EntityRepository) - Synchronized entities
//! - [`CommandRepository`](command::CommandRepository) - Commands

pub mod command;
pub mod entity;
pub mod party;
pub mod platform;

use chrono::{DateTime, TimeZone, Utc};

/// Converts a timestamp to the stored unix-millisecond form.
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// One page of search results plus the total number of matches.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}
