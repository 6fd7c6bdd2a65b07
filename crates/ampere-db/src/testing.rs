//! Fixtures shared by the repository tests.

use chrono::Utc;

use ampere_core::{ConnectionStatus, Location, Platform, Role};

use crate::pool::{Database, DbConfig};

pub async fn test_db() -> Database {
    Database::new(DbConfig::in_memory())
        .await
        .expect("in-memory database")
}

pub fn local_platform(id: &str) -> Platform {
    let mut platform = remote_platform(id);
    platform.is_local = true;
    platform.role = Role::Hub;
    platform.versions_url = Some("https://hub.example.com/ocpi/versions".into());
    platform
}

pub fn remote_platform(id: &str) -> Platform {
    let mut platform = Platform::planned(
        id,
        Role::Cpo,
        format!("https://{}.example.com/ocpi/versions", id),
        format!("token-a-{}", id),
        Utc::now(),
    );
    platform.status = ConnectionStatus::Connected;
    platform
}

pub fn location(id: &str) -> Location {
    Location {
        country_code: "NL".into(),
        party_id: "ABC".into(),
        id: id.into(),
        evses: Vec::new(),
        last_updated: Utc::now(),
        details: Default::default(),
    }
}
