//! # Synchronizable Entities
//!
//! Every entity the hub keeps in sync carries the same envelope: a party
//! identity, an object id and a `last_updated` timestamp. The remaining fields
//! are protocol payload the hub stores and forwards without interpreting, so
//! they live in a flattened `details` map.
//!
//! ## Ownership
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Stored<T>                                                              │
//! │  ├── entity        ← the wire object                                    │
//! │  ├── platform_id   ← owning platform (local ⇒ pushed out,               │
//! │  │                   remote ⇒ received/pulled in)                       │
//! │  ├── ref_id        ← optional external reference                        │
//! │  └── last_sent     ← last successful outbound push                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::party::PartyKey;
use crate::platform::{ConnectionStatus, ModuleId, Role};

// =============================================================================
// SyncEntity Trait
// =============================================================================

/// An object that travels through the push/pull pipeline.
pub trait SyncEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Module the entity belongs to.
    const MODULE: ModuleId;

    /// Human readable type name used in logs and errors.
    const KIND: &'static str;

    /// Object id, unique within the module.
    fn id(&self) -> &str;

    fn party(&self) -> PartyKey;

    fn last_updated(&self) -> DateTime<Utc>;

    /// Path segments appended to a receiver endpoint to address this object.
    fn object_path(&self) -> Vec<String> {
        let party = self.party();
        vec![party.country_code, party.party_id, self.id().to_string()]
    }
}

/// A stored entity together with its bookkeeping columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Stored<T> {
    pub entity: T,
    pub platform_id: String,
    pub ref_id: Option<String>,
    pub last_sent: Option<DateTime<Utc>>,
}

macro_rules! sync_entity {
    ($ty:ty, $module:expr, $kind:literal, $id:ident) => {
        impl SyncEntity for $ty {
            const MODULE: ModuleId = $module;
            const KIND: &'static str = $kind;

            fn id(&self) -> &str {
                &self.$id
            }

            fn party(&self) -> PartyKey {
                PartyKey::new(&self.country_code, &self.party_id)
            }

            fn last_updated(&self) -> DateTime<Utc> {
                self.last_updated
            }
        }
    };
}

// =============================================================================
// Locations
// =============================================================================

/// A connector of an EVSE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    pub id: String,
    pub last_updated: DateTime<Utc>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// A charge point (EVSE) at a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evse {
    pub uid: String,
    #[serde(default)]
    pub connectors: Vec<Connector>,
    pub last_updated: DateTime<Utc>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// A charging location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub country_code: String,
    pub party_id: String,
    pub id: String,
    #[serde(default)]
    pub evses: Vec<Evse>,
    pub last_updated: DateTime<Utc>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

sync_entity!(Location, ModuleId::Locations, "Location", id);

impl Location {
    pub fn evse(&self, uid: &str) -> Option<&Evse> {
        self.evses.iter().find(|e| e.uid == uid)
    }

    pub fn connector(&self, evse_uid: &str, connector_id: &str) -> Option<&Connector> {
        self.evse(evse_uid)
            .and_then(|e| e.connectors.iter().find(|c| c.id == connector_id))
    }

    /// Inserts or replaces an EVSE. Returns false when the stored copy was identical.
    pub fn upsert_evse(&mut self, evse: Evse) -> bool {
        let updated = evse.last_updated;
        match self.evses.iter_mut().find(|e| e.uid == evse.uid) {
            Some(existing) if *existing == evse => return false,
            Some(existing) => *existing = evse,
            None => self.evses.push(evse),
        }
        self.touch(updated);
        true
    }

    /// Inserts or replaces a connector of an existing EVSE.
    ///
    /// Returns `None` when the EVSE does not exist, otherwise whether anything changed.
    pub fn upsert_connector(&mut self, evse_uid: &str, connector: Connector) -> Option<bool> {
        let updated = connector.last_updated;
        let evse = self.evses.iter_mut().find(|e| e.uid == evse_uid)?;
        match evse.connectors.iter_mut().find(|c| c.id == connector.id) {
            Some(existing) if *existing == connector => return Some(false),
            Some(existing) => *existing = connector,
            None => evse.connectors.push(connector),
        }
        if updated > evse.last_updated {
            evse.last_updated = updated;
        }
        self.touch(updated);
        Some(true)
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_updated {
            self.last_updated = at;
        }
    }
}

// =============================================================================
// Tariffs, Tokens, Sessions, CDRs
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tariff {
    pub country_code: String,
    pub party_id: String,
    pub id: String,
    pub last_updated: DateTime<Utc>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

sync_entity!(Tariff, ModuleId::Tariffs, "Tariff", id);

/// An authorization token issued by a service provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub country_code: String,
    pub party_id: String,
    pub uid: String,
    pub last_updated: DateTime<Utc>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

sync_entity!(Token, ModuleId::Tokens, "Token", uid);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub country_code: String,
    pub party_id: String,
    pub id: String,
    pub last_updated: DateTime<Utc>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

sync_entity!(Session, ModuleId::Sessions, "Session", id);

/// A finalized charge detail record.
///
/// CDRs are posted to the receiver endpoint itself, never addressed by path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cdr {
    pub country_code: String,
    pub party_id: String,
    pub id: String,
    pub last_updated: DateTime<Utc>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl SyncEntity for Cdr {
    const MODULE: ModuleId = ModuleId::Cdrs;
    const KIND: &'static str = "Cdr";

    fn id(&self) -> &str {
        &self.id
    }

    fn party(&self) -> PartyKey {
        PartyKey::new(&self.country_code, &self.party_id)
    }

    fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    fn object_path(&self) -> Vec<String> {
        Vec::new()
    }
}

// =============================================================================
// Client Info
// =============================================================================

/// Connection status of a party, as published by hubs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub party_id: String,
    pub country_code: String,
    pub role: Role,
    pub status: ConnectionStatus,
    pub last_updated: DateTime<Utc>,
}

impl ClientInfo {
    pub fn party(&self) -> PartyKey {
        PartyKey::new(&self.country_code, &self.party_id)
    }

    pub fn object_path(&self) -> Vec<String> {
        vec![self.country_code.clone(), self.party_id.clone()]
    }
}

// =============================================================================
// Partial Updates
// =============================================================================

/// Applies a shallow JSON merge of `patch` onto `target`.
///
/// Only top-level keys are replaced; a `null` value removes the key.
pub fn apply_patch<T: Serialize + DeserializeOwned>(target: &T, patch: &Map<String, Value>) -> serde_json::Result<T> {
    let mut value = serde_json::to_value(target)?;
    if let Value::Object(object) = &mut value {
        for (key, patch_value) in patch {
            if patch_value.is_null() {
                object.remove(key);
            } else {
                object.insert(key.clone(), patch_value.clone());
            }
        }
    }
    serde_json::from_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn location() -> Location {
        serde_json::from_value(json!({
            "country_code": "NL",
            "party_id": "ABC",
            "id": "LOC1",
            "name": "Station",
            "last_updated": "2026-01-01T00:00:00Z",
            "evses": [{
                "uid": "E1",
                "status": "AVAILABLE",
                "last_updated": "2026-01-01T00:00:00Z",
                "connectors": [{"id": "1", "standard": "IEC_62196_T2", "last_updated": "2026-01-01T00:00:00Z"}]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_details_are_preserved() {
        let loc = location();
        assert_eq!(loc.details.get("name"), Some(&json!("Station")));
        let back = serde_json::to_value(&loc).unwrap();
        assert_eq!(back["evses"][0]["connectors"][0]["standard"], json!("IEC_62196_T2"));
    }

    #[test]
    fn test_object_path() {
        assert_eq!(location().object_path(), vec!["NL", "ABC", "LOC1"]);
        let cdr = Cdr {
            country_code: "NL".into(),
            party_id: "ABC".into(),
            id: "CDR1".into(),
            last_updated: Utc::now(),
            details: Map::new(),
        };
        assert!(cdr.object_path().is_empty());
    }

    #[test]
    fn test_upsert_evse_detects_no_change() {
        let mut loc = location();
        let same = loc.evses[0].clone();
        assert!(!loc.upsert_evse(same));

        let mut changed = loc.evses[0].clone();
        changed.details.insert("status".into(), json!("CHARGING"));
        changed.last_updated += Duration::minutes(5);
        assert!(loc.upsert_evse(changed.clone()));
        assert_eq!(loc.last_updated, changed.last_updated);
    }

    #[test]
    fn test_upsert_connector_requires_evse() {
        let mut loc = location();
        let connector = loc.evses[0].connectors[0].clone();
        assert_eq!(loc.upsert_connector("MISSING", connector.clone()), None);
        assert_eq!(loc.upsert_connector("E1", connector), Some(false));

        let new_connector = Connector {
            id: "2".into(),
            last_updated: loc.last_updated + Duration::minutes(1),
            details: Map::new(),
        };
        assert_eq!(loc.upsert_connector("E1", new_connector), Some(true));
        assert!(loc.connector("E1", "2").is_some());
    }

    #[test]
    fn test_apply_patch_replaces_top_level_keys() {
        let loc = location();
        let mut patch = Map::new();
        patch.insert("name".into(), json!("Renamed"));
        patch.insert("last_updated".into(), json!("2026-02-01T00:00:00Z"));

        let patched = apply_patch(&loc, &patch).unwrap();
        assert_eq!(patched.details.get("name"), Some(&json!("Renamed")));
        assert_eq!(patched.evses.len(), 1);
        assert!(patched.last_updated > loc.last_updated);
    }
}
