//! # Inbound Ingestion
//!
//! Single-item ingestion shared by the receiver endpoints (remote pushes) and
//! the pull workers. Also serves the local sender endpoints.
//!
//! ## Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. The presenting platform must be CONNECTED                           │
//! │  2. A stored copy must be owned by the presenting platform              │
//! │     (local data is never overwritten by remote data)                   │
//! │  3. Unknown parties are auto-provisioned for the presenting platform   │
//! │  4. Merge (last write wins); a no-op merge ends here                   │
//! │  5. Notify the local backend                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use ampere_core::entity::apply_patch;
use ampere_core::validation::{validate_country_code, validate_object_id, validate_party_id};
use ampere_core::{ClientInfo, Connector, Evse, Location, Platform, PartyKey, Stored, SyncEntity};
use ampere_db::{Page, SearchCriteria};

use crate::context::HubContext;
use crate::error::{SyncError, SyncResult};
use crate::notifier::HubEvent;

#[derive(Debug, Clone)]
pub struct Inbound {
    ctx: HubContext,
}

impl Inbound {
    pub fn new(ctx: HubContext) -> Self {
        Inbound { ctx }
    }

    // =========================================================================
    // Whole Objects
    // =========================================================================

    /// Stores an entity received from `platform`.
    pub async fn ingest<T: SyncEntity>(&self, platform: &Platform, entity: T) -> SyncResult<bool> {
        require_connected(platform)?;
        validate_entity(&entity)?;

        if let Some(stored) = self.ctx.db.entities::<T>().get(&entity.party(), entity.id()).await? {
            check_owner(T::KIND, entity.id(), &stored.platform_id, platform)?;
        }
        self.claim_party(T::KIND, entity.id(), &entity.party(), platform).await?;

        self.store(platform, entity).await
    }

    /// Applies a partial update to an entity owned by `platform`.
    pub async fn patch<T: SyncEntity>(
        &self,
        platform: &Platform,
        party: &PartyKey,
        id: &str,
        patch: &Map<String, Value>,
    ) -> SyncResult<bool> {
        require_connected(platform)?;
        let stored = self
            .ctx
            .db
            .entities::<T>()
            .get(party, id)
            .await?
            .ok_or_else(|| SyncError::not_found(T::KIND, id))?;
        check_owner(T::KIND, id, &stored.platform_id, platform)?;

        let patched: T = apply_patch(&stored.entity, patch)?;
        if patched.id() != id || patched.party() != stored.entity.party() {
            return Err(SyncError::StateViolation(format!(
                "patch may not change the identity of {} {}",
                T::KIND,
                id
            )));
        }
        self.store(platform, patched).await
    }

    // =========================================================================
    // EVSEs & Connectors
    // =========================================================================

    /// Stores one EVSE into its parent location.
    pub async fn ingest_evse(
        &self,
        platform: &Platform,
        party: &PartyKey,
        location_id: &str,
        evse: Evse,
    ) -> SyncResult<bool> {
        let mut location = self.owned_location(platform, party, location_id).await?;
        if !location.upsert_evse(evse) {
            return Ok(false);
        }
        self.store(platform, location).await
    }

    /// Stores one connector into its parent EVSE.
    pub async fn ingest_connector(
        &self,
        platform: &Platform,
        party: &PartyKey,
        location_id: &str,
        evse_uid: &str,
        connector: Connector,
    ) -> SyncResult<bool> {
        let mut location = self.owned_location(platform, party, location_id).await?;
        match location.upsert_connector(evse_uid, connector) {
            None => Err(SyncError::not_found("Evse", evse_uid)),
            Some(false) => Ok(false),
            Some(true) => self.store(platform, location).await,
        }
    }

    pub async fn patch_evse(
        &self,
        platform: &Platform,
        party: &PartyKey,
        location_id: &str,
        evse_uid: &str,
        patch: &Map<String, Value>,
    ) -> SyncResult<bool> {
        let mut location = self.owned_location(platform, party, location_id).await?;
        let evse = location
            .evse(evse_uid)
            .ok_or_else(|| SyncError::not_found("Evse", evse_uid))?;
        let patched: Evse = apply_patch(evse, patch)?;
        if patched.uid != evse_uid {
            return Err(SyncError::StateViolation("patch may not change the EVSE uid".into()));
        }
        if !location.upsert_evse(patched) {
            return Ok(false);
        }
        self.store(platform, location).await
    }

    pub async fn patch_connector(
        &self,
        platform: &Platform,
        party: &PartyKey,
        location_id: &str,
        evse_uid: &str,
        connector_id: &str,
        patch: &Map<String, Value>,
    ) -> SyncResult<bool> {
        let mut location = self.owned_location(platform, party, location_id).await?;
        let connector = location
            .connector(evse_uid, connector_id)
            .ok_or_else(|| SyncError::not_found("Connector", connector_id))?;
        let patched: Connector = apply_patch(connector, patch)?;
        if patched.id != connector_id {
            return Err(SyncError::StateViolation("patch may not change the connector id".into()));
        }
        match location.upsert_connector(evse_uid, patched) {
            Some(true) => self.store(platform, location).await,
            _ => Ok(false),
        }
    }

    // =========================================================================
    // Client Info
    // =========================================================================

    /// Applies a party status update published by `platform`.
    pub async fn ingest_client_info(&self, platform: &Platform, info: ClientInfo) -> SyncResult<bool> {
        require_connected(platform)?;
        validate_country_code(&info.country_code)?;
        validate_party_id(&info.party_id)?;

        let key = info.party();
        if let Some(existing) = self.ctx.db.parties().get(&key).await? {
            check_owner("Party", &key.to_string(), &existing.platform_id, platform)?;
        }

        match self.ctx.db.parties().merge_client_info(&platform.id, &info).await? {
            Some(party) => {
                self.ctx
                    .notify(HubEvent::PartiesChanged { parties: vec![party] })
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // =========================================================================
    // Sender Endpoints
    // =========================================================================

    /// One page of stored entities for `caller`, excluding what it owns.
    pub async fn serve_page<T: SyncEntity>(
        &self,
        caller: &Platform,
        mut criteria: SearchCriteria,
    ) -> SyncResult<Page<Stored<T>>> {
        require_connected(caller)?;
        criteria.exclude_platform_id = Some(caller.id.clone());
        Ok(self.ctx.db.entities::<T>().search(&criteria).await?)
    }

    /// One page of party statuses for `caller`, one entry per party role.
    pub async fn serve_client_info(
        &self,
        caller: &Platform,
        offset: u64,
        limit: u64,
    ) -> SyncResult<Page<ClientInfo>> {
        require_connected(caller)?;
        Ok(self
            .ctx
            .db
            .parties()
            .search_client_info(&caller.id, offset, limit)
            .await?)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn store<T: SyncEntity>(&self, platform: &Platform, entity: T) -> SyncResult<bool> {
        self.ctx
            .db
            .parties()
            .ensure(&entity.party(), &platform.id, Utc::now())
            .await?;

        match self.ctx.db.entities::<T>().merge(&platform.id, &entity).await? {
            Some(merged) => {
                debug!(kind = T::KIND, id = merged.id(), platform_id = %platform.id, "Entity ingested");
                self.ctx
                    .notify(HubEvent::entity_changed(T::MODULE, &merged)?)
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Rejects entities of a party hosted by any other platform, local or remote.
    async fn claim_party(&self, kind: &str, id: &str, party: &PartyKey, platform: &Platform) -> SyncResult<()> {
        if let Some(existing) = self.ctx.db.parties().get(party).await? {
            if existing.platform_id != platform.id {
                warn!(
                    kind,
                    id,
                    party = %party,
                    owner = %existing.platform_id,
                    platform_id = %platform.id,
                    "Rejected write for a party hosted elsewhere"
                );
                return Err(SyncError::ownership(kind, id, existing.platform_id, &platform.id));
            }
        }
        Ok(())
    }

    async fn owned_location(&self, platform: &Platform, party: &PartyKey, location_id: &str) -> SyncResult<Location> {
        require_connected(platform)?;
        let stored = self
            .ctx
            .db
            .entities::<Location>()
            .get(party, location_id)
            .await?
            .ok_or_else(|| SyncError::not_found(Location::KIND, format!("{}/{}", party, location_id)))?;
        check_owner(Location::KIND, location_id, &stored.platform_id, platform)?;
        Ok(stored.entity)
    }
}

fn require_connected(platform: &Platform) -> SyncResult<()> {
    if !platform.is_reachable_peer() {
        return Err(SyncError::PlatformNotConnected(platform.id.clone()));
    }
    Ok(())
}

fn check_owner(kind: &str, id: &str, owner: &str, platform: &Platform) -> SyncResult<()> {
    if owner != platform.id {
        warn!(kind, id, owner, platform_id = %platform.id, "Ownership violation");
        return Err(SyncError::ownership(kind, id, owner, &platform.id));
    }
    Ok(())
}

pub(crate) fn validate_entity<T: SyncEntity>(entity: &T) -> SyncResult<()> {
    let party = entity.party();
    validate_country_code(&party.country_code)?;
    validate_party_id(&party.party_id)?;
    validate_object_id(entity.id())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{connect_remote, test_hub, TestHub, LOCAL_ID};
    use ampere_core::{Cdr, ConnectionStatus, ModuleId, Role, Session, Tariff, Token};
    use chrono::Duration;
    use serde_json::json;

    fn entity<T: SyncEntity>(id_field: &str, id: &str, cc: &str, pid: &str) -> T {
        serde_json::from_value(json!({
            "country_code": cc,
            "party_id": pid,
            id_field: id,
            "last_updated": Utc::now(),
        }))
        .unwrap()
    }

    fn location(id: &str) -> Location {
        serde_json::from_value(json!({
            "country_code": "DE",
            "party_id": "CPA",
            "id": id,
            "last_updated": Utc::now() - Duration::minutes(5),
            "evses": [{
                "uid": "EVSE1",
                "last_updated": Utc::now() - Duration::minutes(5),
                "connectors": [{ "id": "1", "last_updated": Utc::now() - Duration::minutes(5) }]
            }]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_ingest_provisions_party_and_notifies() {
        let TestHub { ctx, notifier, .. } = test_hub().await;
        let cpo = connect_remote(&ctx, "cpo-a", Role::Cpo).await;
        let inbound = ctx.inbound();

        assert!(inbound.ingest(&cpo, location("LOC1")).await.unwrap());

        let party = ctx.db.parties().get(&PartyKey::new("DE", "CPA")).await.unwrap().unwrap();
        assert_eq!(party.platform_id, "cpo-a");
        assert!(notifier.entity_events(ModuleId::Locations) >= 1);
    }

    #[tokio::test]
    async fn test_identical_ingest_is_noop() {
        let TestHub { ctx, notifier, .. } = test_hub().await;
        let cpo = connect_remote(&ctx, "cpo-a", Role::Cpo).await;
        let inbound = ctx.inbound();
        let loc = location("LOC1");

        assert!(inbound.ingest(&cpo, loc.clone()).await.unwrap());
        assert!(!inbound.ingest(&cpo, loc).await.unwrap());
        assert_eq!(notifier.entity_events(ModuleId::Locations), 1);
    }

    #[tokio::test]
    async fn test_requires_connected_platform() {
        let TestHub { ctx, .. } = test_hub().await;
        let mut cpo = connect_remote(&ctx, "cpo-a", Role::Cpo).await;
        cpo.status = ConnectionStatus::Offline;

        let err = ctx.inbound().ingest(&cpo, location("LOC1")).await.unwrap_err();
        assert!(matches!(err, SyncError::PlatformNotConnected(_)));
    }

    async fn assert_rejects_local<T: SyncEntity>(ctx: &HubContext, remote: &Platform, local: T) {
        ctx.db.entities::<T>().put(LOCAL_ID, &local).await.unwrap();
        let err = ctx.inbound().ingest(remote, local.clone()).await.unwrap_err();
        assert!(
            matches!(err, SyncError::OwnershipViolation { .. }),
            "{} accepted a remote write over local data",
            T::KIND
        );
        let mut patch = Map::new();
        patch.insert("extra".into(), json!(1));
        let err = ctx
            .inbound()
            .patch::<T>(remote, &local.party(), local.id(), &patch)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::OwnershipViolation { .. }));
    }

    #[tokio::test]
    async fn test_local_data_is_never_overwritten_by_any_module() {
        let TestHub { ctx, .. } = test_hub().await;
        let remote = connect_remote(&ctx, "hub-b", Role::Hub).await;

        assert_rejects_local(&ctx, &remote, location("LOC9")).await;
        assert_rejects_local::<Tariff>(&ctx, &remote, entity("id", "TAR1", "DE", "XXX")).await;
        assert_rejects_local::<Token>(&ctx, &remote, entity("uid", "TOK1", "DE", "XXX")).await;
        assert_rejects_local::<Session>(&ctx, &remote, entity("id", "SES1", "DE", "XXX")).await;
        assert_rejects_local::<Cdr>(&ctx, &remote, entity("id", "CDR1", "DE", "XXX")).await;

        let party = PartyKey::new("DE", "CPA");
        let evse: Evse = serde_json::from_value(json!({ "uid": "EVSE2", "last_updated": Utc::now() })).unwrap();
        let err = ctx.inbound().ingest_evse(&remote, &party, "LOC9", evse).await.unwrap_err();
        assert!(matches!(err, SyncError::OwnershipViolation { .. }));

        let connector: Connector = serde_json::from_value(json!({ "id": "2", "last_updated": Utc::now() })).unwrap();
        let err = ctx
            .inbound()
            .ingest_connector(&remote, &party, "LOC9", "EVSE1", connector)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::OwnershipViolation { .. }));

        let err = ctx
            .inbound()
            .patch_connector(&remote, &party, "LOC9", "EVSE1", "1", &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::OwnershipViolation { .. }));

        let info = ClientInfo {
            party_id: "AMP".into(),
            country_code: "NL".into(),
            role: Role::Hub,
            status: ConnectionStatus::Offline,
            last_updated: Utc::now(),
        };
        let err = ctx.inbound().ingest_client_info(&remote, info).await.unwrap_err();
        assert!(matches!(err, SyncError::OwnershipViolation { .. }));
    }

    #[tokio::test]
    async fn test_other_remote_data_is_rejected() {
        let TestHub { ctx, .. } = test_hub().await;
        let a = connect_remote(&ctx, "cpo-a", Role::Cpo).await;
        let b = connect_remote(&ctx, "cpo-b", Role::Cpo).await;

        ctx.inbound().ingest(&a, location("LOC1")).await.unwrap();
        let err = ctx.inbound().ingest(&b, location("LOC1")).await.unwrap_err();
        assert!(matches!(err, SyncError::OwnershipViolation { .. }));
    }

    #[tokio::test]
    async fn test_new_object_for_party_of_other_remote_is_rejected() {
        let TestHub { ctx, .. } = test_hub().await;
        let a = connect_remote(&ctx, "cpo-a", Role::Cpo).await;
        let b = connect_remote(&ctx, "cpo-b", Role::Cpo).await;

        ctx.inbound().ingest(&a, location("LOC1")).await.unwrap();
        let err = ctx.inbound().ingest(&b, location("LOC2")).await.unwrap_err();
        assert!(matches!(err, SyncError::OwnershipViolation { .. }));

        let party = PartyKey::new("DE", "CPA");
        assert!(ctx.db.entities::<Location>().get(&party, "LOC2").await.unwrap().is_none());
        let owner = ctx.db.parties().get(&party).await.unwrap().unwrap();
        assert_eq!(owner.platform_id, "cpo-a");
    }

    #[tokio::test]
    async fn test_same_id_is_independent_per_party() {
        let TestHub { ctx, .. } = test_hub().await;
        let a = connect_remote(&ctx, "cpo-a", Role::Cpo).await;
        let b = connect_remote(&ctx, "cpo-b", Role::Cpo).await;

        let first: Tariff = entity("id", "1", "DE", "CPA");
        let second: Tariff = entity("id", "1", "FR", "CPB");
        assert!(ctx.inbound().ingest(&a, first).await.unwrap());
        assert!(ctx.inbound().ingest(&b, second).await.unwrap());

        let repo = ctx.db.entities::<Tariff>();
        let stored_a = repo.get(&PartyKey::new("DE", "CPA"), "1").await.unwrap().unwrap();
        let stored_b = repo.get(&PartyKey::new("FR", "CPB"), "1").await.unwrap().unwrap();
        assert_eq!(stored_a.platform_id, "cpo-a");
        assert_eq!(stored_b.platform_id, "cpo-b");

        let mut patch = Map::new();
        patch.insert("currency".into(), json!("EUR"));
        patch.insert("last_updated".into(), json!(Utc::now()));
        assert!(ctx
            .inbound()
            .patch::<Tariff>(&b, &PartyKey::new("FR", "CPB"), "1", &patch)
            .await
            .unwrap());
        let err = ctx
            .inbound()
            .patch::<Tariff>(&b, &PartyKey::new("DE", "CPA"), "1", &patch)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::OwnershipViolation { .. }));
    }

    #[tokio::test]
    async fn test_entity_of_local_party_is_rejected() {
        let TestHub { ctx, .. } = test_hub().await;
        let cpo = connect_remote(&ctx, "cpo-a", Role::Cpo).await;

        let tariff: Tariff = entity("id", "TAR1", "NL", "AMP");
        let err = ctx.inbound().ingest(&cpo, tariff).await.unwrap_err();
        assert!(matches!(err, SyncError::OwnershipViolation { .. }));
    }

    #[tokio::test]
    async fn test_evse_and_connector_updates_merge_into_location() {
        let TestHub { ctx, notifier, .. } = test_hub().await;
        let cpo = connect_remote(&ctx, "cpo-a", Role::Cpo).await;
        let inbound = ctx.inbound();
        let party = PartyKey::new("DE", "CPA");
        inbound.ingest(&cpo, location("LOC1")).await.unwrap();

        let evse: Evse =
            serde_json::from_value(json!({ "uid": "EVSE2", "status": "AVAILABLE", "last_updated": Utc::now() }))
                .unwrap();
        assert!(inbound.ingest_evse(&cpo, &party, "LOC1", evse).await.unwrap());

        let mut patch = Map::new();
        patch.insert("status".into(), json!("CHARGING"));
        patch.insert("last_updated".into(), json!(Utc::now()));
        assert!(inbound.patch_evse(&cpo, &party, "LOC1", "EVSE2", &patch).await.unwrap());

        let stored = ctx.db.entities::<Location>().get(&party, "LOC1").await.unwrap().unwrap().entity;
        assert_eq!(stored.evses.len(), 2);
        assert_eq!(stored.evse("EVSE2").unwrap().details["status"], json!("CHARGING"));

        let connector: Connector = serde_json::from_value(json!({ "id": "9", "last_updated": Utc::now() })).unwrap();
        let err = inbound
            .ingest_connector(&cpo, &party, "LOC1", "NOPE", connector)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
        assert_eq!(notifier.entity_events(ModuleId::Locations), 3);
    }

    #[tokio::test]
    async fn test_patch_unknown_entity_is_not_found() {
        let TestHub { ctx, .. } = test_hub().await;
        let cpo = connect_remote(&ctx, "cpo-a", Role::Cpo).await;
        let err = ctx
            .inbound()
            .patch::<Tariff>(&cpo, &PartyKey::new("DE", "CPA"), "NOPE", &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_client_info_updates_party() {
        let TestHub { ctx, notifier, .. } = test_hub().await;
        let hub = connect_remote(&ctx, "hub-b", Role::Hub).await;
        let info = ClientInfo {
            party_id: "XYZ".into(),
            country_code: "BE".into(),
            role: Role::Cpo,
            status: ConnectionStatus::Offline,
            last_updated: Utc::now(),
        };

        assert!(ctx.inbound().ingest_client_info(&hub, info.clone()).await.unwrap());
        assert!(!ctx.inbound().ingest_client_info(&hub, info).await.unwrap());

        let party = ctx.db.parties().get(&PartyKey::new("BE", "XYZ")).await.unwrap().unwrap();
        assert_eq!(party.status, Some(ConnectionStatus::Offline));
        assert_eq!(notifier.count("parties_changed"), 1);
    }

    #[tokio::test]
    async fn test_sender_page_excludes_caller_data() {
        let TestHub { ctx, .. } = test_hub().await;
        let a = connect_remote(&ctx, "cpo-a", Role::Cpo).await;
        let b = connect_remote(&ctx, "emsp-b", Role::Emsp).await;
        ctx.inbound().ingest(&a, location("LOC1")).await.unwrap();

        let criteria = SearchCriteria {
            limit: 10,
            ..SearchCriteria::default()
        };
        let own = ctx.inbound().serve_page::<Location>(&a, criteria.clone()).await.unwrap();
        assert_eq!(own.total, 0);
        let other = ctx.inbound().serve_page::<Location>(&b, criteria).await.unwrap();
        assert_eq!(other.items.len(), 1);

        let infos = ctx.inbound().serve_client_info(&b, 0, 10).await.unwrap();
        assert!(infos.items.iter().any(|i| i.party_id == "AMP"));
        assert!(infos.items.iter().any(|i| i.party_id == "CPA"));
    }
}
