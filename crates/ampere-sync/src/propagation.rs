//! # Change Propagation
//!
//! Pushes locally authored changes to every eligible remote platform.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  on_local_changed(entity)                                               │
//! │    │                                                                    │
//! │    ├─ stored copy owned by a remote?  → OwnershipViolation              │
//! │    ├─ merge as local                                                    │
//! │    ├─ no change?                      → Ok(None), nothing pushed        │
//! │    │                                                                    │
//! │    └─ for each CONNECTED remote:                                        │
//! │         origin platform?               skip                             │
//! │         role excluded for module?      skip                             │
//! │         no receiver endpoint?          skip (debug)                     │
//! │         push disabled for module?      skip (debug)                     │
//! │         otherwise                      dispatch PUT / POST (detached)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Dispatches are fire-and-forget: a failing remote is logged and never rolls
//! back the local write or blocks the other remotes.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use ampere_core::{
    ClientInfo, Connector, Evse, InterfaceRole, Location, ModuleId, Party, PartyKey, Platform,
    RoutingContext, SyncEntity,
};

use crate::context::HubContext;
use crate::error::{SyncError, SyncResult};
use crate::inbound::validate_entity;
use crate::modules::push_excluded;
use crate::remote::RemoteTarget;

/// How a change is delivered to a receiver endpoint.
#[derive(Debug, Clone, PartialEq)]
enum Delivery {
    /// `PUT {endpoint}/{path...}`
    Put { path: Vec<String>, body: Value },
    /// `POST {endpoint}`
    Post { body: Value },
}

impl Delivery {
    fn for_entity<T: SyncEntity>(entity: &T) -> SyncResult<Self> {
        let body = serde_json::to_value(entity)?;
        let path = entity.object_path();
        Ok(if path.is_empty() {
            Delivery::Post { body }
        } else {
            Delivery::Put { path, body }
        })
    }

    fn put<B: Serialize>(path: Vec<String>, body: &B) -> SyncResult<Self> {
        Ok(Delivery::Put {
            path,
            body: serde_json::to_value(body)?,
        })
    }
}

pub struct Propagation {
    ctx: HubContext,
}

impl Propagation {
    pub fn new(ctx: HubContext) -> Self {
        Propagation { ctx }
    }

    // =========================================================================
    // Entry Points
    // =========================================================================

    /// Records a local change and pushes it.
    ///
    /// Returns `None` when the change was a no-op; nothing is pushed then.
    pub async fn on_local_changed<T: SyncEntity>(&self, entity: T) -> SyncResult<Option<T>> {
        validate_entity(&entity)?;
        let local_id = self.ctx.local.platform_id();
        let repo = self.ctx.db.entities::<T>();

        if let Some(stored) = repo.get(&entity.party(), entity.id()).await? {
            check_local_owner(T::KIND, entity.id(), &stored.platform_id, local_id)?;
        }
        self.ctx.db.parties().ensure(&entity.party(), local_id, Utc::now()).await?;

        let Some(merged) = repo.merge(local_id, &entity).await? else {
            debug!(kind = T::KIND, id = entity.id(), "Local change is a no-op, not pushing");
            return Ok(None);
        };

        let delivery = Delivery::for_entity(&merged)?;
        self.fan_out::<T>(local_id, &merged.party(), merged.id(), delivery)
            .await?;
        Ok(Some(merged))
    }

    /// Records a change to one EVSE of a local location and pushes only the EVSE.
    pub async fn on_local_evse_changed(
        &self,
        party: &PartyKey,
        location_id: &str,
        evse: Evse,
    ) -> SyncResult<Option<Location>> {
        let mut location = self.local_location(party, location_id).await?;
        let path = vec![
            party.country_code.clone(),
            party.party_id.clone(),
            location_id.to_string(),
            evse.uid.clone(),
        ];
        let delivery = Delivery::put(path, &evse)?;

        if !location.upsert_evse(evse) {
            return Ok(None);
        }
        self.store_location(location, delivery).await
    }

    /// Records a change to one connector of a local location and pushes only the connector.
    pub async fn on_local_connector_changed(
        &self,
        party: &PartyKey,
        location_id: &str,
        evse_uid: &str,
        connector: Connector,
    ) -> SyncResult<Option<Location>> {
        let mut location = self.local_location(party, location_id).await?;
        let path = vec![
            party.country_code.clone(),
            party.party_id.clone(),
            location_id.to_string(),
            evse_uid.to_string(),
            connector.id.clone(),
        ];
        let delivery = Delivery::put(path, &connector)?;

        match location.upsert_connector(evse_uid, connector) {
            None => Err(SyncError::not_found("Evse", evse_uid)),
            Some(false) => Ok(None),
            Some(true) => self.store_location(location, delivery).await,
        }
    }

    /// Records a status change of a locally hosted party and publishes it.
    pub async fn on_local_client_info_changed(&self, info: ClientInfo) -> SyncResult<Option<Party>> {
        let local_id = self.ctx.local.platform_id();
        let key = info.party();
        if let Some(existing) = self.ctx.db.parties().get(&key).await? {
            check_local_owner("Party", &key.to_string(), &existing.platform_id, local_id)?;
        }

        let Some(party) = self.ctx.db.parties().merge_client_info(local_id, &info).await? else {
            debug!(party = %key, "Client info unchanged, not pushing");
            return Ok(None);
        };

        let delivery = Delivery::put(info.object_path(), &info)?;
        for target in self.targets(ModuleId::HubClientInfo, local_id, &key).await? {
            let remote = self.ctx.remote.clone();
            let delivery = delivery.clone();
            self.ctx.dispatcher.spawn("push_client_info", target.to_platform.clone(), async move {
                deliver(remote.as_ref(), &target, &delivery).await
            });
        }
        Ok(Some(party))
    }

    // =========================================================================
    // Fan-out
    // =========================================================================

    async fn local_location(&self, party: &PartyKey, location_id: &str) -> SyncResult<Location> {
        let stored = self
            .ctx
            .db
            .entities::<Location>()
            .get(party, location_id)
            .await?
            .ok_or_else(|| SyncError::not_found(Location::KIND, format!("{}/{}", party, location_id)))?;
        check_local_owner(Location::KIND, location_id, &stored.platform_id, self.ctx.local.platform_id())?;
        Ok(stored.entity)
    }

    async fn store_location(&self, location: Location, delivery: Delivery) -> SyncResult<Option<Location>> {
        let local_id = self.ctx.local.platform_id();
        let Some(merged) = self.ctx.db.entities::<Location>().merge(local_id, &location).await? else {
            return Ok(None);
        };
        self.fan_out::<Location>(local_id, &merged.party(), merged.id(), delivery)
            .await?;
        Ok(Some(merged))
    }

    /// Dispatches `delivery` to every eligible receiver. Returns the number of dispatches.
    async fn fan_out<T: SyncEntity>(
        &self,
        origin: &str,
        party: &PartyKey,
        id: &str,
        delivery: Delivery,
    ) -> SyncResult<usize> {
        let targets = self.targets(T::MODULE, origin, party).await?;
        let count = targets.len();

        for target in targets {
            let remote = self.ctx.remote.clone();
            let repo = self.ctx.db.entities::<T>();
            let delivery = delivery.clone();
            let party = party.clone();
            let id = id.to_string();
            self.ctx.dispatcher.spawn("push", target.to_platform.clone(), async move {
                deliver(remote.as_ref(), &target, &delivery).await?;
                repo.mark_sent(&party, &id, Utc::now()).await?;
                Ok(())
            });
        }

        debug!(kind = T::KIND, id, dispatched = count, "Change fanned out");
        Ok(count)
    }

    /// Receivers eligible for a push of `module`.
    async fn targets(&self, module: ModuleId, origin: &str, from: &PartyKey) -> SyncResult<Vec<RemoteTarget>> {
        let mut targets = Vec::new();
        for platform in self.ctx.db.platforms().list_connected_remotes().await? {
            if platform.id == origin || push_excluded(module, platform.role) {
                continue;
            }
            let Some(url) = platform.endpoint(module, InterfaceRole::Receiver) else {
                debug!(platform_id = %platform.id, %module, "No receiver endpoint, skipping push");
                continue;
            };
            if !platform.push_enabled(module) {
                debug!(platform_id = %platform.id, %module, "Push disabled by platform, skipping");
                continue;
            }

            let routing = RoutingContext::between(Some(from.clone()), self.first_party(&platform).await?);
            match RemoteTarget::for_platform(&platform, url, self.ctx.local.platform_id(), routing) {
                Ok(target) => targets.push(target),
                Err(e) => warn!(platform_id = %platform.id, error = %e, "Cannot address platform"),
            }
        }
        Ok(targets)
    }

    async fn first_party(&self, platform: &Platform) -> SyncResult<Option<PartyKey>> {
        Ok(self
            .ctx
            .db
            .parties()
            .list_by_platform(&platform.id)
            .await?
            .first()
            .map(Party::key))
    }
}

async fn deliver(
    remote: &dyn crate::remote::RemoteAccess,
    target: &RemoteTarget,
    delivery: &Delivery,
) -> SyncResult<()> {
    match delivery {
        Delivery::Put { path, body } => remote.put_object(target, path, body).await,
        Delivery::Post { body } => remote.post_object(target, body).await,
    }
}

fn check_local_owner(kind: &str, id: &str, owner: &str, local_id: &str) -> SyncResult<()> {
    if owner != local_id {
        warn!(kind, id, owner, "Local change for remotely owned data rejected");
        return Err(SyncError::ownership(kind, id, owner, local_id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{connect_remote, endpoint_url, save, test_hub, Call, TestHub, LOCAL_ID};
    use ampere_core::{Cdr, ConnectionStatus, PushSupport, Role, Session};
    use chrono::Duration;
    use serde_json::json;

    fn location(id: &str) -> Location {
        serde_json::from_value(json!({
            "country_code": "NL",
            "party_id": "AMP",
            "id": id,
            "last_updated": Utc::now() - Duration::minutes(1),
            "evses": [{ "uid": "EVSE1", "last_updated": Utc::now() - Duration::minutes(1), "connectors": [] }]
        }))
        .unwrap()
    }

    fn puts(calls: &[Call]) -> usize {
        calls.iter().filter(|c| matches!(c, Call::Put { .. })).count()
    }

    #[tokio::test]
    async fn test_second_identical_change_pushes_nothing() {
        let TestHub { ctx, remote, .. } = test_hub().await;
        connect_remote(&ctx, "emsp-a", Role::Emsp).await;
        let propagation = ctx.propagation();

        let loc = location("LOC1");

        assert!(propagation.on_local_changed(loc.clone()).await.unwrap().is_some());
        assert!(propagation.on_local_changed(loc.clone()).await.unwrap().is_none());
        ctx.dispatcher.settle().await;

        let calls = remote.calls_to("emsp-a");
        assert_eq!(puts(&calls), 1);
        assert_eq!(
            calls[0],
            Call::Put {
                platform: "emsp-a".into(),
                url: endpoint_url("emsp-a", InterfaceRole::Receiver, ModuleId::Locations),
                path: vec!["NL".into(), "AMP".into(), "LOC1".into()],
                body: serde_json::to_value(&loc).unwrap(),
            }
        );
        let stored = ctx
            .db
            .entities::<Location>()
            .get(&PartyKey::new("NL", "AMP"), "LOC1")
            .await
            .unwrap()
            .unwrap();
        assert!(stored.last_sent.is_some());
    }

    #[tokio::test]
    async fn test_role_exclusions_and_origin() {
        let TestHub { ctx, remote, .. } = test_hub().await;
        connect_remote(&ctx, "cpo-a", Role::Cpo).await;
        connect_remote(&ctx, "emsp-b", Role::Emsp).await;
        connect_remote(&ctx, "hub-c", Role::Hub).await;

        ctx.propagation().on_local_changed(location("LOC1")).await.unwrap();
        ctx.dispatcher.settle().await;

        assert_eq!(puts(&remote.calls_to("cpo-a")), 0);
        assert_eq!(puts(&remote.calls_to("emsp-b")), 1);
        assert_eq!(puts(&remote.calls_to("hub-c")), 1);
    }

    #[tokio::test]
    async fn test_push_capability_gating() {
        let TestHub { ctx, remote, .. } = test_hub().await;
        let mut disabled = connect_remote(&ctx, "emsp-off", Role::Emsp).await;
        disabled.protocol.push_support = Some(PushSupport {
            locations: false,
            ..PushSupport::default()
        });
        save(&ctx, &disabled).await;
        connect_remote(&ctx, "emsp-nil", Role::Emsp).await;

        ctx.propagation().on_local_changed(location("LOC1")).await.unwrap();
        ctx.dispatcher.settle().await;

        assert!(remote.calls_to("emsp-off").is_empty());
        assert_eq!(puts(&remote.calls_to("emsp-nil")), 1);
    }

    #[tokio::test]
    async fn test_skips_disconnected_and_missing_endpoint() {
        let TestHub { ctx, remote, .. } = test_hub().await;
        let mut offline = connect_remote(&ctx, "emsp-off", Role::Emsp).await;
        offline.status = ConnectionStatus::Offline;
        save(&ctx, &offline).await;
        let mut partial = connect_remote(&ctx, "emsp-partial", Role::Emsp).await;
        partial.protocol.endpoints.remove(&ModuleId::Locations);
        save(&ctx, &partial).await;

        ctx.propagation().on_local_changed(location("LOC1")).await.unwrap();
        ctx.dispatcher.settle().await;
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_push_keeps_local_write() {
        let TestHub { ctx, remote, .. } = test_hub().await;
        connect_remote(&ctx, "emsp-a", Role::Emsp).await;
        connect_remote(&ctx, "emsp-b", Role::Emsp).await;
        remote.fail(endpoint_url("emsp-a", InterfaceRole::Receiver, ModuleId::Locations));

        ctx.propagation().on_local_changed(location("LOC1")).await.unwrap();
        ctx.dispatcher.settle().await;

        assert_eq!(puts(&remote.calls_to("emsp-a")), 1);
        assert_eq!(puts(&remote.calls_to("emsp-b")), 1);
        let stored = ctx
            .db
            .entities::<Location>()
            .get(&PartyKey::new("NL", "AMP"), "LOC1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.platform_id, LOCAL_ID);
    }

    #[tokio::test]
    async fn test_remote_owned_entity_is_rejected() {
        let TestHub { ctx, remote, .. } = test_hub().await;
        let cpo = connect_remote(&ctx, "cpo-a", Role::Cpo).await;
        let mut theirs = location("LOC1");
        theirs.party_id = "CPA".into();
        ctx.db.entities::<Location>().put(&cpo.id, &theirs).await.unwrap();

        let err = ctx.propagation().on_local_changed(theirs).await.unwrap_err();
        assert!(matches!(err, SyncError::OwnershipViolation { .. }));
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_local_id_shared_with_remote_party_is_accepted() {
        let TestHub { ctx, remote, .. } = test_hub().await;
        let cpo = connect_remote(&ctx, "cpo-a", Role::Cpo).await;
        connect_remote(&ctx, "emsp-b", Role::Emsp).await;
        let mut theirs = location("1");
        theirs.party_id = "CPA".into();
        ctx.inbound().ingest(&cpo, theirs).await.unwrap();

        let ours = ctx.propagation().on_local_changed(location("1")).await.unwrap();
        assert!(ours.is_some());
        ctx.dispatcher.settle().await;
        assert_eq!(puts(&remote.calls_to("emsp-b")), 1);

        let repo = ctx.db.entities::<Location>();
        let local = repo.get(&PartyKey::new("NL", "AMP"), "1").await.unwrap().unwrap();
        let foreign = repo.get(&PartyKey::new("NL", "CPA"), "1").await.unwrap().unwrap();
        assert_eq!(local.platform_id, LOCAL_ID);
        assert!(local.last_sent.is_some());
        assert_eq!(foreign.platform_id, "cpo-a");
        assert!(foreign.last_sent.is_none());
    }

    #[tokio::test]
    async fn test_sessions_and_cdrs_go_to_service_providers_only() {
        let TestHub { ctx, remote, .. } = test_hub().await;
        connect_remote(&ctx, "cpo-a", Role::Cpo).await;
        connect_remote(&ctx, "emsp-b", Role::Emsp).await;

        let session: Session = serde_json::from_value(json!({
            "country_code": "NL", "party_id": "AMP", "id": "SES1", "last_updated": Utc::now()
        }))
        .unwrap();
        let cdr: Cdr = serde_json::from_value(json!({
            "country_code": "NL", "party_id": "AMP", "id": "CDR1", "last_updated": Utc::now()
        }))
        .unwrap();
        ctx.propagation().on_local_changed(session).await.unwrap();
        ctx.propagation().on_local_changed(cdr).await.unwrap();
        ctx.dispatcher.settle().await;

        assert!(remote.calls_to("cpo-a").is_empty());
        let calls = remote.calls_to("emsp-b");
        assert_eq!(puts(&calls), 1);
        assert!(calls.iter().any(|c| matches!(c, Call::Post { url, .. }
            if *url == endpoint_url("emsp-b", InterfaceRole::Receiver, ModuleId::Cdrs))));
    }

    #[tokio::test]
    async fn test_evse_and_connector_changes_push_granular_paths() {
        let TestHub { ctx, remote, .. } = test_hub().await;
        connect_remote(&ctx, "emsp-a", Role::Emsp).await;
        let propagation = ctx.propagation();
        let party = PartyKey::new("NL", "AMP");
        propagation.on_local_changed(location("LOC1")).await.unwrap();

        let evse: Evse = serde_json::from_value(json!({ "uid": "EVSE2", "last_updated": Utc::now() })).unwrap();
        assert!(propagation.on_local_evse_changed(&party, "LOC1", evse).await.unwrap().is_some());
        let connector: Connector = serde_json::from_value(json!({ "id": "1", "last_updated": Utc::now() })).unwrap();
        assert!(propagation
            .on_local_connector_changed(&party, "LOC1", "EVSE2", connector)
            .await
            .unwrap()
            .is_some());
        ctx.dispatcher.settle().await;

        let paths: Vec<Vec<String>> = remote
            .calls_to("emsp-a")
            .into_iter()
            .filter_map(|c| match c {
                Call::Put { path, .. } => Some(path),
                _ => None,
            })
            .collect();
        assert!(paths.contains(&vec!["NL".into(), "AMP".into(), "LOC1".into(), "EVSE2".into()]));
        assert!(paths.contains(&vec![
            "NL".into(),
            "AMP".into(),
            "LOC1".into(),
            "EVSE2".into(),
            "1".into()
        ]));
    }

    #[tokio::test]
    async fn test_client_info_published_to_non_operators() {
        let TestHub { ctx, remote, .. } = test_hub().await;
        connect_remote(&ctx, "cpo-a", Role::Cpo).await;
        connect_remote(&ctx, "hub-b", Role::Hub).await;

        let info = ClientInfo {
            party_id: "AMP".into(),
            country_code: "NL".into(),
            role: Role::Hub,
            status: ConnectionStatus::Offline,
            last_updated: Utc::now(),
        };
        assert!(ctx.propagation().on_local_client_info_changed(info).await.unwrap().is_some());
        ctx.dispatcher.settle().await;

        assert!(remote.calls_to("cpo-a").is_empty());
        assert_eq!(puts(&remote.calls_to("hub-b")), 1);
    }
}
