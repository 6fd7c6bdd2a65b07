//! # Pull Orchestrator
//!
//! Fetches a module's full inventory from every eligible remote and feeds it
//! through the ingest path.
//!
//! ## Pipeline
//! ```text
//! ┌──────────────┐
//! │ remote A     │──► read_pages ──┐
//! ├──────────────┤                 │   mpsc(queue_depth)    ┌──────────────────────┐
//! │ remote B     │──► read_pages ──┼──── (platform, item) ─►│ buffer_unordered(N)  │
//! ├──────────────┤                 │                        │  decode → ingest     │
//! │ remote C     │──► read_pages ──┘                        └──────────┬───────────┘
//! └──────────────┘                                                     │
//!                                                               PullReport
//! ```
//!
//! One fetch task per remote, one shared bounded queue, N ingest workers per
//! module. A failing page ends only that remote's stream; a failing item only
//! counts as failed.

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use ampere_core::{InterfaceRole, ModuleId, Party, Platform, RoutingContext, ValidationError};

use crate::context::HubContext;
use crate::error::{SyncError, SyncResult};
use crate::modules::{ClientInfos, Cdrs, Locations, Sessions, SyncModule, Tariffs, Tokens, PULLABLE};
use crate::pager::{read_pages, PageOptions};
use crate::remote::RemoteTarget;

/// Which remotes a pull addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullSelection {
    /// Every connected remote not excluded by role.
    #[default]
    All,
    /// Only remotes that declared they do not push this module.
    PushDisabledOnly,
}

/// Optional `date_from` / `date_to` window forwarded to the remotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    /// The window ending now and reaching back `window`.
    pub fn trailing(window: chrono::Duration) -> Self {
        let now = Utc::now();
        DateRange {
            from: Some(now - window),
            to: Some(now),
        }
    }
}

/// Outcome of one pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct PullReport {
    /// Remotes that were asked for data.
    pub platforms: usize,
    /// Items received.
    pub received: usize,
    /// Items that changed stored state.
    pub changed: usize,
    /// Items that failed to decode or were rejected.
    pub failed: usize,
}

pub struct PullOrchestrator {
    ctx: HubContext,
}

impl PullOrchestrator {
    pub fn new(ctx: HubContext) -> Self {
        PullOrchestrator { ctx }
    }

    // =========================================================================
    // Full Pulls
    // =========================================================================

    /// Pulls module `M` from every selected remote.
    pub async fn pull<M: SyncModule>(&self, selection: PullSelection, range: DateRange) -> SyncResult<PullReport> {
        let module = M::MODULE;
        let sources = self.sources::<M>(selection).await?;
        let mut report = PullReport {
            platforms: sources.len(),
            ..PullReport::default()
        };
        if sources.is_empty() {
            debug!(%module, ?selection, "No remotes to pull from");
            return Ok(report);
        }

        let options = PageOptions::from(&self.ctx.config.pull).with_range(range.from, range.to);
        let (tx, rx) = mpsc::channel::<(Arc<Platform>, Value)>(options.queue_depth.max(1));

        let mut fetchers = Vec::with_capacity(sources.len());
        for (platform, target) in sources {
            let platform = Arc::new(platform);
            let remote = self.ctx.remote.clone();
            let cancel = self.ctx.shutdown.child_token();
            let options = options.clone();
            let tx = tx.clone();

            fetchers.push(tokio::spawn(async move {
                let mut pages = read_pages(
                    move |page| {
                        let remote = remote.clone();
                        let target = target.clone();
                        async move { remote.get_page(&target, &page).await }
                    },
                    options,
                    cancel,
                );
                while let Some(batch) = pages.next().await {
                    for item in batch {
                        if tx.send((platform.clone(), item)).await.is_err() {
                            return;
                        }
                    }
                }
            }));
        }
        drop(tx);

        let inbound = self.ctx.inbound();
        let workers = self.ctx.config.pull.workers.for_module(module).max(1);
        let outcomes = ReceiverStream::new(rx)
            .map(|(platform, item)| {
                let inbound = inbound.clone();
                async move {
                    let outcome = match serde_json::from_value::<M::Item>(item) {
                        Ok(item) => M::ingest(&inbound, &platform, item).await,
                        Err(e) => Err(SyncError::from(e)),
                    };
                    (platform, outcome)
                }
            })
            .buffer_unordered(workers);
        futures_util::pin_mut!(outcomes);

        while let Some((platform, outcome)) = outcomes.next().await {
            report.received += 1;
            match outcome {
                Ok(true) => report.changed += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(platform_id = %platform.id, %module, error = %e, "Pulled item rejected");
                }
            }
        }

        for fetcher in fetchers {
            if let Err(e) = fetcher.await {
                warn!(%module, error = %e, "Fetch task panicked");
            }
        }

        info!(
            %module,
            platforms = report.platforms,
            received = report.received,
            changed = report.changed,
            failed = report.failed,
            "Pull complete"
        );
        Ok(report)
    }

    /// Pulls one module chosen at runtime.
    pub async fn pull_module(
        &self,
        module: ModuleId,
        selection: PullSelection,
        range: DateRange,
    ) -> SyncResult<PullReport> {
        match module {
            ModuleId::Locations => self.pull::<Locations>(selection, range).await,
            ModuleId::Tariffs => self.pull::<Tariffs>(selection, range).await,
            ModuleId::Tokens => self.pull::<Tokens>(selection, range).await,
            ModuleId::Sessions => self.pull::<Sessions>(selection, range).await,
            ModuleId::Cdrs => self.pull::<Cdrs>(selection, range).await,
            ModuleId::HubClientInfo => self.pull::<ClientInfos>(selection, range).await,
            ModuleId::Commands | ModuleId::Credentials => Err(ValidationError::NotAllowed {
                field: "module".into(),
                allowed: PULLABLE.iter().map(|m| m.as_str().to_string()).collect(),
            }
            .into()),
        }
    }

    /// Pulls every pullable module in turn. A failing module does not stop the others.
    pub async fn pull_all(&self, selection: PullSelection, range: DateRange) -> Vec<(ModuleId, PullReport)> {
        let mut reports = Vec::with_capacity(PULLABLE.len());
        for module in PULLABLE {
            if self.ctx.shutdown.is_cancelled() {
                break;
            }
            match self.pull_module(module, selection, range).await {
                Ok(report) => reports.push((module, report)),
                Err(e) => warn!(%module, error = %e, "Pull failed"),
            }
        }
        reports
    }

    // =========================================================================
    // Single Objects
    // =========================================================================

    /// Fetches the object at `path` below the sender endpoint of `platform_id`
    /// and ingests it. Returns whether stored state changed.
    pub async fn pull_one<M: SyncModule>(&self, platform_id: &str, path: &[String]) -> SyncResult<bool> {
        let platform = self.ctx.connected_platform(platform_id).await?;
        let url = platform
            .endpoint(M::MODULE, InterfaceRole::Sender)
            .ok_or_else(|| SyncError::EndpointNotSupported {
                platform_id: platform.id.clone(),
                module: M::MODULE,
            })?;
        let target = RemoteTarget::for_platform(&platform, url, self.ctx.local.platform_id(), self.routing(&platform).await?)?;

        let object = self
            .ctx
            .remote
            .get_object(&target, path)
            .await?
            .ok_or_else(|| SyncError::not_found(M::MODULE.as_str(), path.join("/")))?;
        let item: M::Item = serde_json::from_value(object)?;
        M::ingest(&self.ctx.inbound(), &platform, item).await
    }

    /// [`PullOrchestrator::pull_one`] for a module chosen at runtime.
    pub async fn pull_one_module(&self, module: ModuleId, platform_id: &str, path: &[String]) -> SyncResult<bool> {
        match module {
            ModuleId::Locations => self.pull_one::<Locations>(platform_id, path).await,
            ModuleId::Tariffs => self.pull_one::<Tariffs>(platform_id, path).await,
            ModuleId::Tokens => self.pull_one::<Tokens>(platform_id, path).await,
            ModuleId::Sessions => self.pull_one::<Sessions>(platform_id, path).await,
            ModuleId::Cdrs => self.pull_one::<Cdrs>(platform_id, path).await,
            ModuleId::HubClientInfo => self.pull_one::<ClientInfos>(platform_id, path).await,
            ModuleId::Commands | ModuleId::Credentials => Err(ValidationError::NotAllowed {
                field: "module".into(),
                allowed: PULLABLE.iter().map(|m| m.as_str().to_string()).collect(),
            }
            .into()),
        }
    }

    // =========================================================================
    // Source Selection
    // =========================================================================

    async fn sources<M: SyncModule>(&self, selection: PullSelection) -> SyncResult<Vec<(Platform, RemoteTarget)>> {
        let module = M::MODULE;
        let mut sources = Vec::new();

        for platform in self.ctx.db.platforms().list_connected_remotes().await? {
            if M::pull_excluded(platform.role) {
                continue;
            }
            if selection == PullSelection::PushDisabledOnly && platform.push_enabled(module) {
                continue;
            }
            let Some(url) = platform.endpoint(module, InterfaceRole::Sender).map(str::to_string) else {
                debug!(platform_id = %platform.id, %module, "No sender endpoint, skipping pull");
                continue;
            };

            let routing = self.routing(&platform).await?;
            match RemoteTarget::for_platform(&platform, url, self.ctx.local.platform_id(), routing) {
                Ok(target) => sources.push((platform, target)),
                Err(e) => warn!(platform_id = %platform.id, error = %e, "Cannot address platform"),
            }
        }
        Ok(sources)
    }

    async fn routing(&self, platform: &Platform) -> SyncResult<RoutingContext> {
        let to_party = self
            .ctx
            .db
            .parties()
            .list_by_platform(&platform.id)
            .await?
            .first()
            .map(Party::key);
        let from_party = self.ctx.local.default_party();
        Ok(RoutingContext::between(from_party, to_party))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{connect_remote, endpoint_url, save, test_hub, Call, TestHub};
    use ampere_core::{Location, PartyKey, PushSupport, Role};
    use serde_json::json;

    fn location(cc: &str, pid: &str, id: &str) -> Value {
        json!({
            "country_code": cc,
            "party_id": pid,
            "id": id,
            "last_updated": Utc::now(),
            "evses": []
        })
    }

    fn page_calls(calls: &[Call], url: &str) -> usize {
        calls
            .iter()
            .filter(|c| matches!(c, Call::GetPage { url: u, .. } if u == url))
            .count()
    }

    #[tokio::test]
    async fn test_pull_collects_every_operator() {
        let TestHub { ctx, remote, notifier } = test_hub().await;
        connect_remote(&ctx, "cpo-a", Role::Cpo).await;
        connect_remote(&ctx, "cpo-b", Role::Cpo).await;
        let mut partial = connect_remote(&ctx, "cpo-c", Role::Cpo).await;
        if let Some(roles) = partial.protocol.endpoints.get_mut(&ModuleId::Locations) {
            roles.remove(&InterfaceRole::Sender);
        }
        save(&ctx, &partial).await;
        connect_remote(&ctx, "emsp-d", Role::Emsp).await;

        let url_a = endpoint_url("cpo-a", InterfaceRole::Sender, ModuleId::Locations);
        let url_b = endpoint_url("cpo-b", InterfaceRole::Sender, ModuleId::Locations);
        remote.set_inventory(&url_a, vec![location("NL", "CPA", "A1"), location("NL", "CPA", "A2")]);
        remote.set_inventory(&url_b, vec![location("DE", "CPB", "B1"), location("DE", "CPB", "B2")]);

        let report = ctx
            .puller()
            .pull::<Locations>(PullSelection::All, DateRange::default())
            .await
            .unwrap();

        assert_eq!(report.platforms, 2);
        assert_eq!(report.received, 4);
        assert_eq!(report.changed, 4);
        assert_eq!(notifier.entity_events(ModuleId::Locations), 4);

        let calls = remote.calls();
        assert_eq!(page_calls(&calls, &url_a), 2);
        assert_eq!(
            page_calls(&calls, &endpoint_url("cpo-c", InterfaceRole::Sender, ModuleId::Locations)),
            0
        );
        assert_eq!(
            page_calls(&calls, &endpoint_url("emsp-d", InterfaceRole::Sender, ModuleId::Locations)),
            0
        );

        let stored = ctx
            .db
            .entities::<Location>()
            .get(&PartyKey::new("DE", "CPB"), "B2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.platform_id, "cpo-b");
    }

    #[tokio::test]
    async fn test_push_disabled_selection() {
        let TestHub { ctx, remote, .. } = test_hub().await;
        connect_remote(&ctx, "cpo-a", Role::Cpo).await;
        let mut quiet = connect_remote(&ctx, "cpo-b", Role::Cpo).await;
        quiet.protocol.push_support = Some(PushSupport {
            locations: false,
            ..PushSupport::default()
        });
        save(&ctx, &quiet).await;

        let url_a = endpoint_url("cpo-a", InterfaceRole::Sender, ModuleId::Locations);
        let url_b = endpoint_url("cpo-b", InterfaceRole::Sender, ModuleId::Locations);
        remote.set_inventory(&url_b, vec![location("DE", "CPB", "B1")]);

        let report = ctx
            .puller()
            .pull::<Locations>(PullSelection::PushDisabledOnly, DateRange::default())
            .await
            .unwrap();

        assert_eq!(report.platforms, 1);
        assert_eq!(report.changed, 1);
        let calls = remote.calls();
        assert_eq!(page_calls(&calls, &url_a), 0);
        assert!(page_calls(&calls, &url_b) > 0);
    }

    #[tokio::test]
    async fn test_bad_item_is_isolated() {
        let TestHub { ctx, remote, .. } = test_hub().await;
        connect_remote(&ctx, "cpo-a", Role::Cpo).await;
        remote.set_inventory(
            endpoint_url("cpo-a", InterfaceRole::Sender, ModuleId::Locations),
            vec![
                json!({ "id": "broken" }),
                location("NLD", "CPA", "A0"),
                location("NL", "CPA", "A1"),
            ],
        );

        let report = ctx
            .puller()
            .pull::<Locations>(PullSelection::All, DateRange::default())
            .await
            .unwrap();

        assert_eq!(report.received, 3);
        assert_eq!(report.changed, 1);
        assert_eq!(report.failed, 2);
    }

    #[tokio::test]
    async fn test_failing_remote_does_not_stop_others() {
        let TestHub { ctx, remote, .. } = test_hub().await;
        connect_remote(&ctx, "cpo-a", Role::Cpo).await;
        connect_remote(&ctx, "cpo-b", Role::Cpo).await;
        remote.fail(endpoint_url("cpo-a", InterfaceRole::Sender, ModuleId::Locations));
        remote.set_inventory(
            endpoint_url("cpo-b", InterfaceRole::Sender, ModuleId::Locations),
            vec![location("DE", "CPB", "B1")],
        );

        let report = ctx
            .puller()
            .pull::<Locations>(PullSelection::All, DateRange::default())
            .await
            .unwrap();
        assert_eq!(report.platforms, 2);
        assert_eq!(report.changed, 1);
    }

    #[tokio::test]
    async fn test_commands_are_not_pullable() {
        let TestHub { ctx, .. } = test_hub().await;
        let err = ctx
            .puller()
            .pull_module(ModuleId::Commands, PullSelection::All, DateRange::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[tokio::test]
    async fn test_pull_one_object() {
        let TestHub { ctx, remote, .. } = test_hub().await;
        connect_remote(&ctx, "cpo-a", Role::Cpo).await;
        let url = endpoint_url("cpo-a", InterfaceRole::Sender, ModuleId::Locations);
        remote.set_object(format!("{}/NL/CPA/A9", url), location("NL", "CPA", "A9"));
        let path: Vec<String> = vec!["NL".into(), "CPA".into(), "A9".into()];

        assert!(ctx.puller().pull_one::<Locations>("cpo-a", &path).await.unwrap());
        let party = PartyKey::new("NL", "CPA");
        assert!(ctx.db.entities::<Location>().get(&party, "A9").await.unwrap().is_some());

        let missing: Vec<String> = vec!["NL".into(), "CPA".into(), "NOPE".into()];
        let err = ctx.puller().pull_one::<Locations>("cpo-a", &missing).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
    }
}
