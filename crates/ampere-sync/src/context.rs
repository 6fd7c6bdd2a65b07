//! # Hub Context
//!
//! Shared handles every engine service needs. Cloning is cheap: everything
//! inside is reference counted.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  HubContext                                                             │
//! │  ├── db          ampere-db handle (platforms, parties, entities, ...)   │
//! │  ├── local       LocalPlatform (id, parties, endpoints)                 │
//! │  ├── remote      Arc<dyn RemoteAccess>   (HttpTransport / fake)         │
//! │  ├── notifier    Arc<dyn Notifier>       (webhooks / no-op)             │
//! │  ├── dispatcher  tracked fire-and-forget tasks                          │
//! │  ├── config      Arc<HubConfig>                                         │
//! │  └── shutdown    CancellationToken observed by pulls and the agent      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use ampere_core::token::try_base64_decode;
use ampere_core::Platform;
use ampere_db::{Database, DbConfig};

use crate::commands::CommandService;
use crate::config::HubConfig;
use crate::credentials::Handshake;
use crate::dispatch::Dispatcher;
use crate::error::{SyncError, SyncResult};
use crate::inbound::Inbound;
use crate::local::LocalPlatform;
use crate::notifier::{HubEvent, NoOpNotifier, Notifier, WebhookNotifier};
use crate::propagation::Propagation;
use crate::pull::PullOrchestrator;
use crate::remote::RemoteAccess;
use crate::transport::{HttpTransport, TransportConfig};

#[derive(Clone)]
pub struct HubContext {
    pub db: Database,
    pub local: LocalPlatform,
    pub remote: Arc<dyn RemoteAccess>,
    pub notifier: Arc<dyn Notifier>,
    pub dispatcher: Dispatcher,
    pub config: Arc<HubConfig>,
    pub shutdown: CancellationToken,
}

impl fmt::Debug for HubContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubContext")
            .field("platform_id", &self.local.platform_id())
            .field("in_flight", &self.dispatcher.in_flight())
            .finish()
    }
}

impl HubContext {
    /// Assembles a context from explicit collaborators.
    pub fn new(
        db: Database,
        config: HubConfig,
        remote: Arc<dyn RemoteAccess>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let local = LocalPlatform::new(db.clone(), config.platform.clone());
        HubContext {
            db,
            local,
            remote,
            notifier,
            dispatcher: Dispatcher::new(),
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }

    /// Opens the database and builds the HTTP transport and webhook notifier
    /// described by `config`.
    pub async fn connect(config: HubConfig) -> SyncResult<Self> {
        let db_config = DbConfig::new(config.database_path())
            .max_connections(config.database.max_connections);
        let db = Database::new(db_config).await?;

        let remote: Arc<dyn RemoteAccess> =
            Arc::new(HttpTransport::new(TransportConfig::from(&config.client))?);
        let notifier: Arc<dyn Notifier> = if config.webhooks.urls.is_empty() {
            Arc::new(NoOpNotifier)
        } else {
            Arc::new(WebhookNotifier::new(
                config.webhooks.urls.clone(),
                config.client.webhook_timeout(),
            )?)
        };

        Ok(Self::new(db, config, remote, notifier))
    }

    // =========================================================================
    // Services
    // =========================================================================

    pub fn handshake(&self) -> Handshake {
        Handshake::new(self.clone())
    }

    pub fn propagation(&self) -> Propagation {
        Propagation::new(self.clone())
    }

    pub fn inbound(&self) -> Inbound {
        Inbound::new(self.clone())
    }

    pub fn puller(&self) -> PullOrchestrator {
        PullOrchestrator::new(self.clone())
    }

    pub fn commands(&self) -> CommandService {
        CommandService::new(self.clone())
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub async fn platform(&self, id: &str) -> SyncResult<Platform> {
        self.db
            .platforms()
            .get(id)
            .await?
            .ok_or_else(|| SyncError::PlatformUnknown(id.to_string()))
    }

    /// A remote platform that is ready for synchronization.
    pub async fn connected_platform(&self, id: &str) -> SyncResult<Platform> {
        let platform = self.platform(id).await?;
        if !platform.is_reachable_peer() {
            return Err(SyncError::PlatformNotConnected(id.to_string()));
        }
        Ok(platform)
    }

    /// Resolves the platform presenting `token` on an inbound call.
    ///
    /// Both the raw token and its base64-decoded form are tried.
    pub async fn authenticate(&self, token: &str) -> SyncResult<Platform> {
        let platforms = self.db.platforms();
        if let Some(platform) = platforms.find_by_token(token).await? {
            return Ok(platform);
        }
        let decoded = try_base64_decode(token);
        if decoded != token {
            if let Some(platform) = platforms.find_by_token(&decoded).await? {
                return Ok(platform);
            }
        }
        Err(SyncError::InvalidToken)
    }

    /// Delivers `event`; a failed delivery is logged and returned.
    pub async fn notify(&self, event: HubEvent) -> SyncResult<()> {
        self.notifier.notify(&event).await.map_err(|e| {
            warn!(event = event.label(), error = %e, "Notification failed");
            e
        })
    }
}
