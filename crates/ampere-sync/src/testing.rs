//! In-memory collaborators for engine tests.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use ampere_core::{
    CommandKind, CommandResponse, CommandResult, ConnectionStatus, Credentials, Endpoint,
    InterfaceRole, ModuleId, Platform, ProtocolInfo, Role, Version, VersionDetails,
};
use ampere_db::{Database, DbConfig};

use crate::config::HubConfig;
use crate::context::HubContext;
use crate::error::{SyncError, SyncResult};
use crate::notifier::{HubEvent, Notifier};
use crate::remote::{PageRequest, RemoteAccess, RemoteTarget};

pub const LOCAL_ID: &str = "ampere-hub";
pub const VERSION: &str = "2.2.1";

// =============================================================================
// Fake Remote
// =============================================================================

/// One outbound call, as the fake saw it.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetVersions { url: String, token: String },
    GetVersionDetails { url: String },
    PostCredentials { url: String, token: String },
    PutCredentials { url: String, token: String },
    GetObject { url: String, path: Vec<String> },
    GetPage { url: String, offset: u64 },
    Put { platform: String, url: String, path: Vec<String>, body: Value },
    Patch { platform: String, url: String, path: Vec<String> },
    Post { platform: String, url: String, body: Value },
    PostCommand { platform: String, url: String, kind: CommandKind, body: Value },
    PostCommandResult { platform: String, url: String, result: CommandResult },
}

impl Call {
    /// Platform a data or command call was addressed to.
    pub fn platform(&self) -> Option<&str> {
        match self {
            Call::Put { platform, .. }
            | Call::Patch { platform, .. }
            | Call::Post { platform, .. }
            | Call::PostCommand { platform, .. }
            | Call::PostCommandResult { platform, .. } => Some(platform),
            _ => None,
        }
    }
}

#[derive(Default)]
struct FakeState {
    versions: HashMap<String, Vec<Version>>,
    details: HashMap<String, VersionDetails>,
    credentials: Option<Credentials>,
    inventories: HashMap<String, Vec<Value>>,
    objects: HashMap<String, Value>,
    command_response: Option<CommandResponse>,
    failing: HashSet<String>,
    calls: Vec<Call>,
}

/// Scripted stand-in for every remote platform at once, keyed by URL.
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<FakeState>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().expect("fake state");
        f(&mut state)
    }

    /// Publishes a version list and version-details document for `id`.
    pub fn advertise(&self, id: &str, versions: &[&str]) {
        let versions: Vec<Version> = versions
            .iter()
            .map(|v| Version {
                version: v.to_string(),
                url: format!("https://{}.test/{}", id, v),
            })
            .collect();
        self.with(|s| {
            for version in &versions {
                s.details.insert(
                    version.url.clone(),
                    VersionDetails {
                        version: version.version.clone(),
                        endpoints: remote_endpoints(id),
                    },
                );
            }
            s.versions.insert(versions_url(id), versions);
        });
    }

    pub fn set_credentials_response(&self, credentials: Credentials) {
        self.with(|s| s.credentials = Some(credentials));
    }

    /// Full inventory behind a sender endpoint, served page by page.
    pub fn set_inventory(&self, url: impl Into<String>, items: Vec<Value>) {
        self.with(|s| s.inventories.insert(url.into(), items));
    }

    pub fn set_object(&self, url: impl Into<String>, object: Value) {
        self.with(|s| s.objects.insert(url.into(), object));
    }

    pub fn set_command_response(&self, response: CommandResponse) {
        self.with(|s| s.command_response = Some(response));
    }

    /// Every call to `url` fails with an HTTP error.
    pub fn fail(&self, url: impl Into<String>) {
        self.with(|s| s.failing.insert(url.into()));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with(|s| s.calls.clone())
    }

    /// Data and command calls addressed to `platform_id`.
    pub fn calls_to(&self, platform_id: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.platform() == Some(platform_id))
            .collect()
    }

    fn record(&self, url: &str, call: Call) -> SyncResult<()> {
        self.with(|s| {
            s.calls.push(call);
            if s.failing.contains(url) {
                Err(SyncError::Http(format!("scripted failure for {}", url)))
            } else {
                Ok(())
            }
        })
    }
}

fn object_url(url: &str, path: &[String]) -> String {
    std::iter::once(url.to_string())
        .chain(path.iter().cloned())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl RemoteAccess for FakeRemote {
    async fn get_versions(&self, url: &str, token: &str) -> SyncResult<Vec<Version>> {
        self.record(
            url,
            Call::GetVersions {
                url: url.to_string(),
                token: token.to_string(),
            },
        )?;
        Ok(self.with(|s| s.versions.get(url).cloned().unwrap_or_default()))
    }

    async fn get_version_details(&self, url: &str, _token: &str) -> SyncResult<VersionDetails> {
        self.record(url, Call::GetVersionDetails { url: url.to_string() })?;
        self.with(|s| s.details.get(url).cloned())
            .ok_or_else(|| SyncError::Http(format!("no details at {}", url)))
    }

    async fn post_credentials(&self, target: &RemoteTarget, _credentials: &Credentials) -> SyncResult<Credentials> {
        self.record(
            &target.url,
            Call::PostCredentials {
                url: target.url.clone(),
                token: target.token.clone(),
            },
        )?;
        self.with(|s| s.credentials.clone())
            .ok_or_else(|| SyncError::Http("no credentials scripted".into()))
    }

    async fn put_credentials(&self, target: &RemoteTarget, _credentials: &Credentials) -> SyncResult<Credentials> {
        self.record(
            &target.url,
            Call::PutCredentials {
                url: target.url.clone(),
                token: target.token.clone(),
            },
        )?;
        self.with(|s| s.credentials.clone())
            .ok_or_else(|| SyncError::Http("no credentials scripted".into()))
    }

    async fn get_object(&self, target: &RemoteTarget, path: &[String]) -> SyncResult<Option<Value>> {
        self.record(
            &target.url,
            Call::GetObject {
                url: target.url.clone(),
                path: path.to_vec(),
            },
        )?;
        Ok(self.with(|s| s.objects.get(&object_url(&target.url, path)).cloned()))
    }

    async fn get_page(&self, target: &RemoteTarget, page: &PageRequest) -> SyncResult<Vec<Value>> {
        self.record(
            &target.url,
            Call::GetPage {
                url: target.url.clone(),
                offset: page.offset,
            },
        )?;
        Ok(self.with(|s| {
            s.inventories
                .get(&target.url)
                .map(|items| {
                    items
                        .iter()
                        .skip(page.offset as usize)
                        .take(page.limit as usize)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        }))
    }

    async fn put_object(&self, target: &RemoteTarget, path: &[String], body: &Value) -> SyncResult<()> {
        self.record(
            &target.url,
            Call::Put {
                platform: target.to_platform.clone(),
                url: target.url.clone(),
                path: path.to_vec(),
                body: body.clone(),
            },
        )
    }

    async fn patch_object(&self, target: &RemoteTarget, path: &[String], _body: &Value) -> SyncResult<()> {
        self.record(
            &target.url,
            Call::Patch {
                platform: target.to_platform.clone(),
                url: target.url.clone(),
                path: path.to_vec(),
            },
        )
    }

    async fn post_object(&self, target: &RemoteTarget, body: &Value) -> SyncResult<()> {
        self.record(
            &target.url,
            Call::Post {
                platform: target.to_platform.clone(),
                url: target.url.clone(),
                body: body.clone(),
            },
        )
    }

    async fn post_command(
        &self,
        target: &RemoteTarget,
        kind: CommandKind,
        payload: &Value,
    ) -> SyncResult<CommandResponse> {
        self.record(
            &target.url,
            Call::PostCommand {
                platform: target.to_platform.clone(),
                url: target.url.clone(),
                kind,
                body: payload.clone(),
            },
        )?;
        Ok(self
            .with(|s| s.command_response.clone())
            .unwrap_or_else(|| CommandResponse::accepted(30)))
    }

    async fn post_command_result(&self, target: &RemoteTarget, result: &CommandResult) -> SyncResult<()> {
        self.record(
            &target.url,
            Call::PostCommandResult {
                platform: target.to_platform.clone(),
                url: target.url.clone(),
                result: result.clone(),
            },
        )
    }
}

// =============================================================================
// Recording Notifier
// =============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<HubEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<HubEvent> {
        self.events.lock().expect("events").clone()
    }

    pub fn count(&self, label: &str) -> usize {
        self.events().iter().filter(|e| e.label() == label).count()
    }

    /// Entity notifications for `module`.
    pub fn entity_events(&self, module: ModuleId) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, HubEvent::EntitiesChanged { module: m, .. } if *m == module))
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &HubEvent) -> SyncResult<()> {
        self.events.lock().expect("events").push(event.clone());
        Ok(())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub struct TestHub {
    pub ctx: HubContext,
    pub remote: Arc<FakeRemote>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn versions_url(id: &str) -> String {
    format!("https://{}.test/versions", id)
}

pub fn endpoint_url(id: &str, role: InterfaceRole, module: ModuleId) -> String {
    format!("https://{}.test/{}/{}", id, role.as_path(), module.as_str())
}

fn remote_endpoints(id: &str) -> Vec<Endpoint> {
    let mut endpoints = vec![Endpoint {
        identifier: "credentials".into(),
        role: InterfaceRole::Receiver,
        url: format!("https://{}.test/credentials", id),
    }];
    for module in ModuleId::DATA {
        for role in [InterfaceRole::Sender, InterfaceRole::Receiver] {
            endpoints.push(Endpoint {
                identifier: module.as_str().into(),
                role,
                url: endpoint_url(id, role, module),
            });
        }
    }
    endpoints
}

/// Hub on an in-memory database with its local platform registered.
pub async fn test_hub() -> TestHub {
    let db = Database::new(DbConfig::in_memory()).await.expect("database");
    let mut config = HubConfig::default();
    config.platform.base_url = "https://hub.test".into();

    let remote = FakeRemote::new();
    let notifier = RecordingNotifier::new();
    let ctx = HubContext::new(db, config, remote.clone(), notifier.clone());
    ctx.local.register(Utc::now()).await.expect("local platform");

    TestHub { ctx, remote, notifier }
}

/// Stores a connected remote platform exposing every module at
/// `https://{id}.test/{role}/{module}`.
pub async fn connect_remote(ctx: &HubContext, id: &str, role: Role) -> Platform {
    let details = VersionDetails {
        version: VERSION.into(),
        endpoints: remote_endpoints(id),
    };
    let platform = Platform {
        id: id.into(),
        name: None,
        is_local: false,
        role,
        status: ConnectionStatus::Connected,
        token_a: None,
        token_b: Some(format!("token-b-{}", id)),
        token_c: Some(format!("token-c-{}", id)),
        token_base64: false,
        versions_url: Some(versions_url(id)),
        protocol: ProtocolInfo {
            version: Some(VERSION.into()),
            versions: [(VERSION.to_string(), format!("https://{}.test/{}", id, VERSION))]
                .into_iter()
                .collect(),
            endpoints: details.endpoint_map(),
            push_support: None,
        },
        last_updated: Utc::now(),
    };
    ctx.db.platforms().save(&platform).await.expect("save platform");
    platform
}

/// Overwrites a stored platform.
pub async fn save(ctx: &HubContext, platform: &Platform) {
    ctx.db.platforms().save(platform).await.expect("save platform");
}
