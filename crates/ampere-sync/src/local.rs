//! # Local Platform
//!
//! Accessor for the hub's own identity: its platform id, the parties it
//! hosts and the endpoints it publishes for every supported version.
//!
//! ## Endpoint Layout
//! ```text
//! {base_url}/ocpi/versions                          version list
//! {base_url}/ocpi/{version}                         version details
//! {base_url}/ocpi/{version}/credentials             credentials (both roles)
//! {base_url}/ocpi/{version}/sender/{module}         local data for pullers
//! {base_url}/ocpi/{version}/receiver/{module}       inbound pushes
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use ampere_core::party::parties_from_roles;
use ampere_core::{
    ConnectionStatus, CredentialsRole, Endpoint, EndpointMap, InterfaceRole, ModuleId, PartyKey,
    Platform, ProtocolInfo, Version, VersionDetails,
};
use ampere_db::Database;

use crate::config::PlatformSettings;
use crate::error::{SyncError, SyncResult};

/// The local platform as configured and as stored in the directory.
#[derive(Debug, Clone)]
pub struct LocalPlatform {
    db: Database,
    settings: Arc<PlatformSettings>,
}

impl LocalPlatform {
    pub fn new(db: Database, settings: PlatformSettings) -> Self {
        LocalPlatform {
            db,
            settings: Arc::new(settings),
        }
    }

    pub fn platform_id(&self) -> &str {
        &self.settings.id
    }

    pub fn settings(&self) -> &PlatformSettings {
        &self.settings
    }

    fn base_url(&self) -> &str {
        self.settings.base_url.trim_end_matches('/')
    }

    pub fn versions_url(&self) -> String {
        format!("{}/ocpi/versions", self.base_url())
    }

    pub fn version_url(&self, version: &str) -> String {
        format!("{}/ocpi/{}", self.base_url(), version)
    }

    /// Published version list, in preference order.
    pub fn versions(&self) -> Vec<Version> {
        self.settings
            .versions
            .iter()
            .map(|v| Version {
                version: v.clone(),
                url: self.version_url(v),
            })
            .collect()
    }

    /// Preferred (first configured) version.
    pub fn default_version(&self) -> Option<&str> {
        self.settings.versions.first().map(String::as_str)
    }

    pub fn supports_version(&self, version: &str) -> bool {
        self.settings.versions.iter().any(|v| v == version)
    }

    /// Endpoint document for `version`.
    pub fn get_endpoints(&self, version: &str) -> SyncResult<VersionDetails> {
        if !self.supports_version(version) {
            return Err(SyncError::not_found("Version", version));
        }

        let root = self.version_url(version);
        let mut endpoints = Vec::new();
        for role in [InterfaceRole::Sender, InterfaceRole::Receiver] {
            endpoints.push(Endpoint {
                identifier: ModuleId::Credentials.as_str().to_string(),
                role,
                url: format!("{}/credentials", root),
            });
        }
        for module in ModuleId::DATA {
            for role in [InterfaceRole::Sender, InterfaceRole::Receiver] {
                endpoints.push(Endpoint {
                    identifier: module.as_str().to_string(),
                    role,
                    url: format!("{}/{}/{}", root, role.as_path(), module.as_str()),
                });
            }
        }

        Ok(VersionDetails {
            version: version.to_string(),
            endpoints,
        })
    }

    /// URL of one local endpoint, e.g. the command result receiver.
    pub fn endpoint(&self, version: &str, module: ModuleId, role: InterfaceRole) -> SyncResult<String> {
        self.get_endpoints(version)?
            .endpoint_map()
            .get(&module)
            .and_then(|roles| roles.get(&role))
            .cloned()
            .ok_or_else(|| SyncError::not_found("Endpoint", format!("{}/{}", module, role.as_path())))
    }

    /// Roles published in the credentials exchange.
    pub fn credentials_roles(&self) -> Vec<CredentialsRole> {
        self.settings
            .parties
            .iter()
            .map(|party| party.credentials_role())
            .collect()
    }

    pub fn party_keys(&self) -> Vec<PartyKey> {
        self.settings
            .parties
            .iter()
            .map(|p| PartyKey::new(&p.country_code, &p.party_id))
            .collect()
    }

    /// Party used as the sender of outbound messages.
    pub fn default_party(&self) -> Option<PartyKey> {
        self.party_keys().into_iter().next()
    }

    pub fn hosts_party(&self, key: &PartyKey) -> bool {
        self.party_keys().iter().any(|k| k == key)
    }

    /// Stored local platform row.
    pub async fn get(&self) -> SyncResult<Platform> {
        self.db
            .platforms()
            .get(self.platform_id())
            .await?
            .ok_or_else(|| SyncError::PlatformUnknown(self.platform_id().to_string()))
    }

    /// Creates or refreshes the local platform row and its parties.
    pub async fn register(&self, now: DateTime<Utc>) -> SyncResult<Platform> {
        let platforms = self.db.platforms();
        if let Some(existing) = platforms.get_local().await? {
            if existing.id != self.platform_id() {
                return Err(SyncError::InvalidConfig(format!(
                    "database belongs to local platform '{}', configured id is '{}'",
                    existing.id,
                    self.platform_id()
                )));
            }
        }

        let mut endpoints = EndpointMap::new();
        if let Some(version) = self.default_version() {
            endpoints = self.get_endpoints(version)?.endpoint_map();
        }

        let platform = Platform {
            id: self.platform_id().to_string(),
            name: self.settings.parties.first().map(|p| p.name.clone()),
            is_local: true,
            role: self.settings.role,
            status: ConnectionStatus::Connected,
            token_a: None,
            token_b: None,
            token_c: None,
            token_base64: false,
            versions_url: Some(self.versions_url()),
            protocol: ProtocolInfo {
                version: self.default_version().map(str::to_string),
                versions: self
                    .versions()
                    .into_iter()
                    .map(|v| (v.version, v.url))
                    .collect(),
                endpoints,
                push_support: None,
            },
            last_updated: now,
        };
        platforms.merge(&platform).await?;

        let parties = self.db.parties();
        for party in parties_from_roles(&self.credentials_roles(), self.platform_id(), now) {
            parties.merge(&party).await?;
        }

        info!(
            platform_id = %platform.id,
            parties = self.settings.parties.len(),
            "Local platform registered"
        );
        Ok(platform)
    }
}
