//! # Credentials Handshake
//!
//! Establishes and refreshes connections with remote platforms.
//!
//! ## Initiate (local → remote)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. GET  {versions_url}                 token A / C (base64 if flagged) │
//! │  2. pick highest common version                                        │
//! │  3. GET  {version details url}          → endpoint map                 │
//! │  4. generate token B, SAVE platform     (before anything is sent)      │
//! │  5. POST / PUT {credentials endpoint}   {token B, our url, our roles}  │
//! │  6. merge returned parties, store token C, status = CONNECTED          │
//! │  7. notify parties_changed                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Accept (remote → local)
//! The caller authenticated with token A (register) or token B (update).
//! The hub calls back the caller's version list with the token it was given,
//! negotiates, rotates token B and answers with its own credentials.
//!
//! A failure at any step leaves the platform in its previous status.

use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

use ampere_core::party::parties_from_roles;
use ampere_core::token::{generate_token, transport_token};
use ampere_core::validation::{validate_credentials, validate_url};
use ampere_core::version::find_proper_version;
use ampere_core::{
    ConnectionStatus, CredentialsRole, Credentials, EndpointMap, InterfaceRole, ModuleId, Party,
    Platform, Role, RoutingContext,
};

use crate::context::HubContext;
use crate::error::{SyncError, SyncResult};
use crate::notifier::HubEvent;
use crate::remote::RemoteTarget;

/// Which inbound credentials call is being handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialsMode {
    /// `POST`: first registration, caller presents token A.
    Register,
    /// `PUT`: refresh of an existing connection, caller presents token B.
    Update,
}

/// Outcome of version negotiation with a peer.
#[derive(Debug, Clone, PartialEq)]
struct Negotiated {
    version: String,
    versions: BTreeMap<String, String>,
    endpoints: EndpointMap,
}

pub struct Handshake {
    ctx: HubContext,
}

impl Handshake {
    pub fn new(ctx: HubContext) -> Self {
        Handshake { ctx }
    }

    // =========================================================================
    // Platform Directory
    // =========================================================================

    /// Creates or refreshes a remote platform ahead of an outbound handshake.
    pub async fn plan(
        &self,
        platform_id: &str,
        role: Role,
        versions_url: &str,
        token_a: &str,
        token_base64: bool,
    ) -> SyncResult<Platform> {
        validate_url("versions_url", versions_url)?;
        let now = Utc::now();

        let platform = match self.ctx.db.platforms().get(platform_id).await? {
            Some(existing) if existing.is_local => {
                return Err(SyncError::StateViolation(format!(
                    "{} is the local platform",
                    platform_id
                )))
            }
            Some(mut existing) => {
                existing.role = role;
                existing.versions_url = Some(versions_url.to_string());
                existing.token_a = Some(token_a.to_string());
                existing.token_base64 = token_base64;
                if !existing.is_connected() {
                    existing.status = ConnectionStatus::Planned;
                }
                existing.last_updated = now;
                existing
            }
            None => {
                let mut planned = Platform::planned(platform_id, role, versions_url, token_a, now);
                planned.token_base64 = token_base64;
                planned
            }
        };

        self.ctx.db.platforms().save(&platform).await?;
        info!(platform_id, status = %platform.status, "Platform planned");
        Ok(platform)
    }

    // =========================================================================
    // Initiate
    // =========================================================================

    /// Runs the outbound handshake against a known remote platform.
    ///
    /// The peer's parties are only known once it has answered, so a party
    /// conflict is detected after our new token was sent. That token is
    /// revoked again and the handshake fails; it must be re-run once the
    /// conflict is resolved.
    pub async fn initiate(&self, platform_id: &str) -> SyncResult<Platform> {
        let mut platform = self.ctx.platform(platform_id).await?;
        if platform.is_local {
            return Err(SyncError::StateViolation(format!(
                "cannot register with the local platform {}",
                platform_id
            )));
        }
        let versions_url = platform
            .versions_url
            .clone()
            .ok_or_else(|| SyncError::StateViolation(format!("{} has no versions url", platform_id)))?;
        let token = platform
            .outbound_token()
            .map(|t| transport_token(t, platform.token_base64))
            .ok_or_else(|| SyncError::PlatformNotConnected(platform_id.to_string()))?;

        info!(platform_id, versions_url = %versions_url, "Starting credentials handshake");
        let negotiated = self.negotiate(platform_id, &versions_url, &token).await?;
        let credentials_url = credentials_endpoint(&negotiated.endpoints).ok_or_else(|| {
            SyncError::EndpointNotSupported {
                platform_id: platform_id.to_string(),
                module: ModuleId::Credentials,
            }
        })?;

        let token_b = generate_token();
        let was_connected = platform.is_connected();
        platform.protocol.version = Some(negotiated.version.clone());
        platform.protocol.versions = negotiated.versions;
        platform.protocol.endpoints = negotiated.endpoints;
        platform.token_b = Some(token_b.clone());
        platform.last_updated = Utc::now();
        self.ctx.db.platforms().save(&platform).await?;

        let ours = self.local_credentials(token_b);
        let target = RemoteTarget::for_platform(
            &platform,
            credentials_url,
            self.ctx.local.platform_id(),
            RoutingContext::anonymous(),
        )?;
        let theirs = if was_connected {
            self.ctx.remote.put_credentials(&target, &ours).await?
        } else {
            self.ctx.remote.post_credentials(&target, &ours).await?
        };
        validate_credentials(&theirs)?;

        if let Err(e) = self.check_party_claims(platform_id, &theirs.roles).await {
            error!(
                platform_id,
                error = %e,
                "Peer claims a party hosted elsewhere, revoking the token just sent"
            );
            platform.token_b = None;
            platform.last_updated = Utc::now();
            self.ctx.db.platforms().save(&platform).await?;
            return Err(e);
        }
        let changed = self.merge_parties(platform_id, &theirs.roles).await?;

        platform.token_c = Some(theirs.token);
        platform.token_a = None;
        platform.versions_url = Some(theirs.url);
        platform.status = ConnectionStatus::Connected;
        platform.last_updated = Utc::now();
        self.ctx.db.platforms().save(&platform).await?;

        info!(
            platform_id,
            version = %negotiated.version,
            parties = theirs.roles.len(),
            "Platform connected"
        );

        if !changed.is_empty() {
            self.ctx.notify(HubEvent::PartiesChanged { parties: changed }).await?;
        }
        Ok(platform)
    }

    // =========================================================================
    // Accept
    // =========================================================================

    /// Handles an inbound credentials `POST` or `PUT` from `caller`.
    ///
    /// Returns the credentials the caller must use from now on.
    pub async fn accept(
        &self,
        caller: &Platform,
        credentials: Credentials,
        mode: CredentialsMode,
    ) -> SyncResult<Credentials> {
        validate_credentials(&credentials)?;

        if caller.status == ConnectionStatus::Suspended {
            return Err(SyncError::StateViolation(format!("platform {} is suspended", caller.id)));
        }
        match mode {
            CredentialsMode::Register if caller.is_connected() => {
                return Err(SyncError::StateViolation(format!(
                    "platform {} is already registered, use PUT",
                    caller.id
                )))
            }
            CredentialsMode::Update if !caller.is_connected() => {
                return Err(SyncError::StateViolation(format!(
                    "platform {} is not registered, use POST",
                    caller.id
                )))
            }
            _ => {}
        }

        let callback_token = transport_token(&credentials.token, caller.token_base64);
        let negotiated = self
            .negotiate(&caller.id, &credentials.url, &callback_token)
            .await?;
        self.check_party_claims(&caller.id, &credentials.roles).await?;

        let token_b = generate_token();
        let changed = self.merge_parties(&caller.id, &credentials.roles).await?;

        let mut platform = caller.clone();
        platform.token_b = Some(token_b.clone());
        platform.token_c = Some(credentials.token);
        platform.token_a = None;
        platform.versions_url = Some(credentials.url);
        platform.protocol.version = Some(negotiated.version.clone());
        platform.protocol.versions = negotiated.versions;
        platform.protocol.endpoints = negotiated.endpoints;
        platform.status = ConnectionStatus::Connected;
        platform.last_updated = Utc::now();
        self.ctx.db.platforms().save(&platform).await?;

        info!(
            platform_id = %platform.id,
            version = %negotiated.version,
            ?mode,
            "Credentials accepted"
        );

        if !changed.is_empty() {
            self.ctx.notify(HubEvent::PartiesChanged { parties: changed }).await?;
        }
        Ok(self.local_credentials(token_b))
    }

    /// Handles an inbound credentials `DELETE`: the caller is suspended.
    pub async fn delete(&self, caller: &Platform) -> SyncResult<Platform> {
        if !caller.is_connected() {
            return Err(SyncError::StateViolation(format!("platform {} is not registered", caller.id)));
        }
        self.suspend(&caller.id).await
    }

    /// Suspends a platform. Its data stays until [`Handshake::purge`].
    pub async fn suspend(&self, platform_id: &str) -> SyncResult<Platform> {
        let mut platform = self.ctx.platform(platform_id).await?;
        if platform.is_local {
            return Err(SyncError::StateViolation("the local platform cannot be suspended".into()));
        }
        platform.status = ConnectionStatus::Suspended;
        platform.token_c = None;
        platform.last_updated = Utc::now();
        self.ctx.db.platforms().save(&platform).await?;
        warn!(platform_id, "Platform suspended");
        Ok(platform)
    }

    /// Deletes the parties and entities of a suspended platform.
    pub async fn purge(&self, platform_id: &str) -> SyncResult<u64> {
        let platform = self.ctx.platform(platform_id).await?;
        if platform.status != ConnectionStatus::Suspended {
            return Err(SyncError::StateViolation(format!(
                "platform {} must be suspended before purging",
                platform_id
            )));
        }
        Ok(self.ctx.db.purge_platform_data(platform_id).await?)
    }

    // =========================================================================
    // Steps
    // =========================================================================

    async fn negotiate(&self, platform_id: &str, versions_url: &str, token: &str) -> SyncResult<Negotiated> {
        let versions = self.ctx.remote.get_versions(versions_url, token).await?;
        let offered: Vec<String> = versions.iter().map(|v| v.version.clone()).collect();

        let version = find_proper_version(&offered, &self.ctx.local.settings().versions).ok_or_else(|| {
            SyncError::NoCompatibleVersion {
                platform_id: platform_id.to_string(),
                offered: offered.clone(),
            }
        })?;
        let details_url = versions
            .iter()
            .find(|v| v.version == version)
            .map(|v| v.url.clone())
            .ok_or_else(|| SyncError::NoCompatibleVersion {
                platform_id: platform_id.to_string(),
                offered: offered.clone(),
            })?;

        let details = self.ctx.remote.get_version_details(&details_url, token).await?;
        let endpoints = details.endpoint_map();
        if endpoints.is_empty() {
            return Err(SyncError::EndpointNotSupported {
                platform_id: platform_id.to_string(),
                module: ModuleId::Credentials,
            });
        }

        Ok(Negotiated {
            version,
            versions: versions.into_iter().map(|v| (v.version, v.url)).collect(),
            endpoints,
        })
    }

    fn local_credentials(&self, token: String) -> Credentials {
        Credentials {
            token,
            url: self.ctx.local.versions_url(),
            roles: self.ctx.local.credentials_roles(),
        }
    }

    /// Rejects roles naming a party that another platform hosts.
    async fn check_party_claims(&self, platform_id: &str, roles: &[CredentialsRole]) -> SyncResult<()> {
        let parties = self.ctx.db.parties();
        for role in roles {
            let key = ampere_core::PartyKey::new(&role.country_code, &role.party_id);
            if let Some(existing) = parties.get(&key).await? {
                if existing.platform_id != platform_id {
                    return Err(SyncError::ownership("Party", key.to_string(), existing.platform_id, platform_id));
                }
            }
        }
        Ok(())
    }

    async fn merge_parties(&self, platform_id: &str, roles: &[CredentialsRole]) -> SyncResult<Vec<Party>> {
        let parties = self.ctx.db.parties();
        let mut changed = Vec::new();
        for party in parties_from_roles(roles, platform_id, Utc::now()) {
            if let Some(merged) = parties.merge(&party).await? {
                changed.push(merged);
            }
        }
        Ok(changed)
    }
}

/// Credentials endpoint of a peer: sender first, receiver otherwise.
fn credentials_endpoint(endpoints: &EndpointMap) -> Option<String> {
    let roles = endpoints.get(&ModuleId::Credentials)?;
    roles
        .get(&InterfaceRole::Sender)
        .or_else(|| roles.get(&InterfaceRole::Receiver))
        .cloned()
}
