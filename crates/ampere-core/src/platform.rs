//! # Platform Directory Types
//!
//! A [`Platform`] is one peer in the federation: the single local platform or
//! any number of remote ones. Everything the engine needs to reach a peer
//! lives here: tokens, negotiated version, the per-module endpoint map and the
//! declared push capabilities.
//!
//! ## Token Directions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   LOCAL ────────── token C (issued by remote) ─────────►  REMOTE       │
//! │         outbound calls authenticate with C                              │
//! │                                                                         │
//! │   LOCAL ◄───────── token B (issued by local) ──────────── REMOTE       │
//! │         inbound calls must present B                                    │
//! │                                                                         │
//! │   token A: out-of-band bootstrap token used only for the first          │
//! │            handshake, in either direction                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

// =============================================================================
// Role
// =============================================================================

/// Functional category of a platform or party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// Charge point operator.
    Cpo,
    /// E-mobility service provider.
    Emsp,
    /// Roaming hub.
    Hub,
    /// National access point.
    Nap,
    /// Navigation service provider.
    Nsp,
    /// Smart charging service provider.
    Scsp,
    /// Anything else.
    Other,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Cpo => "CPO",
            Role::Emsp => "EMSP",
            Role::Hub => "HUB",
            Role::Nap => "NAP",
            Role::Nsp => "NSP",
            Role::Scsp => "SCSP",
            Role::Other => "OTHER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CPO" => Ok(Role::Cpo),
            "EMSP" => Ok(Role::Emsp),
            "HUB" => Ok(Role::Hub),
            "NAP" => Ok(Role::Nap),
            "NSP" => Ok(Role::Nsp),
            "SCSP" => Ok(Role::Scsp),
            "OTHER" => Ok(Role::Other),
            _ => Err(ValidationError::NotAllowed {
                field: "role".to_string(),
                allowed: ["CPO", "EMSP", "HUB", "NAP", "NSP", "SCSP", "OTHER"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            }),
        }
    }
}

// =============================================================================
// Connection Status
// =============================================================================

/// Connection status of a platform, also reported per party through client info.
///
/// ## Lifecycle
/// ```text
/// PLANNED ──handshake──► CONNECTED ──credentials DELETE──► SUSPENDED
///                          │    ▲
///                          ▼    │ (re)handshake
///                        OFFLINE
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionStatus {
    Connected,
    Offline,
    #[default]
    Planned,
    Suspended,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "CONNECTED",
            ConnectionStatus::Offline => "OFFLINE",
            ConnectionStatus::Planned => "PLANNED",
            ConnectionStatus::Suspended => "SUSPENDED",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CONNECTED" => Ok(ConnectionStatus::Connected),
            "OFFLINE" => Ok(ConnectionStatus::Offline),
            "PLANNED" => Ok(ConnectionStatus::Planned),
            "SUSPENDED" => Ok(ConnectionStatus::Suspended),
            _ => Err(ValidationError::NotAllowed {
                field: "status".to_string(),
                allowed: vec![
                    "CONNECTED".to_string(),
                    "OFFLINE".to_string(),
                    "PLANNED".to_string(),
                    "SUSPENDED".to_string(),
                ],
            }),
        }
    }
}

// =============================================================================
// Modules & Interface Roles
// =============================================================================

/// One synchronizable resource family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleId {
    Cdrs,
    Commands,
    Credentials,
    #[serde(rename = "hubclientinfo")]
    HubClientInfo,
    Locations,
    Sessions,
    Tariffs,
    Tokens,
}

impl ModuleId {
    /// Modules that carry synchronizable data (everything except the handshake).
    pub const DATA: [ModuleId; 7] = [
        ModuleId::Locations,
        ModuleId::Tariffs,
        ModuleId::Tokens,
        ModuleId::Sessions,
        ModuleId::Cdrs,
        ModuleId::HubClientInfo,
        ModuleId::Commands,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleId::Cdrs => "cdrs",
            ModuleId::Commands => "commands",
            ModuleId::Credentials => "credentials",
            ModuleId::HubClientInfo => "hubclientinfo",
            ModuleId::Locations => "locations",
            ModuleId::Sessions => "sessions",
            ModuleId::Tariffs => "tariffs",
            ModuleId::Tokens => "tokens",
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cdrs" => Ok(ModuleId::Cdrs),
            "commands" => Ok(ModuleId::Commands),
            "credentials" => Ok(ModuleId::Credentials),
            "hubclientinfo" | "clientinfo" => Ok(ModuleId::HubClientInfo),
            "locations" => Ok(ModuleId::Locations),
            "sessions" => Ok(ModuleId::Sessions),
            "tariffs" => Ok(ModuleId::Tariffs),
            "tokens" => Ok(ModuleId::Tokens),
            other => Err(ValidationError::InvalidFormat {
                field: "module".to_string(),
                reason: format!("unknown module '{}'", other),
            }),
        }
    }
}

/// Which side of a module interface an endpoint implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InterfaceRole {
    /// Owns the data and serves it (pull target).
    Sender,
    /// Accepts pushed data.
    Receiver,
}

impl InterfaceRole {
    pub fn as_path(&self) -> &'static str {
        match self {
            InterfaceRole::Sender => "sender",
            InterfaceRole::Receiver => "receiver",
        }
    }
}

// =============================================================================
// Version Wire Types
// =============================================================================

/// Entry of a peer's version list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub version: String,
    pub url: String,
}

/// Endpoint advertised in a version-details document.
///
/// The identifier is kept as a raw string so that peers advertising modules
/// this hub does not implement can still be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub identifier: String,
    pub role: InterfaceRole,
    pub url: String,
}

/// Endpoint list for one protocol version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDetails {
    pub version: String,
    pub endpoints: Vec<Endpoint>,
}

/// Per-module, per-interface-role endpoint URLs.
pub type EndpointMap = BTreeMap<ModuleId, BTreeMap<InterfaceRole, String>>;

impl VersionDetails {
    /// Folds the advertised endpoints into an [`EndpointMap`], skipping
    /// modules this hub does not know.
    pub fn endpoint_map(&self) -> EndpointMap {
        let mut map = EndpointMap::new();
        for endpoint in &self.endpoints {
            if let Ok(module) = endpoint.identifier.parse::<ModuleId>() {
                map.entry(module)
                    .or_default()
                    .insert(endpoint.role, endpoint.url.clone());
            }
        }
        map
    }
}

// =============================================================================
// Push Capabilities
// =============================================================================

fn default_true() -> bool {
    true
}

/// Declared push capabilities of a peer, one flag per module.
///
/// A missing flag inside a declared set defaults to `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSupport {
    #[serde(default = "default_true")]
    pub locations: bool,
    #[serde(default = "default_true")]
    pub tariffs: bool,
    #[serde(default = "default_true")]
    pub tokens: bool,
    #[serde(default = "default_true")]
    pub sessions: bool,
    #[serde(default = "default_true")]
    pub cdrs: bool,
    #[serde(default = "default_true")]
    pub commands: bool,
    #[serde(default = "default_true")]
    pub hub_client_info: bool,
}

impl Default for PushSupport {
    fn default() -> Self {
        PushSupport {
            locations: true,
            tariffs: true,
            tokens: true,
            sessions: true,
            cdrs: true,
            commands: true,
            hub_client_info: true,
        }
    }
}

impl PushSupport {
    pub fn supports(&self, module: ModuleId) -> bool {
        match module {
            ModuleId::Locations => self.locations,
            ModuleId::Tariffs => self.tariffs,
            ModuleId::Tokens => self.tokens,
            ModuleId::Sessions => self.sessions,
            ModuleId::Cdrs => self.cdrs,
            ModuleId::Commands => self.commands,
            ModuleId::HubClientInfo => self.hub_client_info,
            ModuleId::Credentials => true,
        }
    }
}

// =============================================================================
// Protocol Info
// =============================================================================

/// Negotiated protocol state for a platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolInfo {
    /// Negotiated version, `None` until the first successful handshake.
    #[serde(default)]
    pub version: Option<String>,

    /// Full version list of the peer: version → details URL.
    #[serde(default)]
    pub versions: BTreeMap<String, String>,

    /// Endpoints for the negotiated version.
    #[serde(default)]
    pub endpoints: EndpointMap,

    /// `None` means the peer never declared capabilities: push is assumed.
    #[serde(default)]
    pub push_support: Option<PushSupport>,
}

// =============================================================================
// Platform
// =============================================================================

/// A federation peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    /// Exactly one platform in the directory has this set.
    #[serde(default)]
    pub is_local: bool,

    pub role: Role,

    #[serde(default)]
    pub status: ConnectionStatus,

    /// Bootstrap token.
    #[serde(default)]
    pub token_a: Option<String>,

    /// Token the peer presents on inbound calls (issued locally).
    #[serde(default)]
    pub token_b: Option<String>,

    /// Token used for outbound calls (issued by the peer).
    #[serde(default)]
    pub token_c: Option<String>,

    /// Tokens must travel base64 encoded.
    #[serde(default)]
    pub token_base64: bool,

    /// Where the peer publishes its version list.
    #[serde(default)]
    pub versions_url: Option<String>,

    #[serde(default)]
    pub protocol: ProtocolInfo,

    pub last_updated: DateTime<Utc>,
}

impl Platform {
    /// Creates a remote platform in `PLANNED` status, ready for an outbound handshake.
    pub fn planned(
        id: impl Into<String>,
        role: Role,
        versions_url: impl Into<String>,
        token_a: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Platform {
            id: id.into(),
            name: None,
            is_local: false,
            role,
            status: ConnectionStatus::Planned,
            token_a: Some(token_a.into()),
            token_b: None,
            token_c: None,
            token_base64: false,
            versions_url: Some(versions_url.into()),
            protocol: ProtocolInfo::default(),
            last_updated: now,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn is_remote(&self) -> bool {
        !self.is_local
    }

    /// Remote and connected: the only platforms synchronization talks to.
    pub fn is_reachable_peer(&self) -> bool {
        self.is_remote() && self.is_connected()
    }

    /// Looks up the endpoint URL of `module` for the given interface role.
    pub fn endpoint(&self, module: ModuleId, role: InterfaceRole) -> Option<&str> {
        self.protocol
            .endpoints
            .get(&module)
            .and_then(|roles| roles.get(&role))
            .map(String::as_str)
    }

    /// Returns whether the peer accepts pushes for `module`.
    ///
    /// An absent capability declaration means push is supported.
    pub fn push_enabled(&self, module: ModuleId) -> bool {
        self.protocol
            .push_support
            .as_ref()
            .map_or(true, |support| support.supports(module))
    }

    /// Token for outbound calls to this peer.
    ///
    /// Token C once connected, otherwise the bootstrap token A.
    pub fn outbound_token(&self) -> Option<&str> {
        self.token_c.as_deref().or(self.token_a.as_deref())
    }

    /// Returns true when `token` authenticates an inbound call from this peer.
    pub fn accepts_token(&self, token: &str) -> bool {
        self.token_b.as_deref() == Some(token) || self.token_a.as_deref() == Some(token)
    }
}
