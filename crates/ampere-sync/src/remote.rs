//! # Remote Access Port
//!
//! The outbound capability the engine calls through. [`HttpTransport`]
//! implements it over reqwest; tests substitute an in-memory fake.
//!
//! [`HttpTransport`]: crate::transport::HttpTransport
//!
//! ## Call Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  RemoteTarget                                                           │
//! │  ├── url            endpoint of the remote module (receiver / sender)   │
//! │  ├── token          outbound token, base64 encoded if required          │
//! │  ├── from_platform  local platform id                                   │
//! │  ├── to_platform    remote platform id                                  │
//! │  └── routing        from/to party headers + correlation id              │
//! │                                                                         │
//! │  RemoteAccess::put_object(&target, &["NL", "ABC", "LOC1"], &body)      │
//! │       → PUT {url}/NL/ABC/LOC1                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use ampere_core::token::transport_token;
use ampere_core::{
    CommandKind, CommandResponse, CommandResult, Credentials, Platform, RoutingContext, Version,
    VersionDetails,
};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Request Types
// =============================================================================

/// Where and as whom an outbound call is made.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTarget {
    pub url: String,
    pub token: String,
    pub from_platform: String,
    pub to_platform: String,
    pub routing: RoutingContext,
}

impl RemoteTarget {
    /// Addresses `url` on `platform` with its current outbound token.
    pub fn for_platform(
        platform: &Platform,
        url: impl Into<String>,
        local_platform_id: &str,
        routing: RoutingContext,
    ) -> SyncResult<Self> {
        let token = platform
            .outbound_token()
            .ok_or_else(|| SyncError::PlatformNotConnected(platform.id.clone()))?;
        Ok(RemoteTarget {
            url: url.into(),
            token: transport_token(token, platform.token_base64),
            from_platform: local_platform_id.to_string(),
            to_platform: platform.id.clone(),
            routing,
        })
    }

    /// Same credentials, different endpoint.
    pub fn with_url(&self, url: impl Into<String>) -> Self {
        RemoteTarget {
            url: url.into(),
            ..self.clone()
        }
    }
}

/// One page of a paginated GET.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: u64,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl PageRequest {
    /// Query string pairs, in the order peers expect them.
    pub fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("offset", self.offset.to_string()),
            ("limit", self.limit.to_string()),
        ];
        if let Some(from) = self.date_from {
            query.push(("date_from", from.to_rfc3339()));
        }
        if let Some(to) = self.date_to {
            query.push(("date_to", to.to_rfc3339()));
        }
        query
    }
}

// =============================================================================
// Remote Access Trait
// =============================================================================

/// Outbound operations against a remote platform.
///
/// Objects travel as raw JSON; the module policies own the typed decoding.
#[async_trait]
pub trait RemoteAccess: Send + Sync {
    /// GET the version list at `url`, authenticated with `token`.
    async fn get_versions(&self, url: &str, token: &str) -> SyncResult<Vec<Version>>;

    /// GET the endpoint list of one version.
    async fn get_version_details(&self, url: &str, token: &str) -> SyncResult<VersionDetails>;

    /// POST credentials for a first registration; returns the remote's credentials.
    async fn post_credentials(
        &self,
        target: &RemoteTarget,
        credentials: &Credentials,
    ) -> SyncResult<Credentials>;

    /// PUT credentials to refresh an existing registration.
    async fn put_credentials(
        &self,
        target: &RemoteTarget,
        credentials: &Credentials,
    ) -> SyncResult<Credentials>;

    /// GET one object at `{url}/{path...}`.
    async fn get_object(&self, target: &RemoteTarget, path: &[String]) -> SyncResult<Option<Value>>;

    /// GET one page of objects from a sender endpoint.
    async fn get_page(&self, target: &RemoteTarget, page: &PageRequest) -> SyncResult<Vec<Value>>;

    async fn put_object(&self, target: &RemoteTarget, path: &[String], body: &Value) -> SyncResult<()>;

    async fn patch_object(&self, target: &RemoteTarget, path: &[String], body: &Value) -> SyncResult<()>;

    /// POST an object to the collection at `url` (CDRs).
    async fn post_object(&self, target: &RemoteTarget, body: &Value) -> SyncResult<()>;

    /// POST a command to `{url}/{KIND}`; returns the synchronous answer.
    async fn post_command(
        &self,
        target: &RemoteTarget,
        kind: CommandKind,
        payload: &Value,
    ) -> SyncResult<CommandResponse>;

    /// POST an asynchronous command result to the response URL in `target.url`.
    async fn post_command_result(&self, target: &RemoteTarget, result: &CommandResult) -> SyncResult<()>;
}
