//! # Module Policies
//!
//! The push and pull pipelines are shared by every data module. A module
//! only contributes its policies: which roles it never pushes to, which roles
//! it never pulls from, and how one received item is ingested.
//!
//! ## Role Exclusions
//! ```text
//! ┌──────────────┬──────────────────────────┬──────────────────────────┐
//! │ Module       │ never pushed to          │ never pulled from        │
//! ├──────────────┼──────────────────────────┼──────────────────────────┤
//! │ locations    │ CPO                      │ EMSP                     │
//! │ tariffs      │ CPO                      │ EMSP                     │
//! │ tokens       │ CPO                      │ CPO                      │
//! │ sessions     │ everything but EMSP      │ EMSP                     │
//! │ cdrs         │ everything but EMSP      │ EMSP                     │
//! │ client info  │ CPO                      │ EMSP                     │
//! └──────────────┴──────────────────────────┴──────────────────────────┘
//! ```

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use ampere_core::{Cdr, ClientInfo, Location, ModuleId, Platform, Role, Session, Tariff, Token};

use crate::error::SyncResult;
use crate::inbound::Inbound;

/// Modules that can be pulled, in sweep order.
pub const PULLABLE: [ModuleId; 6] = [
    ModuleId::Locations,
    ModuleId::Tariffs,
    ModuleId::Tokens,
    ModuleId::Sessions,
    ModuleId::Cdrs,
    ModuleId::HubClientInfo,
];

/// Platforms with `role` never receive pushes for `module`.
pub fn push_excluded(module: ModuleId, role: Role) -> bool {
    match module {
        ModuleId::Locations | ModuleId::Tariffs | ModuleId::Tokens | ModuleId::HubClientInfo => {
            role == Role::Cpo
        }
        ModuleId::Sessions | ModuleId::Cdrs => role != Role::Emsp,
        ModuleId::Commands | ModuleId::Credentials => false,
    }
}

/// Platforms with `role` are never pulled from for `module`.
pub fn pull_excluded(module: ModuleId, role: Role) -> bool {
    match module {
        ModuleId::Tokens => role == Role::Cpo,
        ModuleId::Locations
        | ModuleId::Tariffs
        | ModuleId::Sessions
        | ModuleId::Cdrs
        | ModuleId::HubClientInfo => role == Role::Emsp,
        ModuleId::Commands | ModuleId::Credentials => true,
    }
}

/// Per-module hooks of the synchronization pipeline.
#[async_trait]
pub trait SyncModule: Send + Sync + 'static {
    /// Wire type of one item.
    type Item: DeserializeOwned + Send + 'static;

    const MODULE: ModuleId;

    fn push_excluded(role: Role) -> bool {
        push_excluded(Self::MODULE, role)
    }

    fn pull_excluded(role: Role) -> bool {
        pull_excluded(Self::MODULE, role)
    }

    /// Ingests one item received from `platform`. Returns whether anything changed.
    async fn ingest(inbound: &Inbound, platform: &Platform, item: Self::Item) -> SyncResult<bool>;
}

macro_rules! entity_module {
    ($name:ident, $item:ty, $module:expr) => {
        pub struct $name;

        #[async_trait]
        impl SyncModule for $name {
            type Item = $item;
            const MODULE: ModuleId = $module;

            async fn ingest(inbound: &Inbound, platform: &Platform, item: $item) -> SyncResult<bool> {
                inbound.ingest(platform, item).await
            }
        }
    };
}

entity_module!(Locations, Location, ModuleId::Locations);
entity_module!(Tariffs, Tariff, ModuleId::Tariffs);
entity_module!(Tokens, Token, ModuleId::Tokens);
entity_module!(Sessions, Session, ModuleId::Sessions);
entity_module!(Cdrs, Cdr, ModuleId::Cdrs);

pub struct ClientInfos;

#[async_trait]
impl SyncModule for ClientInfos {
    type Item = ClientInfo;
    const MODULE: ModuleId = ModuleId::HubClientInfo;

    async fn ingest(inbound: &Inbound, platform: &Platform, item: ClientInfo) -> SyncResult<bool> {
        inbound.ingest_client_info(platform, item).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operators_are_pull_sources_for_locations() {
        assert!(push_excluded(ModuleId::Locations, Role::Cpo));
        assert!(!pull_excluded(ModuleId::Locations, Role::Cpo));
        assert!(Locations::pull_excluded(Role::Emsp));
        assert!(!Tariffs::push_excluded(Role::Emsp));
    }

    #[test]
    fn test_sessions_only_pushed_to_service_providers() {
        for role in [Role::Cpo, Role::Hub, Role::Nsp, Role::Other] {
            assert!(Sessions::push_excluded(role));
            assert!(Cdrs::push_excluded(role));
        }
        assert!(!Sessions::push_excluded(Role::Emsp));
    }

    #[test]
    fn test_commands_never_pulled() {
        assert!(PULLABLE.iter().all(|m| *m != ModuleId::Commands));
        assert!(pull_excluded(ModuleId::Commands, Role::Cpo));
    }
}
