//! # ampere-core: Protocol & Domain Types for Ampere Hub
//!
//! This crate holds everything the hub knows about the federation as plain
//! data and pure rules, with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Ampere Hub Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 apps/hub (axum server + CLI)                    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │        ampere-sync (handshake, push, pull, commands)            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ ampere-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │ platform  │  │  entity   │  │  command  │  │  version  │  │   │
//! │  │   │ Platform  │  │ Location  │  │  Command  │  │ negotiate │  │   │
//! │  │   │ Party     │  │ Tariff .. │  │  Result   │  │  tokens   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                   ampere-db (SQLite repositories)               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`platform`] - Platforms, roles, modules, endpoint maps, push capabilities
//! - [`party`] - Party identities
//! - [`credentials`] - Handshake payloads
//! - [`entity`] - Synchronizable entities and the [`SyncEntity`] trait
//! - [`command`] - Command records and their state machine
//! - [`version`] - Version normalization and negotiation
//! - [`token`] - Token generation and base64 transport encoding
//! - [`routing`] - Explicit routing context
//! - [`envelope`] - Response envelope and status codes
//! - [`validation`] - Input validation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use ampere_core::version::find_proper_version;
//!
//! let remote = vec!["2.1.1".to_string(), "2.2.1".to_string()];
//! let local = vec!["2.2.1".to_string()];
//! assert_eq!(find_proper_version(&remote, &local).as_deref(), Some("2.2.1"));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod command;
pub mod credentials;
pub mod entity;
pub mod envelope;
pub mod error;
pub mod party;
pub mod platform;
pub mod routing;
pub mod token;
pub mod validation;
pub mod version;

// =============================================================================
// Re-exports
// =============================================================================

pub use command::{
    Command, CommandKind, CommandPayload, CommandResponse, CommandResponseType, CommandResult,
    CommandResultType, CommandStatus,
};
pub use credentials::{BusinessDetails, Credentials, CredentialsRole};
pub use entity::{Cdr, ClientInfo, Connector, Evse, Location, Session, Stored, SyncEntity, Tariff, Token};
pub use envelope::Envelope;
pub use error::{CoreError, CoreResult, ValidationError};
pub use party::{Party, PartyKey};
pub use platform::{
    ConnectionStatus, Endpoint, EndpointMap, InterfaceRole, ModuleId, Platform, ProtocolInfo,
    PushSupport, Role, Version, VersionDetails,
};
pub use routing::RoutingContext;

// =============================================================================
// Constants
// =============================================================================

/// Business deadline of a command, in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 600;

/// Protocol versions implemented by this hub, newest first.
pub const SUPPORTED_VERSIONS: &[&str] = &["2.2.1", "2.1.1"];
