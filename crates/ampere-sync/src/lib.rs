//! # ampere-sync: Synchronization Engine for Ampere Hub
//!
//! Connects the local platform with remote platforms and keeps their data
//! and commands in step.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Sync Engine                                    │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  HubContext (shared handles)                     │  │
//! │  │  Database • LocalPlatform • RemoteAccess • Notifier • Dispatcher │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │    ┌──────────────┬───────────┼──────────────┬──────────────────┐      │
//! │    ▼              ▼           ▼              ▼                  ▼      │
//! │ ┌──────────┐ ┌───────────┐ ┌──────────┐ ┌───────────────┐ ┌──────────┐ │
//! │ │Handshake │ │Propagation│ │ Inbound  │ │PullOrchestr.  │ │ Commands │ │
//! │ │          │ │           │ │          │ │               │ │          │ │
//! │ │ versions │ │ local     │ │ remote   │ │ read_pages ×N │ │ issue    │ │
//! │ │ tokens   │ │ change →  │ │ PUT/PATCH│ │ → ingest      │ │ accept   │ │
//! │ │ parties  │ │ fan-out   │ │ → merge  │ │   workers     │ │ correlate│ │
//! │ └──────────┘ └───────────┘ └──────────┘ └───────────────┘ └──────────┘ │
//! │                                                                         │
//! │  HubAgent: command deadline sweeps + fallback pull, on timers          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Engine
//! - [`credentials`] - Credentials handshake, registration, suspension, purge
//! - [`propagation`] - Push of local changes to eligible remotes
//! - [`inbound`] - Ingest of remote objects, sender pages
//! - [`pull`] - Concurrent paginated pull from many remotes
//! - [`pager`] - Page reader feeding a bounded queue
//! - [`commands`] - Command state machine and deadline sweeps
//! - [`modules`] - Per-module role policies and ingest hooks
//!
//! ### Plumbing
//! - [`context`] - Shared handles and service accessors
//! - [`local`] - The local platform's identity and endpoints
//! - [`remote`] - Outbound port to remote platforms
//! - [`transport`] - reqwest implementation of the port
//! - [`notifier`] - Webhook notifications to the local backend
//! - [`dispatch`] - Supervised fire-and-forget tasks
//! - [`agent`] - Periodic jobs and graceful shutdown
//! - [`config`] - Hub configuration
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ampere_sync::{HubAgent, HubConfig, HubContext};
//!
//! let ctx = HubContext::connect(HubConfig::load(None)?).await?;
//! ctx.local.register(chrono::Utc::now()).await?;
//!
//! let agent = HubAgent::start(ctx.clone());
//! ctx.propagation().on_local_changed(location).await?;
//! agent.shutdown(std::time::Duration::from_secs(10)).await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod commands;
pub mod config;
pub mod context;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod inbound;
pub mod local;
pub mod modules;
pub mod notifier;
pub mod pager;
pub mod propagation;
pub mod pull;
pub mod remote;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{AgentHandle, HubAgent};
pub use commands::CommandService;
pub use config::HubConfig;
pub use context::HubContext;
pub use credentials::{CredentialsMode, Handshake};
pub use error::{SyncError, SyncResult};
pub use inbound::Inbound;
pub use notifier::{HubEvent, Notifier};
pub use propagation::Propagation;
pub use pull::{DateRange, PullOrchestrator, PullReport, PullSelection};
pub use remote::{RemoteAccess, RemoteTarget};
