//! # ampere-hub: HTTP Surface for Ampere Hub
//!
//! Protocol endpoints for remote platforms and the local backend API, on top
//! of the `ampere-sync` engine.
//!
//! ## Routes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Router                                     │
//! │                                                                         │
//! │  /ocpi (Token A / Token B)            /hub (admin token)                │
//! │  ┌──────────────────────────────┐      ┌──────────────────────────────┐ │
//! │  │ versions, version details    │      │ PUT  entities, EVSEs, conns  │ │
//! │  │ credentials POST/PUT/DELETE  │      │ POST cdrs                    │ │
//! │  │ sender pages                 │      │ POST commands/{kind}         │ │
//! │  │ receiver PUT/PATCH, cdrs     │      │ POST commands/{id}/result    │ │
//! │  │ commands, command results    │      │ POST pull/{module}           │ │
//! │  └──────────────┬───────────────┘      └──────────────┬───────────────┘ │
//! │                 └──────────────────┬──────────────────┘                 │
//! │                                    ▼                                    │
//! │                         AppState { HubContext }                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod error;
pub mod routes;

use ampere_sync::HubContext;

pub use error::{ApiError, ApiResult};
pub use routes::router;

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub ctx: HubContext,
}

impl AppState {
    pub fn new(ctx: HubContext) -> Self {
        AppState { ctx }
    }
}
