//! Credentials handshake, inbound side.
//!
//! `POST` registers a platform holding token A, `PUT` refreshes a connected
//! one, `DELETE` suspends it. `POST` and `PUT` call back to the caller's
//! version list before answering.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use tracing::info;

use ampere_core::{Credentials, Envelope};
use ampere_sync::CredentialsMode;

use super::{decode, ok, require_version};
use crate::auth::PlatformAuth;
use crate::error::ApiResult;
use crate::AppState;

/// `POST /ocpi/{version}/credentials`
pub async fn register(
    State(state): State<AppState>,
    PlatformAuth(caller): PlatformAuth,
    Path(version): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Envelope<Credentials>>> {
    accept(state, caller, version, body, CredentialsMode::Register).await
}

/// `PUT /ocpi/{version}/credentials`
pub async fn update(
    State(state): State<AppState>,
    PlatformAuth(caller): PlatformAuth,
    Path(version): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Envelope<Credentials>>> {
    accept(state, caller, version, body, CredentialsMode::Update).await
}

async fn accept(
    state: AppState,
    caller: ampere_core::Platform,
    version: String,
    body: Bytes,
    mode: CredentialsMode,
) -> ApiResult<Json<Envelope<Credentials>>> {
    require_version(&state, &version)?;
    let credentials: Credentials = decode(&body)?;
    let ours = state.ctx.handshake().accept(&caller, credentials, mode).await?;
    Ok(ok(ours))
}

/// `DELETE /ocpi/{version}/credentials`
pub async fn remove(
    State(state): State<AppState>,
    PlatformAuth(caller): PlatformAuth,
    Path(version): Path<String>,
) -> ApiResult<Json<Envelope<()>>> {
    require_version(&state, &version)?;
    let platform = state.ctx.handshake().delete(&caller).await?;
    info!(platform_id = %platform.id, "Platform unregistered itself");
    Ok(ok(()))
}
