//! Version discovery.

use axum::extract::{Path, State};
use axum::Json;

use ampere_core::{Envelope, Version, VersionDetails};

use super::{ok, require_version};
use crate::auth::PlatformAuth;
use crate::error::ApiResult;
use crate::AppState;

/// `GET /ocpi/versions`
pub async fn list(State(state): State<AppState>, _auth: PlatformAuth) -> Json<Envelope<Vec<Version>>> {
    ok(state.ctx.local.versions())
}

/// `GET /ocpi/{version}`
pub async fn details(
    State(state): State<AppState>,
    _auth: PlatformAuth,
    Path(version): Path<String>,
) -> ApiResult<Json<Envelope<VersionDetails>>> {
    require_version(&state, &version)?;
    Ok(ok(state.ctx.local.get_endpoints(&version)?))
}
