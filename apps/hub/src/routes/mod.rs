//! Route table and shared handler helpers.

pub mod commands;
pub mod credentials;
pub mod local;
pub mod modules;
pub mod versions;

use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::de::DeserializeOwned;

use ampere_core::{Envelope, ModuleId, PartyKey};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Builds the router for both the protocol API and the local API.
pub fn router(state: AppState) -> Router {
    let ocpi = Router::new()
        .route("/versions", get(versions::list))
        .route("/{version}", get(versions::details))
        .route(
            "/{version}/credentials",
            post(credentials::register)
                .put(credentials::update)
                .delete(credentials::remove),
        )
        .route("/{version}/sender/{module}", get(modules::page))
        .route("/{version}/sender/commands/{kind}/{id}", post(commands::result))
        .route("/{version}/receiver/commands/{kind}", post(commands::request))
        .route("/{version}/receiver/cdrs", post(modules::post_cdr))
        .route("/{version}/receiver/{module}/{cc}/{pid}", put(modules::put_client_info))
        .route(
            "/{version}/receiver/{module}/{cc}/{pid}/{id}",
            put(modules::put_object).patch(modules::patch_object),
        )
        .route(
            "/{version}/receiver/{module}/{cc}/{pid}/{id}/{evse}",
            put(modules::put_evse).patch(modules::patch_evse),
        )
        .route(
            "/{version}/receiver/{module}/{cc}/{pid}/{id}/{evse}/{connector}",
            put(modules::put_connector).patch(modules::patch_connector),
        );

    let hub = Router::new()
        .route("/health", get(local::health))
        .route("/cdrs", post(local::post_cdr))
        .route("/commands/{command}", post(local::issue_command))
        .route("/commands/{command}/result", post(local::complete_command))
        .route("/pull/{module}", post(local::pull))
        .route("/pull/{module}/{platform}/{*path}", post(local::pull_object))
        .route("/platforms/{platform}/suspend", post(local::suspend_platform))
        .route("/platforms/{platform}/purge", post(local::purge_platform))
        .route("/{module}/{cc}/{pid}", put(local::put_client_info))
        .route("/{module}/{cc}/{pid}/{id}", put(local::put_object))
        .route("/{module}/{cc}/{pid}/{id}/{evse}", put(local::put_evse))
        .route("/{module}/{cc}/{pid}/{id}/{evse}/{connector}", put(local::put_connector));

    Router::new()
        .nest("/ocpi", ocpi)
        .nest("/hub", hub)
        .with_state(state)
}

// =============================================================================
// Helpers
// =============================================================================

pub(crate) fn ok<T>(data: T) -> Json<Envelope<T>> {
    Json(Envelope::success(data))
}

pub(crate) fn decode<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    Ok(serde_json::from_slice(body)?)
}

pub(crate) fn require_version(state: &AppState, version: &str) -> ApiResult<()> {
    if state.ctx.local.supports_version(version) {
        Ok(())
    } else {
        Err(ApiError::UnsupportedVersion(version.to_string()))
    }
}

/// The object in the body must be the one the URL addresses.
pub(crate) fn check_identity(party: &PartyKey, id: &str, url_party: &PartyKey, url_id: &str) -> ApiResult<()> {
    if party != url_party || id != url_id {
        return Err(ApiError::InvalidRequest(format!(
            "object {}/{} does not match the URL {}/{}",
            party, id, url_party, url_id
        )));
    }
    Ok(())
}

/// EVSE and connector paths exist only below locations.
pub(crate) fn require_locations(module: &str) -> ApiResult<()> {
    match module.parse::<ModuleId>()? {
        ModuleId::Locations => Ok(()),
        other => Err(unsupported_module(other)),
    }
}

pub(crate) fn unsupported_module(module: ModuleId) -> ApiError {
    ApiError::InvalidRequest(format!("{} is not supported on this endpoint", module))
}
