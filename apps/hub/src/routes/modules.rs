//! Data module endpoints for remote platforms.
//!
//! ## Endpoints
//! ```text
//! GET   /ocpi/{v}/sender/{module}?offset&limit&date_from&date_to
//! PUT   /ocpi/{v}/receiver/{module}/{cc}/{pid}/{id}[/{evse}[/{connector}]]
//! PATCH /ocpi/{v}/receiver/{module}/{cc}/{pid}/{id}[/{evse}[/{connector}]]
//! PUT   /ocpi/{v}/receiver/hubclientinfo/{cc}/{pid}
//! POST  /ocpi/{v}/receiver/cdrs
//! ```

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ampere_core::{
    Cdr, ClientInfo, Connector, Envelope, Evse, Location, ModuleId, PartyKey, Platform, Session, SyncEntity,
    Tariff, Token,
};
use ampere_db::SearchCriteria;
use ampere_sync::Inbound;

use super::{check_identity, decode, ok, require_locations, require_version, unsupported_module};
use crate::auth::PlatformAuth;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub const DEFAULT_PAGE_LIMIT: u64 = 100;
pub const MAX_PAGE_LIMIT: u64 = 1000;

const TOTAL_COUNT: &str = "x-total-count";
const LIMIT: &str = "x-limit";

// =============================================================================
// Sender
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl PageQuery {
    fn criteria(&self) -> SearchCriteria {
        SearchCriteria {
            date_from: self.date_from,
            date_to: self.date_to,
            offset: self.offset.unwrap_or(0),
            limit: self.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            ..Default::default()
        }
    }
}

/// `GET /ocpi/{version}/sender/{module}`
pub async fn page(
    State(state): State<AppState>,
    PlatformAuth(caller): PlatformAuth,
    Path((version, module)): Path<(String, String)>,
    Query(query): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    require_version(&state, &version)?;
    let module: ModuleId = module.parse()?;
    let criteria = query.criteria();
    let limit = criteria.limit;
    let inbound = state.ctx.inbound();

    let (items, total) = match module {
        ModuleId::Locations => page_of::<Location>(&inbound, &caller, criteria).await?,
        ModuleId::Tariffs => page_of::<Tariff>(&inbound, &caller, criteria).await?,
        ModuleId::Tokens => page_of::<Token>(&inbound, &caller, criteria).await?,
        ModuleId::Sessions => page_of::<Session>(&inbound, &caller, criteria).await?,
        ModuleId::Cdrs => page_of::<Cdr>(&inbound, &caller, criteria).await?,
        ModuleId::HubClientInfo => {
            let page = inbound
                .serve_client_info(&caller, criteria.offset, criteria.limit)
                .await?;
            (to_values(page.items)?, page.total)
        }
        other => return Err(unsupported_module(other)),
    };

    let mut headers = HeaderMap::new();
    headers.insert(TOTAL_COUNT, HeaderValue::from(total));
    headers.insert(LIMIT, HeaderValue::from(limit));
    Ok((headers, ok(items)))
}

async fn page_of<T: SyncEntity>(
    inbound: &Inbound,
    caller: &Platform,
    criteria: SearchCriteria,
) -> ApiResult<(Vec<Value>, u64)> {
    let page = inbound.serve_page::<T>(caller, criteria).await?;
    let entities = page.items.into_iter().map(|stored| stored.entity).collect();
    Ok((to_values(entities)?, page.total))
}

fn to_values<T: Serialize>(items: Vec<T>) -> ApiResult<Vec<Value>> {
    items
        .into_iter()
        .map(|item| serde_json::to_value(item).map_err(ApiError::from))
        .collect()
}

// =============================================================================
// Receiver: Whole Objects
// =============================================================================

/// `PUT /ocpi/{version}/receiver/{module}/{cc}/{pid}/{id}`
pub async fn put_object(
    State(state): State<AppState>,
    PlatformAuth(platform): PlatformAuth,
    Path((version, module, cc, pid, id)): Path<(String, String, String, String, String)>,
    body: Bytes,
) -> ApiResult<Json<Envelope<()>>> {
    require_version(&state, &version)?;
    let party = PartyKey::new(cc, pid);
    let inbound = state.ctx.inbound();

    match module.parse::<ModuleId>()? {
        ModuleId::Locations => put_entity::<Location>(&inbound, &platform, &party, &id, &body).await?,
        ModuleId::Tariffs => put_entity::<Tariff>(&inbound, &platform, &party, &id, &body).await?,
        ModuleId::Tokens => put_entity::<Token>(&inbound, &platform, &party, &id, &body).await?,
        ModuleId::Sessions => put_entity::<Session>(&inbound, &platform, &party, &id, &body).await?,
        other => return Err(unsupported_module(other)),
    };
    Ok(ok(()))
}

async fn put_entity<T: SyncEntity>(
    inbound: &Inbound,
    platform: &Platform,
    party: &PartyKey,
    id: &str,
    body: &[u8],
) -> ApiResult<bool> {
    let entity: T = decode(body)?;
    check_identity(&entity.party(), entity.id(), party, id)?;
    Ok(inbound.ingest(platform, entity).await?)
}

/// `PATCH /ocpi/{version}/receiver/{module}/{cc}/{pid}/{id}`
pub async fn patch_object(
    State(state): State<AppState>,
    PlatformAuth(platform): PlatformAuth,
    Path((version, module, cc, pid, id)): Path<(String, String, String, String, String)>,
    body: Bytes,
) -> ApiResult<Json<Envelope<()>>> {
    require_version(&state, &version)?;
    let party = PartyKey::new(cc, pid);
    let patch: Map<String, Value> = decode(&body)?;
    let inbound = state.ctx.inbound();

    match module.parse::<ModuleId>()? {
        ModuleId::Locations => patch_entity::<Location>(&inbound, &platform, &party, &id, &patch).await?,
        ModuleId::Tariffs => patch_entity::<Tariff>(&inbound, &platform, &party, &id, &patch).await?,
        ModuleId::Tokens => patch_entity::<Token>(&inbound, &platform, &party, &id, &patch).await?,
        ModuleId::Sessions => patch_entity::<Session>(&inbound, &platform, &party, &id, &patch).await?,
        other => return Err(unsupported_module(other)),
    };
    Ok(ok(()))
}

async fn patch_entity<T: SyncEntity>(
    inbound: &Inbound,
    platform: &Platform,
    party: &PartyKey,
    id: &str,
    patch: &Map<String, Value>,
) -> ApiResult<bool> {
    Ok(inbound.patch::<T>(platform, party, id, patch).await?)
}

/// `PUT /ocpi/{version}/receiver/hubclientinfo/{cc}/{pid}`
pub async fn put_client_info(
    State(state): State<AppState>,
    PlatformAuth(platform): PlatformAuth,
    Path((version, module, cc, pid)): Path<(String, String, String, String)>,
    body: Bytes,
) -> ApiResult<Json<Envelope<()>>> {
    require_version(&state, &version)?;
    let module: ModuleId = module.parse()?;
    if module != ModuleId::HubClientInfo {
        return Err(unsupported_module(module));
    }
    let info: ClientInfo = decode(&body)?;
    if info.party() != PartyKey::new(cc, pid) {
        return Err(ApiError::InvalidRequest(format!(
            "client info for {} does not match the URL",
            info.party()
        )));
    }
    state.ctx.inbound().ingest_client_info(&platform, info).await?;
    Ok(ok(()))
}

/// `POST /ocpi/{version}/receiver/cdrs`
pub async fn post_cdr(
    State(state): State<AppState>,
    PlatformAuth(platform): PlatformAuth,
    Path(version): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Envelope<()>>> {
    require_version(&state, &version)?;
    let cdr: Cdr = decode(&body)?;
    state.ctx.inbound().ingest(&platform, cdr).await?;
    Ok(ok(()))
}

// =============================================================================
// Receiver: EVSEs & Connectors
// =============================================================================

/// `PUT /ocpi/{version}/receiver/locations/{cc}/{pid}/{id}/{evse}`
pub async fn put_evse(
    State(state): State<AppState>,
    PlatformAuth(platform): PlatformAuth,
    Path((version, module, cc, pid, id, evse_uid)): Path<(String, String, String, String, String, String)>,
    body: Bytes,
) -> ApiResult<Json<Envelope<()>>> {
    require_version(&state, &version)?;
    require_locations(&module)?;
    let evse: Evse = decode(&body)?;
    if evse.uid != evse_uid {
        return Err(ApiError::InvalidRequest(format!("EVSE {} does not match the URL", evse.uid)));
    }
    let party = PartyKey::new(cc, pid);
    state.ctx.inbound().ingest_evse(&platform, &party, &id, evse).await?;
    Ok(ok(()))
}

/// `PATCH /ocpi/{version}/receiver/locations/{cc}/{pid}/{id}/{evse}`
pub async fn patch_evse(
    State(state): State<AppState>,
    PlatformAuth(platform): PlatformAuth,
    Path((version, module, cc, pid, id, evse_uid)): Path<(String, String, String, String, String, String)>,
    body: Bytes,
) -> ApiResult<Json<Envelope<()>>> {
    require_version(&state, &version)?;
    require_locations(&module)?;
    let patch: Map<String, Value> = decode(&body)?;
    let party = PartyKey::new(cc, pid);
    state
        .ctx
        .inbound()
        .patch_evse(&platform, &party, &id, &evse_uid, &patch)
        .await?;
    Ok(ok(()))
}

/// `PUT /ocpi/{version}/receiver/locations/{cc}/{pid}/{id}/{evse}/{connector}`
pub async fn put_connector(
    State(state): State<AppState>,
    PlatformAuth(platform): PlatformAuth,
    Path((version, module, cc, pid, id, evse_uid, connector_id)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
    body: Bytes,
) -> ApiResult<Json<Envelope<()>>> {
    require_version(&state, &version)?;
    require_locations(&module)?;
    let connector: Connector = decode(&body)?;
    if connector.id != connector_id {
        return Err(ApiError::InvalidRequest(format!(
            "connector {} does not match the URL",
            connector.id
        )));
    }
    let party = PartyKey::new(cc, pid);
    state
        .ctx
        .inbound()
        .ingest_connector(&platform, &party, &id, &evse_uid, connector)
        .await?;
    Ok(ok(()))
}

/// `PATCH /ocpi/{version}/receiver/locations/{cc}/{pid}/{id}/{evse}/{connector}`
pub async fn patch_connector(
    State(state): State<AppState>,
    PlatformAuth(platform): PlatformAuth,
    Path((version, module, cc, pid, id, evse_uid, connector_id)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
    body: Bytes,
) -> ApiResult<Json<Envelope<()>>> {
    require_version(&state, &version)?;
    require_locations(&module)?;
    let patch: Map<String, Value> = decode(&body)?;
    let party = PartyKey::new(cc, pid);
    state
        .ctx
        .inbound()
        .patch_connector(&platform, &party, &id, &evse_uid, &connector_id, &patch)
        .await?;
    Ok(ok(()))
}
