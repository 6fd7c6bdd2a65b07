//! Local backend API.
//!
//! The local backend reports its own changes here and drives commands and
//! pulls. Every route except `/hub/health` requires the admin token.
//!
//! ```text
//! PUT  /hub/{module}/{cc}/{pid}/{id}[/{evse}[/{connector}]]   local change
//! PUT  /hub/hubclientinfo/{cc}/{pid}                          local party status
//! POST /hub/cdrs                                              local CDR
//! POST /hub/commands/{kind}?country_code=&party_id=           outbound command
//! POST /hub/commands/{id}/result                              inbound command done
//! POST /hub/pull/{module}                                     pull from all remotes
//! POST /hub/pull/{module}/{platform}/{path..}                 pull one object
//! POST /hub/platforms/{platform}/suspend|purge                directory upkeep
//! ```

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use ampere_core::{
    Cdr, ClientInfo, Command, CommandKind, CommandPayload, CommandResult, Connector, Envelope, Evse, Location,
    ModuleId, PartyKey, Session, SyncEntity, Tariff, Token, ValidationError,
};
use ampere_sync::{DateRange, Propagation, PullReport, PullSelection};

use super::{check_identity, decode, ok, require_locations, unsupported_module};
use crate::auth::AdminAuth;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Whether a reported change altered stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalChange {
    pub changed: bool,
}

impl LocalChange {
    fn reported<T>(stored: Option<T>) -> Json<Envelope<LocalChange>> {
        ok(LocalChange {
            changed: stored.is_some(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub database: bool,
    pub platform_id: String,
}

/// `GET /hub/health`
pub async fn health(State(state): State<AppState>) -> Json<Envelope<Health>> {
    let database = state.ctx.db.health_check().await;
    ok(Health {
        status: if database { "ok" } else { "degraded" },
        database,
        platform_id: state.ctx.local.platform_id().to_string(),
    })
}

// =============================================================================
// Local Changes
// =============================================================================

/// `PUT /hub/{module}/{cc}/{pid}/{id}`
pub async fn put_object(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path((module, cc, pid, id)): Path<(String, String, String, String)>,
    body: Bytes,
) -> ApiResult<Json<Envelope<LocalChange>>> {
    let party = PartyKey::new(cc, pid);
    let propagation = state.ctx.propagation();

    let changed = match module.parse::<ModuleId>()? {
        ModuleId::Locations => changed::<Location>(&propagation, &party, &id, &body).await?,
        ModuleId::Tariffs => changed::<Tariff>(&propagation, &party, &id, &body).await?,
        ModuleId::Tokens => changed::<Token>(&propagation, &party, &id, &body).await?,
        ModuleId::Sessions => changed::<Session>(&propagation, &party, &id, &body).await?,
        ModuleId::Cdrs => changed::<Cdr>(&propagation, &party, &id, &body).await?,
        other => return Err(unsupported_module(other)),
    };
    Ok(ok(LocalChange { changed }))
}

async fn changed<T: SyncEntity>(propagation: &Propagation, party: &PartyKey, id: &str, body: &[u8]) -> ApiResult<bool> {
    let entity: T = decode(body)?;
    check_identity(&entity.party(), entity.id(), party, id)?;
    Ok(propagation.on_local_changed(entity).await?.is_some())
}

/// `POST /hub/cdrs`
pub async fn post_cdr(
    State(state): State<AppState>,
    _admin: AdminAuth,
    body: Bytes,
) -> ApiResult<Json<Envelope<LocalChange>>> {
    let cdr: Cdr = decode(&body)?;
    let stored = state.ctx.propagation().on_local_changed(cdr).await?;
    Ok(LocalChange::reported(stored))
}

/// `PUT /hub/hubclientinfo/{cc}/{pid}`
pub async fn put_client_info(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path((module, cc, pid)): Path<(String, String, String)>,
    body: Bytes,
) -> ApiResult<Json<Envelope<LocalChange>>> {
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
    let party = state.ctx.propagation().on_local_client_info_changed(info).await?;
    Ok(LocalChange::reported(party))
}

/// `PUT /hub/locations/{cc}/{pid}/{id}/{evse}`
pub async fn put_evse(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path((module, cc, pid, id, evse_uid)): Path<(String, String, String, String, String)>,
    body: Bytes,
) -> ApiResult<Json<Envelope<LocalChange>>> {
    require_locations(&module)?;
    let evse: Evse = decode(&body)?;
    if evse.uid != evse_uid {
        return Err(ApiError::InvalidRequest(format!("EVSE {} does not match the URL", evse.uid)));
    }
    let party = PartyKey::new(cc, pid);
    let location = state
        .ctx
        .propagation()
        .on_local_evse_changed(&party, &id, evse)
        .await?;
    Ok(LocalChange::reported(location))
}

/// `PUT /hub/locations/{cc}/{pid}/{id}/{evse}/{connector}`
pub async fn put_connector(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path((module, cc, pid, id, evse_uid, connector_id)): Path<(String, String, String, String, String, String)>,
    body: Bytes,
) -> ApiResult<Json<Envelope<LocalChange>>> {
    require_locations(&module)?;
    let connector: Connector = decode(&body)?;
    if connector.id != connector_id {
        return Err(ApiError::InvalidRequest(format!(
            "connector {} does not match the URL",
            connector.id
        )));
    }
    let party = PartyKey::new(cc, pid);
    let location = state
        .ctx
        .propagation()
        .on_local_connector_changed(&party, &id, &evse_uid, connector)
        .await?;
    Ok(LocalChange::reported(location))
}

// =============================================================================
// Commands
// =============================================================================

/// Party owning the location or session a command targets.
#[derive(Debug, Default, Deserialize)]
pub struct CommandOwner {
    pub country_code: Option<String>,
    pub party_id: Option<String>,
}

impl CommandOwner {
    fn party(self) -> Result<Option<PartyKey>, ValidationError> {
        match (self.country_code, self.party_id) {
            (Some(cc), Some(pid)) => Ok(Some(PartyKey::new(cc, pid))),
            (None, None) => Ok(None),
            _ => Err(ValidationError::Required {
                field: "country_code and party_id".to_string(),
            }),
        }
    }
}

/// `POST /hub/commands/{kind}`
pub async fn issue_command(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(kind): Path<String>,
    Query(owner): Query<CommandOwner>,
    body: Bytes,
) -> ApiResult<Json<Envelope<Command>>> {
    let kind: CommandKind = kind.parse()?;
    let owner = owner.party()?;
    let body: Value = decode(&body)?;
    let payload = CommandPayload::decode(kind, body)?;
    let command = state.ctx.commands().issue(owner.as_ref(), payload).await?;
    Ok(ok(command))
}

/// `POST /hub/commands/{id}/result`
pub async fn complete_command(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Envelope<Command>>> {
    let result: CommandResult = decode(&body)?;
    let command = state.ctx.commands().complete_local_command(&id, result).await?;
    Ok(ok(command))
}

// =============================================================================
// Pull & Directory
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct PullQuery {
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    /// Only remotes that do not push this module.
    #[serde(default)]
    pub push_disabled_only: bool,
}

/// `POST /hub/pull/{module}`
pub async fn pull(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(module): Path<String>,
    Query(query): Query<PullQuery>,
) -> ApiResult<Json<Envelope<PullReport>>> {
    let module: ModuleId = module.parse()?;
    let selection = if query.push_disabled_only {
        PullSelection::PushDisabledOnly
    } else {
        PullSelection::All
    };
    let range = DateRange {
        from: query.date_from,
        to: query.date_to,
    };
    let report = state.ctx.puller().pull_module(module, selection, range).await?;
    Ok(ok(report))
}

/// `POST /hub/pull/{module}/{platform}/{path..}`
pub async fn pull_object(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path((module, platform_id, path)): Path<(String, String, String)>,
) -> ApiResult<Json<Envelope<LocalChange>>> {
    let module: ModuleId = module.parse()?;
    let path: Vec<String> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();
    let changed = state
        .ctx
        .puller()
        .pull_one_module(module, &platform_id, &path)
        .await?;
    Ok(ok(LocalChange { changed }))
}

/// `POST /hub/platforms/{platform}/suspend`
pub async fn suspend_platform(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(platform_id): Path<String>,
) -> ApiResult<Json<Envelope<()>>> {
    state.ctx.handshake().suspend(&platform_id).await?;
    Ok(ok(()))
}

#[derive(Debug, Serialize)]
pub struct Purged {
    pub deleted: u64,
}

/// `POST /hub/platforms/{platform}/purge`
pub async fn purge_platform(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(platform_id): Path<String>,
) -> ApiResult<Json<Envelope<Purged>>> {
    let deleted = state.ctx.handshake().purge(&platform_id).await?;
    info!(platform_id, deleted, "Platform data purged");
    Ok(ok(Purged { deleted }))
}
