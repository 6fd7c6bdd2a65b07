//! # Command Dispatch
//!
//! Issues commands to remote platforms, accepts commands from them and
//! correlates their asynchronous results.
//!
//! ## State Machine
//! ```text
//!                         ┌──────────────────┐
//!        issue / accept ─►│ ACCEPTED_REQUEST │
//!                         └────────┬─────────┘
//!          ┌───────────────┬───────┴───────┬──────────────────┐
//!          ▼               ▼               ▼                  ▼
//!   sync non-ACCEPTED   result OK      result negative    deadline sweep
//!          │               │               │                  │
//!   REJECTED_REQUEST       OK            FAILED            EXPIRED
//! ```
//!
//! Every transition out of `ACCEPTED_REQUEST` goes through the conditional
//! `complete` update, so a late result and a sweep can never both win.
//!
//! ## Directions
//! - **Outbound**: the local platform asks the remote owning a location,
//!   session or reservation to act. The remote posts the result to
//!   `{local sender commands endpoint}/{KIND}/{id}`.
//! - **Inbound**: a remote asks the local platform to act. The local backend
//!   reports the outcome, which is posted to the caller's `response_url`.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ampere_core::validation::validate_routing;
use ampere_core::{
    Command, CommandKind, CommandPayload, CommandResponse, CommandResponseType, CommandResult,
    CommandStatus, InterfaceRole, Location, ModuleId, Party, PartyKey, Platform,
    RoutingContext, Session, SyncEntity, ValidationError,
};
use ampere_db::IssuedBy;

use crate::context::HubContext;
use crate::error::{SyncError, SyncResult};
use crate::notifier::HubEvent;
use crate::remote::RemoteTarget;

/// Where an outbound command goes.
#[derive(Debug)]
struct Resolved {
    platform: Platform,
    to_party: Option<PartyKey>,
}

pub struct CommandService {
    ctx: HubContext,
}

impl CommandService {
    pub fn new(ctx: HubContext) -> Self {
        CommandService { ctx }
    }

    fn timeout(&self) -> chrono::Duration {
        self.ctx.config.commands.timeout()
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Persists a command for the remote owning its target and dispatches it.
    ///
    /// `owner` is the party of the targeted location or session; object ids
    /// are only unique within a party. Reservation cancels resolve through
    /// the reservation and need none.
    ///
    /// The `response_url` of `payload` is replaced by the local result endpoint.
    pub async fn issue(&self, owner: Option<&PartyKey>, mut payload: CommandPayload) -> SyncResult<Command> {
        let kind = payload.kind();
        let local_id = self.ctx.local.platform_id();
        let Resolved { platform, to_party } = self.resolve_outbound(owner, &payload).await?;

        let url = platform
            .endpoint(ModuleId::Commands, InterfaceRole::Receiver)
            .ok_or_else(|| SyncError::EndpointNotSupported {
                platform_id: platform.id.clone(),
                module: ModuleId::Commands,
            })?;
        let target = RemoteTarget::for_platform(
            &platform,
            url,
            local_id,
            RoutingContext::between(self.ctx.local.default_party(), to_party),
        )?;

        let id = Uuid::new_v4().to_string();
        payload.set_response_url(format!("{}/{}/{}", self.result_endpoint(&platform)?, kind, id));
        let command = Command::issue(id, payload, local_id, &platform.id, Utc::now(), self.timeout());
        self.ctx.db.commands().insert(&command).await?;
        info!(command_id = %command.id, %kind, platform_id = %platform.id, "Command issued");

        if !platform.push_enabled(ModuleId::Commands) {
            debug!(command_id = %command.id, platform_id = %platform.id, "Command push disabled, not dispatching");
            return Ok(command);
        }

        let body = command.payload.to_wire()?;
        let ctx = self.ctx.clone();
        let command_id = command.id.clone();
        self.ctx.dispatcher.spawn("command", platform.id.clone(), async move {
            let response = ctx.remote.post_command(&target, kind, &body).await?;
            if response.result == CommandResponseType::Accepted {
                debug!(%command_id, timeout = response.timeout, "Command accepted by remote");
                return Ok(());
            }
            reject_immediately(&ctx, &command_id, &response).await
        });

        Ok(command)
    }

    async fn resolve_outbound(&self, party: Option<&PartyKey>, payload: &CommandPayload) -> SyncResult<Resolved> {
        let local_id = self.ctx.local.platform_id();
        let owner = match payload {
            CommandPayload::StartSession(p) => {
                let location = self.location(required(party)?, &p.location_id).await?;
                check_target(&location.entity, p.evse_uid.as_deref(), p.connector_id.as_deref())?;
                (location.platform_id, Some(location.entity.party()))
            }
            CommandPayload::ReserveNow(p) => {
                let location = self.location(required(party)?, &p.location_id).await?;
                check_target(&location.entity, p.evse_uid.as_deref(), None)?;
                (location.platform_id, Some(location.entity.party()))
            }
            CommandPayload::StopSession(p) => {
                let session = self
                    .ctx
                    .db
                    .entities::<Session>()
                    .get(required(party)?, &p.session_id)
                    .await?
                    .ok_or_else(|| SyncError::not_found(Session::KIND, &p.session_id))?;
                (session.platform_id, Some(session.entity.party()))
            }
            CommandPayload::CancelReservation(p) => {
                let reservation = self.reservation(&p.reservation_id, local_id).await?;
                self.check_not_cancelled(&p.reservation_id).await?;
                (reservation.target_platform_id, None)
            }
            CommandPayload::UnlockConnector(_) => {
                return Err(SyncError::StateViolation("unlock connector is not supported".into()));
            }
        };

        let (owner_id, to_party) = owner;
        if owner_id == local_id {
            warn!(kind = %payload.kind(), "Command target is owned locally");
            return Err(SyncError::ownership("Command", payload.kind().as_str(), owner_id, local_id));
        }
        let platform = self.ctx.connected_platform(&owner_id).await?;
        Ok(Resolved { platform, to_party })
    }

    /// Local sender commands endpoint in the version negotiated with `platform`.
    fn result_endpoint(&self, platform: &Platform) -> SyncResult<String> {
        let local = &self.ctx.local;
        let version = platform
            .protocol
            .version
            .as_deref()
            .filter(|v| local.supports_version(v))
            .or_else(|| local.default_version())
            .ok_or_else(|| SyncError::InvalidConfig("no protocol version configured".into()))?
            .to_string();
        local.endpoint(&version, ModuleId::Commands, InterfaceRole::Sender)
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Handles a command sent by `platform` for the local platform to execute.
    ///
    /// Unknown targets are answered, not raised: the caller receives the
    /// negative response synchronously.
    pub async fn handle_command(
        &self,
        platform: &Platform,
        routing: &RoutingContext,
        kind: CommandKind,
        body: Value,
    ) -> SyncResult<CommandResponse> {
        if !platform.is_reachable_peer() {
            return Err(SyncError::PlatformNotConnected(platform.id.clone()));
        }
        validate_routing(routing)?;
        let to_party = routing.to_party.as_ref().ok_or_else(|| ValidationError::Required {
            field: "OCPI-to-party-id".to_string(),
        })?;

        if kind == CommandKind::UnlockConnector {
            warn!(platform_id = %platform.id, "Unlock connector requested, not supported");
            return Ok(CommandResponse::not_supported("UNLOCK_CONNECTOR is not supported"));
        }

        let payload = CommandPayload::decode(kind, body)?;
        if let Some(response) = self.check_inbound_target(platform, to_party, &payload).await? {
            debug!(platform_id = %platform.id, %kind, result = ?response.result, "Command refused");
            return Ok(response);
        }

        let local_id = self.ctx.local.platform_id();
        let command = Command::issue(
            Uuid::new_v4().to_string(),
            payload,
            &platform.id,
            local_id,
            Utc::now(),
            self.timeout(),
        );
        self.ctx.db.commands().insert(&command).await?;
        info!(command_id = %command.id, %kind, platform_id = %platform.id, "Command received");

        self.ctx.notify(HubEvent::command_requested(&command)).await?;
        Ok(CommandResponse::accepted(self.timeout().num_seconds().max(0) as u64))
    }

    /// `Some(response)` when the target is unknown or not locally owned.
    ///
    /// Locations and sessions are looked up under the addressed party.
    async fn check_inbound_target(
        &self,
        platform: &Platform,
        party: &PartyKey,
        payload: &CommandPayload,
    ) -> SyncResult<Option<CommandResponse>> {
        let local_id = self.ctx.local.platform_id();
        let rejected = |message: String| CommandResponse {
            result: CommandResponseType::Rejected,
            timeout: 0,
            message: Some(message),
        };

        match payload {
            CommandPayload::StartSession(p) => {
                let location = self.ctx.db.entities::<Location>().get(party, &p.location_id).await?;
                Ok(match location {
                    Some(l) if l.platform_id == local_id => {
                        check_target(&l.entity, p.evse_uid.as_deref(), p.connector_id.as_deref())
                            .err()
                            .map(|e| rejected(e.to_string()))
                    }
                    _ => Some(rejected(format!("unknown location {}", p.location_id))),
                })
            }
            CommandPayload::ReserveNow(p) => {
                let location = self.ctx.db.entities::<Location>().get(party, &p.location_id).await?;
                Ok(match location {
                    Some(l) if l.platform_id == local_id => check_target(&l.entity, p.evse_uid.as_deref(), None)
                        .err()
                        .map(|e| rejected(e.to_string())),
                    _ => Some(rejected(format!("unknown location {}", p.location_id))),
                })
            }
            CommandPayload::StopSession(p) => {
                let session = self.ctx.db.entities::<Session>().get(party, &p.session_id).await?;
                Ok(match session {
                    Some(s) if s.platform_id == local_id => None,
                    _ => Some(CommandResponse {
                        result: CommandResponseType::UnknownSession,
                        timeout: 0,
                        message: Some(format!("unknown session {}", p.session_id)),
                    }),
                })
            }
            CommandPayload::CancelReservation(p) => {
                if self.reservation(&p.reservation_id, &platform.id).await.is_err() {
                    return Ok(Some(rejected(format!("unknown reservation {}", p.reservation_id))));
                }
                Ok(self
                    .check_not_cancelled(&p.reservation_id)
                    .await
                    .err()
                    .map(|e| rejected(e.to_string())))
            }
            CommandPayload::UnlockConnector(_) => Ok(Some(CommandResponse::not_supported(
                "UNLOCK_CONNECTOR is not supported",
            ))),
        }
    }

    // =========================================================================
    // Results
    // =========================================================================

    /// Records a result posted by `platform` for command `id`.
    pub async fn receive_command_result(
        &self,
        platform: &Platform,
        id: &str,
        result: CommandResult,
    ) -> SyncResult<Command> {
        let mut command = self
            .ctx
            .db
            .commands()
            .get(id)
            .await?
            .ok_or_else(|| SyncError::not_found("Command", id))?;

        if platform.id != command.target_platform_id && platform.id != command.platform_id {
            return Err(SyncError::ownership("Command", id, &command.target_platform_id, &platform.id));
        }
        command.apply_result(result, &platform.id, Utc::now())?;
        self.complete(&command).await?;

        info!(command_id = %id, status = command.status.as_str(), "Command result received");
        self.ctx
            .notify(HubEvent::CommandResponse {
                command: command.clone(),
            })
            .await?;
        Ok(command)
    }

    /// Records the local backend's outcome of an inbound command and posts it
    /// to the issuing platform.
    pub async fn complete_local_command(&self, id: &str, result: CommandResult) -> SyncResult<Command> {
        let local_id = self.ctx.local.platform_id();
        let mut command = self
            .ctx
            .db
            .commands()
            .get(id)
            .await?
            .ok_or_else(|| SyncError::not_found("Command", id))?;
        if command.target_platform_id != local_id {
            return Err(SyncError::ownership("Command", id, &command.target_platform_id, local_id));
        }

        command.apply_result(result, local_id, Utc::now())?;
        self.complete(&command).await?;
        info!(command_id = %id, status = command.status.as_str(), "Command completed locally");

        self.post_result(&command).await?;
        Ok(command)
    }

    /// Sends the stored result of an inbound command to its issuer.
    async fn post_result(&self, command: &Command) -> SyncResult<()> {
        let Some(result) = command.result.clone() else {
            return Ok(());
        };
        let issuer = match self.ctx.connected_platform(&command.platform_id).await {
            Ok(issuer) => issuer,
            Err(e) => {
                warn!(command_id = %command.id, error = %e, "Issuer unreachable, result not posted");
                return Ok(());
            }
        };
        if !issuer.push_enabled(ModuleId::Commands) {
            debug!(command_id = %command.id, platform_id = %issuer.id, "Command push disabled, result not posted");
            return Ok(());
        }

        let to_party = self
            .ctx
            .db
            .parties()
            .list_by_platform(&issuer.id)
            .await?
            .first()
            .map(Party::key);
        let target = RemoteTarget::for_platform(
            &issuer,
            command.response_url(),
            self.ctx.local.platform_id(),
            RoutingContext::between(self.ctx.local.default_party(), to_party),
        )?;

        let remote = self.ctx.remote.clone();
        self.ctx.dispatcher.spawn("command_result", issuer.id.clone(), async move {
            remote.post_command_result(&target, &result).await
        });
        Ok(())
    }

    async fn complete(&self, command: &Command) -> SyncResult<()> {
        if !self.ctx.db.commands().complete(command).await? {
            return Err(SyncError::StateViolation(format!(
                "command {} is no longer pending",
                command.id
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Deadline Sweeps
    // =========================================================================

    /// Expires overdue commands the local platform issued. Returns how many expired.
    pub async fn sweep_local_commands(&self, now: DateTime<Utc>) -> SyncResult<usize> {
        let local_id = self.ctx.local.platform_id();
        let expired = self.ctx.db.commands().find_expired(now, IssuedBy::Local(local_id)).await?;

        let mut count = 0;
        for mut command in expired {
            let outcome = async {
                command.apply_result(CommandResult::timeout(), local_id, now)?;
                self.complete(&command).await?;
                self.ctx
                    .notify(HubEvent::CommandResponse {
                        command: command.clone(),
                    })
                    .await
            }
            .await;
            match outcome {
                Ok(()) => count += 1,
                Err(e) => warn!(command_id = %command.id, error = %e, "Failed to expire command"),
            }
        }

        if count > 0 {
            info!(count, "Expired local commands");
        }
        Ok(count)
    }

    /// Expires overdue commands remotes sent to the local platform and tells
    /// each issuer. Returns how many expired.
    pub async fn sweep_remote_commands(&self, now: DateTime<Utc>) -> SyncResult<usize> {
        let local_id = self.ctx.local.platform_id();
        let expired = self.ctx.db.commands().find_expired(now, IssuedBy::Remote(local_id)).await?;

        let mut count = 0;
        for mut command in expired {
            let outcome = async {
                command.apply_result(CommandResult::timeout(), local_id, now)?;
                self.complete(&command).await?;
                self.post_result(&command).await
            }
            .await;
            match outcome {
                Ok(()) => count += 1,
                Err(e) => warn!(command_id = %command.id, error = %e, "Failed to expire command"),
            }
        }

        if count > 0 {
            info!(count, "Expired remote commands");
        }
        Ok(count)
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    async fn location(&self, party: &PartyKey, id: &str) -> SyncResult<ampere_core::Stored<Location>> {
        self.ctx
            .db
            .entities::<Location>()
            .get(party, id)
            .await?
            .ok_or_else(|| SyncError::not_found(Location::KIND, format!("{}/{}", party, id)))
    }

    /// The reservation command `issuer` sent for `reservation_id`.
    async fn reservation(&self, reservation_id: &str, issuer: &str) -> SyncResult<Command> {
        self.ctx
            .db
            .commands()
            .find_by_target(CommandKind::ReserveNow, reservation_id)
            .await?
            .into_iter()
            .rev()
            .find(|c| c.platform_id == issuer && c.status != CommandStatus::RejectedRequest)
            .ok_or_else(|| SyncError::not_found("Reservation", reservation_id))
    }

    async fn check_not_cancelled(&self, reservation_id: &str) -> SyncResult<()> {
        let cancels = self
            .ctx
            .db
            .commands()
            .find_by_target(CommandKind::CancelReservation, reservation_id)
            .await?;
        if cancels
            .iter()
            .any(|c| c.is_pending() || c.status == CommandStatus::Ok)
        {
            return Err(SyncError::StateViolation(format!(
                "reservation {} is already cancelled",
                reservation_id
            )));
        }
        Ok(())
    }
}

/// Moves an outbound command the remote refused synchronously to `REJECTED_REQUEST`.
async fn reject_immediately(ctx: &HubContext, command_id: &str, response: &CommandResponse) -> SyncResult<()> {
    let mut command = ctx
        .db
        .commands()
        .get(command_id)
        .await?
        .ok_or_else(|| SyncError::not_found("Command", command_id))?;
    command.reject(response, Utc::now())?;
    if !ctx.db.commands().complete(&command).await? {
        debug!(%command_id, "Command settled before the rejection was recorded");
        return Ok(());
    }
    info!(%command_id, result = ?response.result, "Command rejected by remote");
    ctx.notify(HubEvent::CommandResponse { command }).await
}

/// The owning party a location or session command must name.
fn required(party: Option<&PartyKey>) -> SyncResult<&PartyKey> {
    party.ok_or_else(|| {
        SyncError::Validation(ValidationError::Required {
            field: "country_code/party_id".to_string(),
        })
    })
}

fn check_target(location: &Location, evse_uid: Option<&str>, connector_id: Option<&str>) -> SyncResult<()> {
    let Some(evse_uid) = evse_uid else {
        return Ok(());
    };
    if location.evse(evse_uid).is_none() {
        return Err(SyncError::not_found("Evse", evse_uid));
    }
    if let Some(connector_id) = connector_id {
        if location.connector(evse_uid, connector_id).is_none() {
            return Err(SyncError::not_found("Connector", connector_id));
        }
    }
    Ok(())
}
