//! # Remote Commands
//!
//! A [`Command`] records one asynchronous remote operation: who issued it,
//! what it asks for, when it expires and how it ended.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │                       ┌──────────────────┐                              │
//! │       create ───────► │ ACCEPTED_REQUEST │                              │
//! │                       └────────┬─────────┘                              │
//! │                                │                                        │
//! │        ┌──────────────┬────────┴───────┬────────────────┐               │
//! │        ▼              ▼                ▼                ▼               │
//! │ REJECTED_REQUEST     OK             FAILED           EXPIRED            │
//! │ (immediate reject) (accepted,     (any negative   (TIMEOUT result,      │
//! │                    canceled)       result)         deadline sweep)      │
//! │                                                                         │
//! │  Terminal states never change again.                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::entity::Token;
use crate::error::{CoreError, CoreResult, ValidationError};

// =============================================================================
// Enumerations
// =============================================================================

/// The kind of remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    StartSession,
    StopSession,
    ReserveNow,
    CancelReservation,
    UnlockConnector,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::StartSession => "START_SESSION",
            CommandKind::StopSession => "STOP_SESSION",
            CommandKind::ReserveNow => "RESERVE_NOW",
            CommandKind::CancelReservation => "CANCEL_RESERVATION",
            CommandKind::UnlockConnector => "UNLOCK_CONNECTOR",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "START_SESSION" => Ok(CommandKind::StartSession),
            "STOP_SESSION" => Ok(CommandKind::StopSession),
            "RESERVE_NOW" => Ok(CommandKind::ReserveNow),
            "CANCEL_RESERVATION" => Ok(CommandKind::CancelReservation),
            "UNLOCK_CONNECTOR" => Ok(CommandKind::UnlockConnector),
            other => Err(ValidationError::InvalidFormat {
                field: "command".to_string(),
                reason: format!("unknown command '{}'", other),
            }),
        }
    }
}

/// Processing status of a stored command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    AcceptedRequest,
    RejectedRequest,
    Ok,
    Failed,
    Expired,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::AcceptedRequest => "ACCEPTED_REQUEST",
            CommandStatus::RejectedRequest => "REJECTED_REQUEST",
            CommandStatus::Ok => "OK",
            CommandStatus::Failed => "FAILED",
            CommandStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandStatus::AcceptedRequest)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immediate answer to a command request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandResponseType {
    NotSupported,
    Rejected,
    Accepted,
    UnknownSession,
}

/// Synchronous response body of a command request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub result: CommandResponseType,
    /// Seconds the caller should wait for the asynchronous result.
    pub timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn accepted(timeout: u64) -> Self {
        CommandResponse {
            result: CommandResponseType::Accepted,
            timeout,
            message: None,
        }
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        CommandResponse {
            result: CommandResponseType::NotSupported,
            timeout: 0,
            message: Some(message.into()),
        }
    }
}

/// Final outcome of a command, delivered asynchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandResultType {
    Accepted,
    CanceledReservation,
    EvseOccupied,
    EvseInoperative,
    Failed,
    NotSupported,
    Rejected,
    Timeout,
    UnknownReservation,
}

impl CommandResultType {
    /// Status a command lands in when this result is applied.
    pub fn status(&self) -> CommandStatus {
        match self {
            CommandResultType::Accepted | CommandResultType::CanceledReservation => CommandStatus::Ok,
            CommandResultType::Timeout => CommandStatus::Expired,
            _ => CommandStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub result: CommandResultType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandResult {
    pub fn new(result: CommandResultType) -> Self {
        CommandResult { result, message: None }
    }

    pub fn timeout() -> Self {
        CommandResult {
            result: CommandResultType::Timeout,
            message: Some("No result received before the command deadline".to_string()),
        }
    }
}

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSession {
    pub response_url: String,
    pub token: Token,
    pub location_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evse_uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopSession {
    pub response_url: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveNow {
    pub response_url: String,
    pub token: Token,
    pub expiry_date: DateTime<Utc>,
    pub reservation_id: String,
    pub location_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evse_uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelReservation {
    pub response_url: String,
    pub reservation_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockConnector {
    pub response_url: String,
    pub location_id: String,
    pub evse_uid: String,
    pub connector_id: String,
}

/// Kind-specific command body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandPayload {
    StartSession(StartSession),
    StopSession(StopSession),
    ReserveNow(ReserveNow),
    CancelReservation(CancelReservation),
    UnlockConnector(UnlockConnector),
}

impl CommandPayload {
    /// Decodes a wire body for a known kind.
    pub fn decode(kind: CommandKind, body: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match kind {
            CommandKind::StartSession => CommandPayload::StartSession(serde_json::from_value(body)?),
            CommandKind::StopSession => CommandPayload::StopSession(serde_json::from_value(body)?),
            CommandKind::ReserveNow => CommandPayload::ReserveNow(serde_json::from_value(body)?),
            CommandKind::CancelReservation => {
                CommandPayload::CancelReservation(serde_json::from_value(body)?)
            }
            CommandKind::UnlockConnector => {
                CommandPayload::UnlockConnector(serde_json::from_value(body)?)
            }
        })
    }

    /// Encodes the bare wire body, without the kind tag.
    pub fn to_wire(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            CommandPayload::StartSession(p) => serde_json::to_value(p),
            CommandPayload::StopSession(p) => serde_json::to_value(p),
            CommandPayload::ReserveNow(p) => serde_json::to_value(p),
            CommandPayload::CancelReservation(p) => serde_json::to_value(p),
            CommandPayload::UnlockConnector(p) => serde_json::to_value(p),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            CommandPayload::StartSession(_) => CommandKind::StartSession,
            CommandPayload::StopSession(_) => CommandKind::StopSession,
            CommandPayload::ReserveNow(_) => CommandKind::ReserveNow,
            CommandPayload::CancelReservation(_) => CommandKind::CancelReservation,
            CommandPayload::UnlockConnector(_) => CommandKind::UnlockConnector,
        }
    }

    /// Where the result of this command must be posted.
    pub fn response_url(&self) -> &str {
        match self {
            CommandPayload::StartSession(p) => &p.response_url,
            CommandPayload::StopSession(p) => &p.response_url,
            CommandPayload::ReserveNow(p) => &p.response_url,
            CommandPayload::CancelReservation(p) => &p.response_url,
            CommandPayload::UnlockConnector(p) => &p.response_url,
        }
    }

    pub fn set_response_url(&mut self, url: String) {
        match self {
            CommandPayload::StartSession(p) => p.response_url = url,
            CommandPayload::StopSession(p) => p.response_url = url,
            CommandPayload::ReserveNow(p) => p.response_url = url,
            CommandPayload::CancelReservation(p) => p.response_url = url,
            CommandPayload::UnlockConnector(p) => p.response_url = url,
        }
    }

    /// Session or reservation the command refers to, used for lookups.
    pub fn target_ref(&self) -> Option<&str> {
        match self {
            CommandPayload::StopSession(p) => Some(&p.session_id),
            CommandPayload::ReserveNow(p) => Some(&p.reservation_id),
            CommandPayload::CancelReservation(p) => Some(&p.reservation_id),
            CommandPayload::StartSession(_) | CommandPayload::UnlockConnector(_) => None,
        }
    }

    pub fn auth_reference(&self) -> Option<&str> {
        match self {
            CommandPayload::StartSession(p) => p.authorization_reference.as_deref(),
            CommandPayload::ReserveNow(p) => p.authorization_reference.as_deref(),
            _ => None,
        }
    }
}

// =============================================================================
// Command
// =============================================================================

/// A stored command.
///
/// `platform_id` is the platform that issued the command. The result must come
/// from the other side, except for timeouts which either side may inject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    pub payload: CommandPayload,
    pub status: CommandStatus,
    pub platform_id: String,
    /// Platform that executes the command.
    pub target_platform_id: String,
    #[serde(default)]
    pub auth_reference: Option<String>,
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub result: Option<CommandResult>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Command {
    /// Creates a command in `ACCEPTED_REQUEST` with `deadline = now + timeout`.
    pub fn issue(
        id: impl Into<String>,
        payload: CommandPayload,
        platform_id: impl Into<String>,
        target_platform_id: impl Into<String>,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Self {
        let auth_reference = payload.auth_reference().map(str::to_string);
        Command {
            id: id.into(),
            payload,
            status: CommandStatus::AcceptedRequest,
            platform_id: platform_id.into(),
            target_platform_id: target_platform_id.into(),
            auth_reference,
            deadline: now + timeout,
            result: None,
            created_at: now,
            last_updated: now,
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.payload.kind()
    }

    pub fn target_ref(&self) -> Option<&str> {
        self.payload.target_ref()
    }

    pub fn response_url(&self) -> &str {
        self.payload.response_url()
    }

    pub fn is_pending(&self) -> bool {
        self.status == CommandStatus::AcceptedRequest
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.deadline < now
    }

    /// Applies an asynchronous result reported by `responder`.
    ///
    /// ## Rules
    /// - Only a pending command accepts a result
    /// - The issuing platform may only inject a `TIMEOUT`
    pub fn apply_result(&mut self, result: CommandResult, responder: &str, now: DateTime<Utc>) -> CoreResult<()> {
        if !self.is_pending() {
            return Err(CoreError::InvalidCommandStatus {
                command_id: self.id.clone(),
                status: self.status,
            });
        }
        if responder == self.platform_id && result.result != CommandResultType::Timeout {
            return Err(CoreError::SelfResponse {
                command_id: self.id.clone(),
                platform_id: responder.to_string(),
            });
        }

        self.status = result.result.status();
        self.result = Some(result);
        self.last_updated = now;
        Ok(())
    }

    /// Records a synchronous non-accepting answer from the executing platform.
    pub fn reject(&mut self, response: &CommandResponse, now: DateTime<Utc>) -> CoreResult<()> {
        if !self.is_pending() {
            return Err(CoreError::InvalidCommandStatus {
                command_id: self.id.clone(),
                status: self.status,
            });
        }
        self.status = CommandStatus::RejectedRequest;
        self.result = Some(CommandResult {
            result: match response.result {
                CommandResponseType::NotSupported => CommandResultType::NotSupported,
                _ => CommandResultType::Rejected,
            },
            message: response.message.clone(),
        });
        self.last_updated = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(now: DateTime<Utc>) -> Command {
        Command::issue(
            "cmd-1",
            CommandPayload::StopSession(StopSession {
                response_url: "https://local/commands/STOP_SESSION/cmd-1".into(),
                session_id: "S1".into(),
            }),
            "local",
            "remote-a",
            now,
            Duration::seconds(600),
        )
    }

    #[test]
    fn test_issue_sets_deadline_and_status() {
        let now = Utc::now();
        let cmd = stop(now);
        assert_eq!(cmd.status, CommandStatus::AcceptedRequest);
        assert_eq!(cmd.deadline, now + Duration::seconds(600));
        assert_eq!(cmd.target_ref(), Some("S1"));
        assert_eq!(cmd.kind(), CommandKind::StopSession);
    }

    #[test]
    fn test_result_from_issuer_is_rejected() {
        let now = Utc::now();
        let mut cmd = stop(now);
        let err = cmd
            .apply_result(CommandResult::new(CommandResultType::Accepted), "local", now)
            .unwrap_err();
        assert!(matches!(err, CoreError::SelfResponse { .. }));
        assert!(cmd.is_pending());
    }

    #[test]
    fn test_issuer_may_inject_timeout() {
        let now = Utc::now();
        let mut cmd = stop(now);
        cmd.apply_result(CommandResult::timeout(), "local", now).unwrap();
        assert_eq!(cmd.status, CommandStatus::Expired);
    }

    #[test]
    fn test_terminal_command_is_immutable() {
        let now = Utc::now();
        let mut cmd = stop(now);
        cmd.apply_result(CommandResult::new(CommandResultType::Accepted), "remote-a", now)
            .unwrap();
        assert_eq!(cmd.status, CommandStatus::Ok);

        let err = cmd
            .apply_result(CommandResult::new(CommandResultType::Failed), "remote-a", now)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidCommandStatus { .. }));
        assert_eq!(cmd.status, CommandStatus::Ok);
    }

    #[test]
    fn test_negative_results_fail() {
        for result in [
            CommandResultType::EvseOccupied,
            CommandResultType::Rejected,
            CommandResultType::UnknownReservation,
        ] {
            assert_eq!(result.status(), CommandStatus::Failed);
        }
        assert_eq!(CommandResultType::CanceledReservation.status(), CommandStatus::Ok);
    }

    #[test]
    fn test_payload_wire_encoding_has_no_tag() {
        let cmd = stop(Utc::now());
        let wire = cmd.payload.to_wire().unwrap();
        assert_eq!(wire["session_id"], "S1");

        let decoded = CommandPayload::decode(CommandKind::StopSession, wire).unwrap();
        assert_eq!(decoded, cmd.payload);
    }

    #[test]
    fn test_reject_records_response() {
        let now = Utc::now();
        let mut cmd = stop(now);
        cmd.reject(&CommandResponse::not_supported("no"), now).unwrap();
        assert_eq!(cmd.status, CommandStatus::RejectedRequest);
        assert_eq!(cmd.result.unwrap().result, CommandResultType::NotSupported);
    }
}
