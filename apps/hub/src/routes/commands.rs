//! Command endpoints for remote platforms.
//!
//! ```text
//! POST /ocpi/{v}/receiver/commands/{kind}      remote asks us to act
//! POST /ocpi/{v}/sender/commands/{kind}/{id}   remote reports the outcome
//!                                              of a command we sent
//! ```

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::Value;

use ampere_core::{CommandKind, CommandResponse, CommandResult, Envelope};

use super::{decode, ok, require_version};
use crate::auth::{PlatformAuth, Routing};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// `POST /ocpi/{version}/receiver/commands/{kind}`
pub async fn request(
    State(state): State<AppState>,
    PlatformAuth(platform): PlatformAuth,
    Routing(routing): Routing,
    Path((version, kind)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<Envelope<CommandResponse>>> {
    require_version(&state, &version)?;
    let kind: CommandKind = kind.parse()?;
    let body: Value = decode(&body)?;
    let response = state
        .ctx
        .commands()
        .handle_command(&platform, &routing, kind, body)
        .await?;
    Ok(ok(response))
}

/// `POST /ocpi/{version}/sender/commands/{kind}/{id}`
pub async fn result(
    State(state): State<AppState>,
    PlatformAuth(platform): PlatformAuth,
    Path((version, kind, id)): Path<(String, String, String)>,
    body: Bytes,
) -> ApiResult<Json<Envelope<()>>> {
    require_version(&state, &version)?;
    let kind: CommandKind = kind.parse()?;
    let result: CommandResult = decode(&body)?;

    if let Some(command) = state
        .ctx
        .db
        .commands()
        .get(&id)
        .await
        .map_err(ampere_sync::SyncError::from)?
    {
        if command.kind() != kind {
            return Err(ApiError::InvalidRequest(format!(
                "command {} is {}, not {}",
                id,
                command.kind(),
                kind
            )));
        }
    }

    state
        .ctx
        .commands()
        .receive_command_result(&platform, &id, result)
        .await?;
    Ok(ok(()))
}

#[cfg(test)]
mod tests {
    use crate::router;
    use crate::routes::testing::{connect_remote, send, test_state, VERSION};
    use ampere_core::command::StopSession;
    use ampere_core::{Command, CommandKind, CommandPayload, CommandStatus, Location, Role};
    use ampere_db::IssuedBy;
    use axum::http::{Method, StatusCode};
    use chrono::Utc;
    use serde_json::json;
    use tower::ServiceExt;

    fn local_location(state: &crate::AppState) -> Location {
        let party = state.ctx.local.default_party().unwrap();
        serde_json::from_value(json!({
            "country_code": party.country_code,
            "party_id": party.party_id,
            "id": "LOC1",
            "evses": [{ "uid": "E1", "last_updated": Utc::now(), "connectors": [] }],
            "last_updated": Utc::now(),
        }))
        .unwrap()
    }

    fn routing_headers(uri: &str) -> axum::http::request::Builder {
        axum::http::Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("Authorization", "Token token-emsp-b")
            .header("Content-Type", "application/json")
            .header("OCPI-from-country-code", "NL")
            .header("OCPI-from-party-id", "EMB")
            .header("OCPI-to-country-code", "NL")
            .header("OCPI-to-party-id", "AMP")
    }

    #[tokio::test]
    async fn test_start_session_accepted() {
        let state = test_state().await;
        connect_remote(&state, "emsp-b", Role::Emsp).await;
        state.ctx.propagation().on_local_changed(local_location(&state)).await.unwrap();
        let app = router(state.clone());

        let body = json!({
            "response_url": "https://emsp-b.test/results/1",
            "token": { "country_code": "NL", "party_id": "EMB", "uid": "T1", "last_updated": Utc::now() },
            "location_id": "LOC1",
            "evse_uid": "E1"
        });
        let uri = format!("/ocpi/{}/receiver/commands/START_SESSION", VERSION);
        let request = routing_headers(&uri)
            .body(axum::body::Body::from(body.to_string()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let envelope: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(envelope["data"]["result"], "ACCEPTED");

        let local_id = state.ctx.local.platform_id().to_string();
        let received = state
            .ctx
            .db
            .commands()
            .find_expired(Utc::now() + chrono::Duration::days(1), IssuedBy::Remote(&local_id))
            .await
            .unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].platform_id, "emsp-b");
        assert_eq!(received[0].kind(), CommandKind::StartSession);
    }

    #[tokio::test]
    async fn test_unknown_command_kind() {
        let state = test_state().await;
        connect_remote(&state, "emsp-b", Role::Emsp).await;
        let app = router(state);

        let uri = format!("/ocpi/{}/receiver/commands/SELF_DESTRUCT", VERSION);
        let response = send(&app, Method::POST, &uri, Some("token-emsp-b"), Some(json!({}))).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.body["status_code"], 2001);
    }

    #[tokio::test]
    async fn test_command_result_from_target() {
        let state = test_state().await;
        connect_remote(&state, "cpo-a", Role::Cpo).await;
        let local_id = state.ctx.local.platform_id().to_string();
        let command = Command::issue(
            "cmd-1",
            CommandPayload::StopSession(StopSession {
                response_url: format!("https://hub.test/ocpi/{}/sender/commands/STOP_SESSION/cmd-1", VERSION),
                session_id: "S1".into(),
            }),
            &local_id,
            "cpo-a",
            Utc::now(),
            chrono::Duration::minutes(10),
        );
        state.ctx.db.commands().insert(&command).await.unwrap();
        let app = router(state.clone());

        let wrong_kind = format!("/ocpi/{}/sender/commands/START_SESSION/cmd-1", VERSION);
        let response = send(&app, Method::POST, &wrong_kind, Some("token-cpo-a"), Some(json!({ "result": "ACCEPTED" }))).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);

        let uri = format!("/ocpi/{}/sender/commands/STOP_SESSION/cmd-1", VERSION);
        let response = send(&app, Method::POST, &uri, Some("token-cpo-a"), Some(json!({ "result": "ACCEPTED" }))).await;
        assert_eq!(response.status, StatusCode::OK);

        let stored = state.ctx.db.commands().get("cmd-1").await.unwrap().unwrap();
        assert_eq!(stored.status, CommandStatus::Ok);

        let response = send(&app, Method::POST, &uri, Some("token-cpo-a"), Some(json!({ "result": "FAILED" }))).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.body["status_code"], 2000);
    }
}
