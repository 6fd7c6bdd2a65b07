//! # HTTP Transport
//!
//! reqwest implementation of [`RemoteAccess`].
//!
//! ## Request Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  request(method, url, target)                                          │
//! │       │  Authorization: Token <token>                                  │
//! │       │  X-Request-ID / X-Correlation-ID                               │
//! │       │  OCPI-from-* / OCPI-to-* (when routing is known)               │
//! │       ▼                                                                 │
//! │  send()                                                                │
//! │       │                                                                 │
//! │       ├── HTTP 5xx / connect error  → SyncError::Http     (retryable)  │
//! │       ├── HTTP 4xx                  → SyncError::Remote                │
//! │       ├── envelope status ≥ 2000    → SyncError::Remote                │
//! │       └── envelope status 1xxx      → Ok(envelope.data)                │
//! │                                                                         │
//! │  GET requests retry retryable errors with exponential backoff.         │
//! │  PUT / PATCH / POST are sent exactly once.                             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use ampere_core::envelope::status;
use ampere_core::routing::headers;
use ampere_core::{
    CommandKind, CommandResponse, CommandResult, Credentials, Envelope, RoutingContext, Version,
    VersionDetails,
};

use crate::config::ClientSettings;
use crate::error::{SyncError, SyncResult};
use crate::remote::{PageRequest, RemoteAccess, RemoteTarget};

// =============================================================================
// Transport Configuration
// =============================================================================

/// Configuration for the HTTP transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-request timeout.
    pub timeout: Duration,

    /// Total attempts for GET requests (initial try + retries).
    pub max_attempts: u32,

    /// Initial backoff duration.
    pub initial_backoff: Duration,

    /// Maximum backoff duration.
    pub max_backoff: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl From<&ClientSettings> for TransportConfig {
    fn from(settings: &ClientSettings) -> Self {
        TransportConfig {
            timeout: settings.timeout(),
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_secs(settings.max_backoff_secs),
        }
    }
}

// =============================================================================
// HTTP Transport
// =============================================================================

/// Outbound protocol client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: TransportConfig,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> SyncResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(HttpTransport { client, config })
    }

    fn request(&self, method: Method, url: &str, token: &str, routing: Option<&RoutingContext>) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, url)
            .header(AUTHORIZATION, format!("Token {}", token))
            .header(headers::REQUEST_ID, Uuid::new_v4().to_string());

        if let Some(routing) = routing {
            builder = builder.header(headers::CORRELATION_ID, routing.correlation_id.as_str());
            if let Some(from) = &routing.from_party {
                builder = builder
                    .header(headers::FROM_COUNTRY_CODE, from.country_code.as_str())
                    .header(headers::FROM_PARTY_ID, from.party_id.as_str());
            }
            if let Some(to) = &routing.to_party {
                builder = builder
                    .header(headers::TO_COUNTRY_CODE, to.country_code.as_str())
                    .header(headers::TO_PARTY_ID, to.party_id.as_str());
            }
        }
        builder
    }

    fn target_request(&self, method: Method, url: &str, target: &RemoteTarget) -> RequestBuilder {
        self.request(method, url, &target.token, Some(&target.routing))
    }

    /// Sends the request and unwraps the response envelope.
    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> SyncResult<Option<T>> {
        let response = builder.send().await?;
        let http_status = response.status();

        if !http_status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if let Ok(envelope) = serde_json::from_str::<Envelope<Value>>(&body) {
                return Err(SyncError::Remote {
                    status_code: envelope.status_code,
                    message: envelope.status_message.unwrap_or_default(),
                });
            }
            if http_status.is_server_error() {
                return Err(SyncError::Http(format!("{}: {}", http_status, body)));
            }
            return Err(SyncError::Remote {
                status_code: status::CLIENT_ERROR,
                message: format!("{}: {}", http_status, body),
            });
        }

        let envelope: Envelope<T> = response.json().await?;
        if !envelope.is_success() {
            return Err(SyncError::Remote {
                status_code: envelope.status_code,
                message: envelope.status_message.unwrap_or_default(),
            });
        }
        Ok(envelope.data)
    }

    /// GET with retry of transient failures.
    async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        token: &str,
        routing: Option<&RoutingContext>,
        query: &[(&'static str, String)],
    ) -> SyncResult<Option<T>> {
        let mut backoff = self.create_backoff();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let builder = self.request(Method::GET, url, token, routing).query(query);
            match self.send(builder).await {
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    let delay = backoff.next_backoff().unwrap_or(self.config.max_backoff);
                    debug!(url, attempt, ?delay, error = %e, "Retrying GET");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(url, attempt, error = %e, "GET failed");
                    return Err(e);
                }
                ok => return ok,
            }
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.config.initial_backoff,
            initial_interval: self.config.initial_backoff,
            max_interval: self.config.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Appends path segments to an endpoint URL, percent-encoding each one.
pub fn join_path(base: &str, path: &[String]) -> SyncResult<String> {
    let mut url = Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| SyncError::InvalidConfig(format!("cannot append path to {}", base)))?
        .pop_if_empty()
        .extend(path);
    Ok(url.into())
}

fn require<T>(data: Option<T>, what: &str) -> SyncResult<T> {
    data.ok_or_else(|| SyncError::Serialization(format!("response without {}", what)))
}

// =============================================================================
// Remote Access Implementation
// =============================================================================

#[async_trait]
impl RemoteAccess for HttpTransport {
    async fn get_versions(&self, url: &str, token: &str) -> SyncResult<Vec<Version>> {
        let versions: Option<Vec<Version>> = self.get(url, token, None, &[]).await?;
        Ok(versions.unwrap_or_default())
    }

    async fn get_version_details(&self, url: &str, token: &str) -> SyncResult<VersionDetails> {
        require(self.get(url, token, None, &[]).await?, "version details")
    }

    async fn post_credentials(
        &self,
        target: &RemoteTarget,
        credentials: &Credentials,
    ) -> SyncResult<Credentials> {
        let builder = self.target_request(Method::POST, &target.url, target).json(credentials);
        require(self.send(builder).await?, "credentials")
    }

    async fn put_credentials(
        &self,
        target: &RemoteTarget,
        credentials: &Credentials,
    ) -> SyncResult<Credentials> {
        let builder = self.target_request(Method::PUT, &target.url, target).json(credentials);
        require(self.send(builder).await?, "credentials")
    }

    async fn get_object(&self, target: &RemoteTarget, path: &[String]) -> SyncResult<Option<Value>> {
        let url = join_path(&target.url, path)?;
        self.get(&url, &target.token, Some(&target.routing), &[]).await
    }

    async fn get_page(&self, target: &RemoteTarget, page: &PageRequest) -> SyncResult<Vec<Value>> {
        let items: Option<Vec<Value>> = self
            .get(&target.url, &target.token, Some(&target.routing), &page.query())
            .await?;
        Ok(items.unwrap_or_default())
    }

    async fn put_object(&self, target: &RemoteTarget, path: &[String], body: &Value) -> SyncResult<()> {
        let url = join_path(&target.url, path)?;
        let builder = self.target_request(Method::PUT, &url, target).json(body);
        self.send::<Value>(builder).await?;
        Ok(())
    }

    async fn patch_object(&self, target: &RemoteTarget, path: &[String], body: &Value) -> SyncResult<()> {
        let url = join_path(&target.url, path)?;
        let builder = self.target_request(Method::PATCH, &url, target).json(body);
        self.send::<Value>(builder).await?;
        Ok(())
    }

    async fn post_object(&self, target: &RemoteTarget, body: &Value) -> SyncResult<()> {
        let builder = self.target_request(Method::POST, &target.url, target).json(body);
        self.send::<Value>(builder).await?;
        Ok(())
    }

    async fn post_command(
        &self,
        target: &RemoteTarget,
        kind: CommandKind,
        payload: &Value,
    ) -> SyncResult<CommandResponse> {
        let url = join_path(&target.url, &[kind.as_str().to_string()])?;
        let builder = self.target_request(Method::POST, &url, target).json(payload);
        require(self.send(builder).await?, "command response")
    }

    async fn post_command_result(&self, target: &RemoteTarget, result: &CommandResult) -> SyncResult<()> {
        let builder = self.target_request(Method::POST, &target.url, target).json(result);
        self.send::<Value>(builder).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ampere_core::{CommandResponseType, PartyKey};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport() -> HttpTransport {
        HttpTransport::new(TransportConfig {
            timeout: Duration::from_secs(5),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        })
        .expect("transport")
    }

    fn target(url: String) -> RemoteTarget {
        RemoteTarget {
            url,
            token: "tok-c".into(),
            from_platform: "local".into(),
            to_platform: "remote-a".into(),
            routing: RoutingContext::between(
                Some(PartyKey::new("NL", "AMP")),
                Some(PartyKey::new("DE", "CPO")),
            ),
        }
    }

    fn ok(data: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "data": data,
            "status_code": 1000,
            "timestamp": "2024-01-01T00:00:00Z"
        }))
    }

    #[tokio::test]
    async fn test_get_versions_sends_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ocpi/versions"))
            .and(header("Authorization", "Token tok-a"))
            .respond_with(ok(json!([{ "version": "2.2.1", "url": "https://a/2.2.1" }])))
            .expect(1)
            .mount(&server)
            .await;

        let versions = transport()
            .get_versions(&format!("{}/ocpi/versions", server.uri()), "tok-a")
            .await
            .unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, "2.2.1");
    }

    #[tokio::test]
    async fn test_get_page_sends_query_and_routing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/locations"))
            .and(query_param("offset", "100"))
            .and(query_param("limit", "50"))
            .and(header("OCPI-to-party-id", "CPO"))
            .respond_with(ok(json!([{ "id": "LOC1" }, { "id": "LOC2" }])))
            .mount(&server)
            .await;

        let page = PageRequest {
            offset: 100,
            limit: 50,
            ..Default::default()
        };
        let items = transport()
            .get_page(&target(format!("{}/locations", server.uri())), &page)
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_put_object_appends_path() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/receiver/locations/NL/ABC/LOC1"))
            .and(body_json(json!({ "id": "LOC1" })))
            .respond_with(ok(Value::Null))
            .expect(1)
            .mount(&server)
            .await;

        transport()
            .put_object(
                &target(format!("{}/receiver/locations", server.uri())),
                &["NL".into(), "ABC".into(), "LOC1".into()],
                &json!({ "id": "LOC1" }),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_error_envelope_is_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status_code": 2001,
                "status_message": "Missing field",
                "timestamp": "2024-01-01T00:00:00Z"
            })))
            .mount(&server)
            .await;

        let err = transport()
            .put_object(&target(server.uri()), &["X".into()], &json!({}))
            .await
            .unwrap_err();
        match err {
            SyncError::Remote { status_code, message } => {
                assert_eq!(status_code, 2001);
                assert_eq!(message, "Missing field");
            }
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = transport()
            .get_page(&target(server.uri()), &PageRequest::default())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_put_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        assert!(transport()
            .put_object(&target(server.uri()), &["X".into()], &json!({}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_post_command_returns_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/commands/STOP_SESSION"))
            .respond_with(ok(json!({ "result": "ACCEPTED", "timeout": 30 })))
            .mount(&server)
            .await;

        let response = transport()
            .post_command(
                &target(format!("{}/commands", server.uri())),
                CommandKind::StopSession,
                &json!({ "session_id": "S1" }),
            )
            .await
            .unwrap();
        assert_eq!(response.result, CommandResponseType::Accepted);
        assert_eq!(response.timeout, 30);
    }

    #[test]
    fn test_join_path_encodes_segments() {
        let url = join_path("https://a.example/ocpi/2.2.1/receiver/locations/", &["NL".into(), "A B".into()]).unwrap();
        assert_eq!(url, "https://a.example/ocpi/2.2.1/receiver/locations/NL/A%20B");
    }
}
