//! # Webhook Notifier
//!
//! Tells the local backend what changed. Every successful merge and every
//! command event produces one [`HubEvent`].
//!
//! ## Delivery
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ingest / handshake / command service                                   │
//! │       │  notifier.notify(&HubEvent::EntitiesChanged { .. })             │
//! │       ▼                                                                 │
//! │  WebhookNotifier ── POST {"type": "entities_changed", ...} ──► url 1   │
//! │                  └─ POST ...                                 ──► url 2   │
//! │                                                                         │
//! │  Every URL is attempted. The first failure is returned to the caller;  │
//! │  the merge that triggered the event stays committed.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use ampere_core::{Command, CommandKind, ModuleId, Party};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Events
// =============================================================================

/// Something the local backend should know about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    /// Objects of a module were created or updated.
    EntitiesChanged { module: ModuleId, entities: Vec<Value> },

    /// Parties were created or merged (handshake, client info).
    PartiesChanged { parties: Vec<Party> },

    /// An outbound command reached a terminal status.
    CommandResponse { command: Command },

    /// A remote asked the local platform to execute a command.
    CommandRequested { kind: CommandKind, command: Command },
}

impl HubEvent {
    pub fn entity_changed<T: Serialize>(module: ModuleId, entity: &T) -> SyncResult<Self> {
        Ok(HubEvent::EntitiesChanged {
            module,
            entities: vec![serde_json::to_value(entity)?],
        })
    }

    pub fn command_requested(command: &Command) -> Self {
        HubEvent::CommandRequested {
            kind: command.kind(),
            command: command.clone(),
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            HubEvent::EntitiesChanged { .. } => "entities_changed",
            HubEvent::PartiesChanged { .. } => "parties_changed",
            HubEvent::CommandResponse { .. } => "command_response",
            HubEvent::CommandRequested { .. } => "command_requested",
        }
    }
}

// =============================================================================
// Notifier Trait
// =============================================================================

/// Receiver of hub events.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &HubEvent) -> SyncResult<()>;
}

/// Notifier that drops every event. Used when no webhook is configured.
pub struct NoOpNotifier;

#[async_trait]
impl Notifier for NoOpNotifier {
    async fn notify(&self, _event: &HubEvent) -> SyncResult<()> {
        Ok(())
    }
}

// =============================================================================
// Webhook Notifier
// =============================================================================

/// Posts events as JSON to every configured webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    urls: Vec<String>,
}

impl WebhookNotifier {
    pub fn new(urls: Vec<String>, timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(WebhookNotifier { client, urls })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &HubEvent) -> SyncResult<()> {
        let mut first_error = None;

        for url in &self.urls {
            let result = self
                .client
                .post(url)
                .json(event)
                .send()
                .await
                .and_then(|response| response.error_for_status());

            match result {
                Ok(_) => debug!(url = %url, event = event.label(), "Webhook delivered"),
                Err(e) => {
                    warn!(url = %url, event = event.label(), error = %e, "Webhook delivery failed");
                    first_error.get_or_insert(SyncError::from(e));
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_webhook_posts_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "type": "entities_changed", "module": "locations" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(vec![server.uri()], Duration::from_secs(5)).unwrap();
        let event = HubEvent::entity_changed(ModuleId::Locations, &json!({ "id": "LOC1" })).unwrap();
        notifier.notify(&event).await.unwrap();
    }

    #[tokio::test]
    async fn test_webhook_failure_is_reported_after_all_urls() {
        let failing = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&failing)
            .await;
        let healthy = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&healthy)
            .await;

        let notifier =
            WebhookNotifier::new(vec![failing.uri(), healthy.uri()], Duration::from_secs(5)).unwrap();
        let event = HubEvent::PartiesChanged { parties: vec![] };
        assert!(notifier.notify(&event).await.is_err());
    }
}
