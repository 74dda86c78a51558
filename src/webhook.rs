use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
pub const WEBHOOK_USER_AGENT: &str = "Mattermost-Reactions-Plugin/1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionAction {
    ReactionAdded,
    ReactionRemoved,
}

impl ReactionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReactionAdded => "reaction_added",
            Self::ReactionRemoved => "reaction_removed",
        }
    }
}

/// Body of the outbound notification. Field names are part of the receiver
/// contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionWebhookPayload {
    pub action: ReactionAction,
    pub user_id: String,
    pub username: String,
    pub post_id: String,
    pub channel_id: String,
    pub channel_name: String,
    pub team_id: String,
    pub team_name: String,
    pub emoji_name: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered(u16),
    Rejected(u16),
    Failed,
}

/// Delivers one notification. Implementations log their own failures; there
/// is nobody left to report them to.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, endpoint: &str, payload: &ReactionWebhookPayload);
}

#[derive(Clone)]
pub struct HttpWebhookSender {
    http: reqwest::Client,
}

impl HttpWebhookSender {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(WEBHOOK_USER_AGENT)
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .context("failed to construct webhook HTTP client")?;
        Ok(Self { http })
    }

    pub async fn deliver(&self, endpoint: &str, payload: &ReactionWebhookPayload) -> DeliveryOutcome {
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(err) => {
                error!("error marshaling webhook payload: {}", err);
                return DeliveryOutcome::Failed;
            }
        };

        debug!(
            url = endpoint,
            payload = %String::from_utf8_lossy(&body),
            "sending webhook"
        );

        let response = match self
            .http
            .post(endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                error!(url = endpoint, error = %err, "error sending webhook");
                return DeliveryOutcome::Failed;
            }
        };

        let status = response.status();
        if status.is_success() {
            debug!(
                url = endpoint,
                status = status.as_u16(),
                action = payload.action.as_str(),
                emoji = %payload.emoji_name,
                "webhook delivered"
            );
            DeliveryOutcome::Delivered(status.as_u16())
        } else {
            warn!(
                url = endpoint,
                status = status.as_u16(),
                action = payload.action.as_str(),
                emoji = %payload.emoji_name,
                "webhook rejected"
            );
            DeliveryOutcome::Rejected(status.as_u16())
        }
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, endpoint: &str, payload: &ReactionWebhookPayload) {
        self.deliver(endpoint, payload).await;
    }
}
