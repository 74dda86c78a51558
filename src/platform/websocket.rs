use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use futures::{Sink, SinkExt, Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, info, warn};

use super::{Channel, ChannelMember, Reaction};
use crate::plugin::ReactionsPlugin;

const INITIAL_RETRY_SECONDS: u64 = 2;
const MAX_RETRY_SECONDS: u64 = 300;

/// Platform events the service reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    ReactionAdded(Reaction),
    ReactionRemoved(Reaction),
    ChannelCreated(Channel),
    UserJoinedChannel(ChannelMember),
    UserLeftChannel(ChannelMember),
}

/// Feeds Mattermost websocket events into the plugin hooks.
pub struct EventListener {
    websocket_url: String,
    token: SecretString,
    plugin: Arc<ReactionsPlugin>,
}

impl EventListener {
    pub fn new(websocket_url: String, token: SecretString, plugin: Arc<ReactionsPlugin>) -> Self {
        Self {
            websocket_url,
            token,
            plugin,
        }
    }

    /// Runs until the task is aborted, reconnecting with exponential backoff.
    pub async fn run(self) {
        let mut retry_seconds = INITIAL_RETRY_SECONDS;
        loop {
            match connect_async(self.websocket_url.as_str()).await {
                Ok((mut stream, _)) => {
                    info!("mattermost websocket connected url={}", self.websocket_url);
                    let challenge = json!({
                        "seq": 1,
                        "action": "authentication_challenge",
                        "data": { "token": self.token.expose_secret() },
                    });
                    if let Err(err) = stream
                        .send(WsMessage::Text(challenge.to_string().into()))
                        .await
                    {
                        warn!("failed to authenticate mattermost websocket: {}", err);
                    } else {
                        retry_seconds = INITIAL_RETRY_SECONDS;
                        self.pump(&mut stream).await;
                        info!("mattermost websocket disconnected");
                    }
                }
                Err(err) => warn!("failed to connect mattermost websocket: {}", err),
            }

            tokio::time::sleep(Duration::from_secs(retry_seconds)).await;
            retry_seconds = (retry_seconds * 2).min(MAX_RETRY_SECONDS);
        }
    }

    /// Reads frames until the connection closes or can no longer be written.
    async fn pump<S>(&self, stream: &mut S)
    where
        S: Stream<Item = Result<WsMessage, WsError>> + Sink<WsMessage, Error = WsError> + Unpin,
    {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => {
                    if let Err(err) = self.handle_text(&text) {
                        warn!("websocket payload handling failed: {}", err);
                    }
                }
                Ok(WsMessage::Ping(payload)) => {
                    if let Err(err) = stream.send(WsMessage::Pong(payload)).await {
                        warn!("failed to answer websocket ping: {}", err);
                        break;
                    }
                }
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!("websocket frame error: {}", err);
                    break;
                }
            }
        }
    }

    fn handle_text(&self, text: &str) -> Result<()> {
        let payload: Value = serde_json::from_str(text).context("invalid websocket payload JSON")?;

        if let Some(status) = payload.get("status").and_then(Value::as_str) {
            if status != "OK" {
                return Err(anyhow!("websocket reply status={} payload={}", status, payload));
            }
            return Ok(());
        }

        if let Some(event) = parse_event(&payload)? {
            self.plugin.handle_event(event);
        }
        Ok(())
    }
}

/// Translates a raw websocket event into a [`PlatformEvent`]. Events the
/// service has no hook for map to `None`.
pub fn parse_event(payload: &Value) -> Result<Option<PlatformEvent>> {
    let Some(event) = payload.get("event").and_then(Value::as_str) else {
        return Ok(None);
    };
    let data = payload.get("data").unwrap_or(&Value::Null);
    let broadcast = payload.get("broadcast").unwrap_or(&Value::Null);

    let parsed = match event {
        "reaction_added" => Some(PlatformEvent::ReactionAdded(parse_reaction(data)?)),
        "reaction_removed" => Some(PlatformEvent::ReactionRemoved(parse_reaction(data)?)),
        "channel_created" => {
            let channel_id = required(data, "channel_id", event)?;
            Some(PlatformEvent::ChannelCreated(Channel {
                id: channel_id,
                team_id: field(data, "team_id").unwrap_or_default(),
                name: String::new(),
                display_name: String::new(),
            }))
        }
        "user_added" => Some(PlatformEvent::UserJoinedChannel(ChannelMember {
            channel_id: field(broadcast, "channel_id")
                .or_else(|| field(data, "channel_id"))
                .ok_or_else(|| anyhow!("user_added missing channel_id"))?,
            user_id: required(data, "user_id", event)?,
        })),
        "user_removed" => Some(PlatformEvent::UserLeftChannel(ChannelMember {
            channel_id: field(data, "channel_id")
                .or_else(|| field(broadcast, "channel_id"))
                .ok_or_else(|| anyhow!("user_removed missing channel_id"))?,
            user_id: field(data, "user_id")
                .or_else(|| field(broadcast, "user_id"))
                .ok_or_else(|| anyhow!("user_removed missing user_id"))?,
        })),
        other => {
            debug!("ignoring websocket event type {}", other);
            None
        }
    };
    Ok(parsed)
}

// Mattermost double-encodes the reaction as a JSON string inside `data`.
fn parse_reaction(data: &Value) -> Result<Reaction> {
    let raw = data
        .get("reaction")
        .ok_or_else(|| anyhow!("reaction event missing reaction payload"))?;
    let reaction = match raw {
        Value::String(encoded) => serde_json::from_str(encoded),
        other => serde_json::from_value(other.clone()),
    }
    .context("invalid reaction payload")?;
    Ok(reaction)
}

fn field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

fn required(value: &Value, key: &str, event: &str) -> Result<String> {
    field(value, key).ok_or_else(|| anyhow!("{} missing {}", event, key))
}
