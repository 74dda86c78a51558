use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod mattermost;
pub mod websocket;

pub use self::mattermost::MattermostClient;
pub use self::websocket::{EventListener, PlatformEvent};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub create_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: String,
    pub post_id: String,
    pub emoji_name: String,
    #[serde(default)]
    pub create_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMember {
    pub channel_id: String,
    pub user_id: String,
}

/// Bot account the service runs as. Provisioned on every configuration load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotSpec {
    pub username: String,
    pub display_name: String,
    pub description: String,
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Mattermost API {path} failed status={status}: {message}")]
    Api {
        path: String,
        status: u16,
        message: String,
    },

    #[error("request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to decode response from {path}: {message}")]
    Decode { path: String, message: String },
}

/// Lookups the service needs from the chat platform.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn get_post(&self, post_id: &str) -> Result<Post, PlatformError>;
    async fn get_channel(&self, channel_id: &str) -> Result<Channel, PlatformError>;
    async fn get_user(&self, user_id: &str) -> Result<User, PlatformError>;
    async fn get_team(&self, team_id: &str) -> Result<Team, PlatformError>;
    /// Every team `user_id` belongs to, including private ones.
    async fn get_teams_for_user(&self, user_id: &str) -> Result<Vec<Team>, PlatformError>;
    async fn get_channels_for_team_for_user(
        &self,
        team_id: &str,
        user_id: &str,
    ) -> Result<Vec<Channel>, PlatformError>;
    /// Returns the user id of the bot account, creating it if needed.
    async fn ensure_bot(&self, bot: &BotSpec) -> Result<String, PlatformError>;
}
