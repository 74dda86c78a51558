use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{BotSpec, Channel, PlatformApi, PlatformError, Post, Team, User};
use crate::config::MattermostConfig;

const USER_AGENT: &str = "mattermost-reactions-webhook";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `PlatformApi` over the Mattermost REST API v4.
pub struct MattermostClient {
    http: reqwest::Client,
    api_base: String,
    token: SecretString,
}

impl MattermostClient {
    pub fn new(config: &MattermostConfig) -> Result<Self> {
        Self::with_timeout(config, REQUEST_TIMEOUT)
    }

    /// Every request, including reading the body, is bounded by `timeout`.
    pub fn with_timeout(config: &MattermostConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to construct HTTP client")?;

        Ok(Self {
            http,
            api_base: api_base(&config.server_url),
            token: config.access_token.clone(),
        })
    }

    async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        not_found: (&'static str, &str),
    ) -> Result<T, PlatformError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut request = self
            .http
            .request(method, format!("{}{}", self.api_base, path))
            .bearer_auth(self.token.expose_secret());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|source| PlatformError::Transport {
                path: path.to_string(),
                source,
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(PlatformError::NotFound {
                kind: not_found.0,
                id: not_found.1.to_string(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| PlatformError::Transport {
                path: path.to_string(),
                source,
            })?;

        if !status.is_success() {
            return Err(PlatformError::Api {
                path: path.to_string(),
                status: status.as_u16(),
                message: error_message(&bytes),
            });
        }

        serde_json::from_slice(&bytes).map_err(|err| PlatformError::Decode {
            path: path.to_string(),
            message: err.to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        kind: &'static str,
        id: &str,
    ) -> Result<T, PlatformError> {
        self.request::<T, Value>(Method::GET, path, None, (kind, id))
            .await
    }
}

#[async_trait]
impl PlatformApi for MattermostClient {
    async fn get_post(&self, post_id: &str) -> Result<Post, PlatformError> {
        self.get(&format!("/posts/{post_id}"), "post", post_id).await
    }

    async fn get_channel(&self, channel_id: &str) -> Result<Channel, PlatformError> {
        self.get(&format!("/channels/{channel_id}"), "channel", channel_id)
            .await
    }

    async fn get_user(&self, user_id: &str) -> Result<User, PlatformError> {
        self.get(&format!("/users/{user_id}"), "user", user_id).await
    }

    async fn get_team(&self, team_id: &str) -> Result<Team, PlatformError> {
        self.get(&format!("/teams/{team_id}"), "team", team_id).await
    }

    async fn get_teams_for_user(&self, user_id: &str) -> Result<Vec<Team>, PlatformError> {
        self.get(&format!("/users/{user_id}/teams"), "user", user_id)
            .await
    }

    async fn get_channels_for_team_for_user(
        &self,
        team_id: &str,
        user_id: &str,
    ) -> Result<Vec<Channel>, PlatformError> {
        self.get(
            &format!("/users/{user_id}/teams/{team_id}/channels"),
            "team",
            team_id,
        )
        .await
    }

    async fn ensure_bot(&self, bot: &BotSpec) -> Result<String, PlatformError> {
        let path = format!("/users/username/{}", bot.username);
        match self.get::<User>(&path, "user", &bot.username).await {
            Ok(user) => {
                debug!("bot account {} already exists id={}", bot.username, user.id);
                return Ok(user.id);
            }
            Err(PlatformError::NotFound { .. }) => {}
            Err(err) => return Err(err),
        }

        let body = json!({
            "username": bot.username,
            "display_name": bot.display_name,
            "description": bot.description,
        });
        let created: Value = self
            .request(Method::POST, "/bots", Some(&body), ("bot", &bot.username))
            .await?;
        let user_id = created
            .get("user_id")
            .and_then(Value::as_str)
            .ok_or_else(|| PlatformError::Decode {
                path: "/bots".to_string(),
                message: "response missing user_id".to_string(),
            })?
            .to_string();

        info!("created bot account {} id={}", bot.username, user_id);
        Ok(user_id)
    }
}

fn api_base(server_url: &str) -> String {
    format!("{}/api/v4", server_url.trim_end_matches('/'))
}

fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
        })
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    fn config(server_url: String) -> MattermostConfig {
        MattermostConfig {
            server_url,
            access_token: SecretString::from("tok"),
            bot_access_token: None,
            websocket_url: None,
        }
    }

    /// Answers one request with a JSON body and hands back the raw request head.
    async fn one_shot_server(body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_ascii_lowercase()
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn teams_are_listed_for_the_bot_user() {
        let (url, server) =
            one_shot_server(r#"[{"id":"T1","name":"acme"},{"id":"T2","name":"private-ops"}]"#).await;
        let client = MattermostClient::new(&config(url)).unwrap();

        let teams = client.get_teams_for_user("BOT").await.unwrap();
        let request = server.await.unwrap();

        assert!(request.starts_with("get /api/v4/users/bot/teams http/1.1"));
        assert!(request.contains("authorization: bearer tok"));
        let ids: Vec<&str> = teams.iter().map(|team| team.id.as_str()).collect();
        assert_eq!(ids, ["T1", "T2"]);
    }

    #[tokio::test]
    async fn unresponsive_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });
        let client =
            MattermostClient::with_timeout(&config(format!("http://{addr}")), Duration::from_millis(200))
                .unwrap();

        let started = std::time::Instant::now();
        let err = client.get_channel("C1").await.unwrap_err();

        assert!(matches!(err, PlatformError::Transport { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn api_base_strips_trailing_slash() {
        assert_eq!(
            api_base("https://chat.example.com/"),
            "https://chat.example.com/api/v4"
        );
        assert_eq!(
            api_base("http://localhost:8065"),
            "http://localhost:8065/api/v4"
        );
    }

    #[test]
    fn error_message_prefers_mattermost_message_field() {
        let body = br#"{"id":"api.context.permissions.app_error","message":"You do not have the appropriate permissions.","status_code":403}"#;
        assert_eq!(
            error_message(body),
            "You do not have the appropriate permissions."
        );
    }

    #[test]
    fn error_message_falls_back_to_raw_body() {
        assert_eq!(error_message(b"bad gateway"), "bad gateway");
    }
}
