use std::path::Path;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use url::Url;

use super::ConfigError;
use crate::platform::BotSpec;
use crate::store::is_valid_webhook_url;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub mattermost: MattermostConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub plugin: PluginSettings,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MattermostConfig {
    pub server_url: String,
    /// Token used for REST calls, including bot provisioning. Needs
    /// permission to manage bots.
    #[serde(default = "empty_secret", serialize_with = "serialize_redacted")]
    pub access_token: SecretString,
    /// Token of the bot account itself. Mattermost only delivers reaction and
    /// membership events for channels the websocket's user belongs to.
    #[serde(default, serialize_with = "serialize_redacted_opt")]
    pub bot_access_token: Option<SecretString>,
    #[serde(default)]
    pub websocket_url: Option<String>,
}

impl MattermostConfig {
    /// Token the event listener authenticates with: the bot's own token when
    /// configured, the REST token otherwise.
    pub fn event_token(&self) -> &SecretString {
        self.bot_access_token.as_ref().unwrap_or(&self.access_token)
    }

    pub fn websocket_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = self
            .websocket_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            return Ok(url.to_string());
        }
        derive_websocket_url(&self.server_url)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BotConfig {
    #[serde(default = "default_bot_username")]
    pub username: String,
    #[serde(default = "default_bot_display_name")]
    pub display_name: String,
    #[serde(default = "default_bot_description")]
    pub description: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            username: default_bot_username(),
            display_name: default_bot_display_name(),
            description: default_bot_description(),
        }
    }
}

impl BotConfig {
    pub fn spec(&self) -> BotSpec {
        BotSpec {
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            description: self.description.clone(),
        }
    }
}

/// Externally editable plugin settings. Everything else in the runtime
/// configuration is computed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PluginSettings {
    #[serde(default, alias = "WebhookURL")]
    pub webhook_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Reads `path` and applies `REACTIONS_*` environment overrides.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_yaml_with_overrides(&content, |key| std::env::var(key).ok())
    }

    /// Parses `content` as-is, without consulting the environment.
    #[cfg(test)]
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Self::from_yaml_with_overrides(content, |_| None)
    }

    fn from_yaml_with_overrides<F>(content: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: Config = serde_yaml::from_str(content)?;
        config.apply_overrides(lookup);
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let server_url = Url::parse(&self.mattermost.server_url).map_err(|err| {
            ConfigError::InvalidConfig(format!("mattermost.server_url is not a valid URL: {err}"))
        })?;
        if !matches!(server_url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidConfig(
                "mattermost.server_url must use http or https".to_string(),
            ));
        }

        if self.mattermost.access_token.expose_secret().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mattermost.access_token cannot be empty".to_string(),
            ));
        }

        if self.bot.username.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "bot.username cannot be empty".to_string(),
            ));
        }

        if self.web.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "web.port must be between 1 and 65535".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::InvalidConfig(format!(
                "logging.format must be pretty or json, got {}",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Settings that do not stop the service but will make it do nothing.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.mattermost.bot_access_token.is_none() {
            warnings.push(
                "mattermost.bot_access_token is not set; events are only received for channels the access_token owner has joined"
                    .to_string(),
            );
        }
        if self.plugin.webhook_url.is_empty() {
            warnings.push("plugin.webhook_url is not set; reactions will not be forwarded".to_string());
        } else if !is_valid_webhook_url(&self.plugin.webhook_url) {
            warnings.push(format!(
                "plugin.webhook_url {} does not start with http:// or https://; reactions will not be forwarded",
                self.plugin.webhook_url
            ));
        }
        warnings
    }

    fn normalize(&mut self) {
        self.mattermost.access_token =
            SecretString::from(self.mattermost.access_token.expose_secret().trim());
        self.mattermost.bot_access_token = self
            .mattermost
            .bot_access_token
            .as_ref()
            .map(|token| token.expose_secret().trim())
            .filter(|token| !token.is_empty())
            .map(SecretString::from);
        self.plugin.webhook_url = self.plugin.webhook_url.trim().to_string();
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("REACTIONS_MATTERMOST_URL") {
            self.mattermost.server_url = value;
        }
        if let Some(value) = lookup("REACTIONS_ACCESS_TOKEN") {
            self.mattermost.access_token = SecretString::from(value);
        }
        if let Some(value) = lookup("REACTIONS_BOT_ACCESS_TOKEN") {
            self.mattermost.bot_access_token = Some(SecretString::from(value));
        }
        if let Some(value) = lookup("REACTIONS_WEBHOOK_URL") {
            self.plugin.webhook_url = value;
        }
    }

    /// YAML rendering with tokens masked.
    pub fn redacted_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

fn empty_secret() -> SecretString {
    SecretString::from("")
}

fn serialize_redacted<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    if secret.expose_secret().is_empty() {
        serializer.serialize_str("")
    } else {
        serializer.serialize_str("<redacted>")
    }
}

fn serialize_redacted_opt<S: Serializer>(
    secret: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(secret) => serialize_redacted(secret, serializer),
        None => serializer.serialize_none(),
    }
}

fn derive_websocket_url(server_url: &str) -> Result<String, ConfigError> {
    let mut url = Url::parse(server_url).map_err(|err| {
        ConfigError::InvalidConfig(format!("mattermost.server_url is not a valid URL: {err}"))
    })?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(ConfigError::InvalidConfig(format!(
                "cannot derive websocket URL from scheme {other}"
            )));
        }
    };
    url.set_scheme(scheme).map_err(|_| {
        ConfigError::InvalidConfig(format!("cannot switch {server_url} to {scheme}"))
    })?;
    let path = format!("{}/api/v4/websocket", url.path().trim_end_matches('/'));
    url.set_path(&path);
    Ok(url.to_string())
}

fn default_bot_username() -> String {
    "reactions-bot".to_string()
}

fn default_bot_display_name() -> String {
    "Reactions Plugin Bot".to_string()
}

fn default_bot_description() -> String {
    "Bot account created by the reactions plugin to monitor channels.".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9010
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
