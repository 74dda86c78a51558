pub use self::parser::{
    Config, LoggingConfig, MattermostConfig, PluginSettings, WebConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
