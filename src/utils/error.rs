use thiserror::Error;

use crate::config::ConfigError;
use crate::platform::PlatformError;

/// Failures that abort a configuration load. Everything past that point is
/// logged where it happens and never reaches the caller.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("failed to load plugin configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to ensure reactions bot: {0}")]
    BotProvisioning(#[source] PlatformError),
}
