use thiserror::Error;
use url::Url;

use super::Config;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse yaml configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to parse json mappings: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("no channel mappings configured")]
    NoMappings,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discord.bot_token.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "discord.bot_token cannot be empty (set DISCORD_TOKEN)".to_string(),
            ));
        }

        if self.revolt.bot_token.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "revolt.bot_token cannot be empty (set REVOLT_TOKEN)".to_string(),
            ));
        }

        Url::parse(&self.revolt.api_url).map_err(|e| {
            ConfigError::InvalidConfig(format!("revolt.api_url is not a valid url: {e}"))
        })?;

        if let Some(ws_url) = &self.revolt.ws_url {
            Url::parse(ws_url).map_err(|e| {
                ConfigError::InvalidConfig(format!("revolt.ws_url is not a valid url: {e}"))
            })?;
        }

        if self.revolt.command_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "revolt.command_prefix cannot be empty".to_string(),
            ));
        }

        if self.discord.webhook_name.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "discord.webhook_name cannot be empty".to_string(),
            ));
        }

        if self.bridge.message_cache_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "bridge.message_cache_capacity must be at least 1".to_string(),
            ));
        }

        if self.bridge.send_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "bridge.send_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.bridge.login_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "bridge.login_attempts must be at least 1".to_string(),
            ));
        }

        if self.database.connection_string().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "database connection string cannot be empty".to_string(),
            ));
        }

        if self.web.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "web.port must be between 1 and 65535".to_string(),
            ));
        }

        Ok(())
    }
}
