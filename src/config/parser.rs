use super::{ConfigError, MappingEntry};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub revolt: RevoltConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Inline declarative mappings; merged with `mappings_file` when both are present.
    #[serde(default)]
    pub mappings: Vec<MappingEntry>,
    #[serde(default = "default_mappings_file")]
    pub mappings_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discord: DiscordConfig::default(),
            revolt: RevoltConfig::default(),
            bridge: BridgeConfig::default(),
            database: DatabaseConfig::default(),
            web: WebConfig::default(),
            logging: LoggingConfig::default(),
            mappings: Vec::new(),
            mappings_file: default_mappings_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_webhook_name")]
    pub webhook_name: String,
    #[serde(default = "default_register_slash_commands")]
    pub register_slash_commands: bool,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            webhook_name: default_webhook_name(),
            register_slash_commands: default_register_slash_commands(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RevoltConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(alias = "api", default = "default_revolt_api_url")]
    pub api_url: String,
    /// Gateway url; discovered from the API root when unset.
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
}

impl Default for RevoltConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_url: default_revolt_api_url(),
            ws_url: None,
            command_prefix: default_command_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default = "default_message_cache_capacity")]
    pub message_cache_capacity: usize,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_login_attempts")]
    pub login_attempts: u32,
    #[serde(default = "default_login_retry_seconds")]
    pub login_retry_seconds: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            message_cache_capacity: default_message_cache_capacity(),
            send_timeout_ms: default_send_timeout_ms(),
            login_attempts: default_login_attempts(),
            login_retry_seconds: default_login_retry_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_database_filename")]
    pub filename: Option<String>,
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default)]
    pub min_connections: Option<u32>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            filename: default_database_filename(),
            max_connections: None,
            min_connections: None,
        }
    }
}

impl DatabaseConfig {
    pub fn db_type(&self) -> DbType {
        let url = self.connection_string();
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            DbType::Postgres
        } else {
            DbType::Sqlite
        }
    }

    pub fn connection_string(&self) -> String {
        if let Some(ref url) = self.url {
            url.clone()
        } else if let Some(ref file) = self.filename {
            format!("sqlite://{}", file)
        } else {
            String::new()
        }
    }

    pub fn sqlite_path(&self) -> Option<String> {
        if let DbType::Sqlite = self.db_type() {
            let url = self.connection_string();
            let path = url.strip_prefix("sqlite://").unwrap_or(&url).to_string();
            (!path.is_empty()).then_some(path)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    Postgres,
    Sqlite,
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
    #[serde(alias = "console", default = "default_log_level")]
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
    /// Loads `path` when given; otherwise `config.yaml` if present, else defaults plus environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from_file(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::load_from_file(DEFAULT_CONFIG_PATH)
            }
            None => {
                info!("no configuration file found, using environment only");
                let mut config = Config::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("DISCORD_TOKEN") {
            self.discord.bot_token = value;
        }
        if let Some(value) = lookup("REVOLT_TOKEN") {
            self.revolt.bot_token = value;
        }
        if let Some(value) = lookup("API_URL") {
            self.revolt.api_url = value;
        }
        if let Some(value) = lookup("PORT").and_then(|value| value.parse().ok()) {
            self.web.port = value;
        }
        if let Some(value) = lookup("DATABASE_URL") {
            self.database.url = Some(value);
        }
    }
}

fn default_webhook_name() -> String {
    "revolt-bridge".to_string()
}

fn default_register_slash_commands() -> bool {
    true
}

fn default_revolt_api_url() -> String {
    "https://api.revolt.chat".to_string()
}

fn default_command_prefix() -> String {
    "rc!".to_string()
}

fn default_message_cache_capacity() -> usize {
    1000
}

fn default_send_timeout_ms() -> u64 {
    10_000
}

fn default_login_attempts() -> u32 {
    5
}

fn default_login_retry_seconds() -> u64 {
    2
}

fn default_database_filename() -> Option<String> {
    Some("revolt-bridge.sqlite".to_string())
}

fn default_mappings_file() -> Option<String> {
    Some("mappings.json".to_string())
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    10000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{Config, DbType};
    use crate::config::ConfigError;

    const MINIMAL: &str = r#"
discord:
  bot_token: discord-token
revolt:
  bot_token: revolt-token
"#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config = Config::parse(MINIMAL).expect("parse");
        config.validate().expect("valid");

        assert_eq!(config.revolt.api_url, "https://api.revolt.chat");
        assert_eq!(config.revolt.command_prefix, "rc!");
        assert_eq!(config.bridge.message_cache_capacity, 1000);
        assert_eq!(config.web.port, 10000);
        assert_eq!(config.database.db_type(), DbType::Sqlite);
        assert_eq!(
            config.database.sqlite_path().as_deref(),
            Some("revolt-bridge.sqlite")
        );
        assert!(config.discord.register_slash_commands);
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = Config::parse(MINIMAL).expect("parse");
        let env: HashMap<&str, &str> = HashMap::from([
            ("DISCORD_TOKEN", "from-env"),
            ("API_URL", "https://revolt.example.org/api"),
            ("PORT", "8080"),
            ("DATABASE_URL", "postgres://bridge@localhost/bridge"),
        ]);
        config.apply_overrides_from(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.discord.bot_token, "from-env");
        assert_eq!(config.revolt.bot_token, "revolt-token");
        assert_eq!(config.revolt.api_url, "https://revolt.example.org/api");
        assert_eq!(config.web.port, 8080);
        assert_eq!(config.database.db_type(), DbType::Postgres);
    }

    #[test]
    fn unparsable_port_override_is_ignored() {
        let mut config = Config::parse(MINIMAL).expect("parse");
        config.apply_overrides_from(|key| (key == "PORT").then(|| "not-a-port".to_string()));
        assert_eq!(config.web.port, 10000);
    }

    #[test]
    fn missing_tokens_fail_validation() {
        let config = Config::default();
        let err = config.validate().expect_err("tokens are required");
        assert!(matches!(err, ConfigError::InvalidConfig(msg) if msg.contains("discord.bot_token")));
    }

    #[test]
    fn invalid_api_url_fails_validation() {
        let mut config = Config::parse(MINIMAL).expect("parse");
        config.revolt.api_url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(msg)) if msg.contains("revolt.api_url")
        ));
    }

    #[test]
    fn zero_cache_capacity_fails_validation() {
        let mut config = Config::parse(MINIMAL).expect("parse");
        config.bridge.message_cache_capacity = 0;
        assert!(config.validate().is_err());
    }
}
