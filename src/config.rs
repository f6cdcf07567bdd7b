pub use self::mappings_file::{
    MappingEntry, declarative_mappings_or_empty, load_declarative_mappings,
};
pub use self::parser::{
    Config, DatabaseConfig, DbType, DiscordConfig, LoggingConfig, RevoltConfig, WebConfig,
};
pub use self::validator::ConfigError;

mod mappings_file;
mod parser;
mod validator;
