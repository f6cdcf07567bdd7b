pub mod command_parser;
pub mod common;
pub mod discord_parser;
pub mod revolt_parser;

pub use command_parser::parse_prefixed_command;
pub use common::MessageUtils;
pub use discord_parser::DiscordToRevoltConverter;
pub use revolt_parser::RevoltToDiscordConverter;
