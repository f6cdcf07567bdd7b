use serenity::all::{
    CommandDataOption, CommandDataOptionValue, CommandOptionType, CreateCommand,
    CreateCommandOption, Member, Permissions,
};

use crate::platform::{CommandArg, CommandArgs, CommandOptionKind, CommandSpec};

pub fn build_commands(specs: &[CommandSpec]) -> Vec<CreateCommand> {
    specs
        .iter()
        .map(|spec| {
            let mut command = CreateCommand::new(spec.name).description(spec.description);
            for option in &spec.options {
                let kind = match option.kind {
                    CommandOptionKind::String => CommandOptionType::String,
                };
                command = command.add_option(
                    CreateCommandOption::new(kind, option.name, option.description)
                        .required(option.required),
                );
            }
            if spec.privileged {
                command = command.default_member_permissions(Permissions::MANAGE_CHANNELS);
            }
            command
        })
        .collect()
}

pub fn option_arg(value: &CommandDataOptionValue) -> Option<CommandArg> {
    match value {
        CommandDataOptionValue::String(text) => Some(CommandArg::String(text.clone())),
        CommandDataOptionValue::Integer(number) => Some(CommandArg::Integer(*number)),
        CommandDataOptionValue::Boolean(flag) => Some(CommandArg::Boolean(*flag)),
        CommandDataOptionValue::Channel(channel) => Some(CommandArg::Channel(channel.to_string())),
        _ => None,
    }
}

pub fn invocation_args(options: &[CommandDataOption]) -> CommandArgs {
    CommandArgs::from_options(
        options
            .iter()
            .filter_map(|option| option_arg(&option.value).map(|arg| (option.name.clone(), arg)))
            .collect(),
    )
}

/// Members holding Manage Channels may change the bridge configuration.
pub fn is_privileged(member: Option<&Member>) -> bool {
    member
        .and_then(|member| member.permissions)
        .is_some_and(|permissions| {
            permissions.contains(Permissions::MANAGE_CHANNELS)
                || permissions.contains(Permissions::ADMINISTRATOR)
        })
}

#[cfg(test)]
mod tests {
    use serenity::all::{ChannelId, CommandDataOptionValue};

    use super::{build_commands, option_arg};
    use crate::bridge::commands::CommandRegistry;
    use crate::platform::CommandArg;

    #[test]
    fn slash_definitions_carry_options_and_permissions() {
        let commands = build_commands(&CommandRegistry::slash().specs());
        let json = serde_json::to_value(&commands).expect("serializable");
        let connect = json
            .as_array()
            .and_then(|all| all.iter().find(|command| command["name"] == "connect"))
            .expect("connect defined");

        assert_eq!(connect["options"][0]["name"], "channel");
        assert_eq!(connect["options"][0]["required"], true);
        assert!(!connect["default_member_permissions"].is_null());

        let ping = json
            .as_array()
            .and_then(|all| all.iter().find(|command| command["name"] == "ping"))
            .expect("ping defined");
        assert!(ping["default_member_permissions"].is_null());
    }

    #[test]
    fn option_values_become_command_args() {
        assert_eq!(
            option_arg(&CommandDataOptionValue::String("01HCHANNEL".to_string())),
            Some(CommandArg::String("01HCHANNEL".to_string()))
        );
        assert_eq!(
            option_arg(&CommandDataOptionValue::Channel(ChannelId::new(42))),
            Some(CommandArg::Channel("42".to_string()))
        );
        assert_eq!(
            option_arg(&CommandDataOptionValue::Boolean(true)),
            Some(CommandArg::Boolean(true))
        );
    }
}
