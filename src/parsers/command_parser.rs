/// A prefixed text command split into its name and whitespace-separated arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub name: String,
    pub args: Vec<String>,
}

/// Parses `rc!name arg1 arg2`. The name must directly follow the prefix.
pub fn parse_prefixed_command(prefix: &str, content: &str) -> Option<ParsedCommand> {
    let mut tokens = content.split_whitespace();
    let name = tokens.next()?.strip_prefix(prefix)?;
    if name.is_empty() {
        return None;
    }

    Some(ParsedCommand {
        name: name.to_lowercase(),
        args: tokens.map(str::to_string).collect(),
    })
}
