use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "revolt-bridge-discord", version, about = "Revolt <-> Discord message bridge")]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// Path to a JSON mappings file, overriding `mappings_file`
    #[arg(short, long, env = "MAPPINGS_PATH")]
    pub mappings: Option<PathBuf>,

    /// Load and validate the configuration, then exit
    #[arg(long)]
    pub check_config: bool,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn flags_parse() {
        let cli = Cli::try_parse_from([
            "revolt-bridge-discord",
            "--config",
            "bridge.yaml",
            "-m",
            "channels.json",
            "--check-config",
        ])
        .expect("valid arguments");
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("bridge.yaml")));
        assert_eq!(cli.mappings.as_deref(), Some(std::path::Path::new("channels.json")));
        assert!(cli.check_config);
    }
}
