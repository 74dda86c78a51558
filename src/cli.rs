use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "mattermost-reactions-webhook")]
#[command(about = "Forwards Mattermost reactions in bot-monitored channels to a webhook", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    #[command(about = "Validate the configuration file")]
    ValidateConfig,

    #[command(about = "Print the effective configuration with secrets redacted")]
    PrintConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_running_the_service() {
        let cli = Cli::try_parse_from(["mattermost-reactions-webhook"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn parses_subcommand_and_config_path() {
        let cli = Cli::try_parse_from([
            "mattermost-reactions-webhook",
            "--config",
            "/etc/reactions.yaml",
            "validate-config",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/reactions.yaml"));
        assert_eq!(cli.command, Some(Commands::ValidateConfig));
    }
}
