use clap::{Parser, Subcommand};

/// CLI surface definition. Operates on the local processed-mail ledger;
/// fetching and classifying mail belongs to the embedding pipeline.
#[derive(Parser, Debug)]
#[command(
    name = "mailsift",
    about = "Secure processed-mail ledger for the mailsift triage assistant",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show how many processed-mail records the store holds.
    Status,
    /// Check whether a message id has already been processed.
    Check {
        /// Backend message id to look up.
        message_id: String,
    },
    /// Retire the active encryption key and re-encrypt the store.
    RotateKey,
    /// Run a health check against the encrypted store (full decrypting read).
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version and exit.
    Version,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_subcommand() {
        let cli = Cli::try_parse_from(["mailsift", "status"]).expect("parse should succeed");
        assert_eq!(cli.command, Command::Status);
    }

    #[test]
    fn parses_check_with_message_id() {
        let cli = Cli::try_parse_from(["mailsift", "check", "msg-42"]).expect("parse");
        assert_eq!(
            cli.command,
            Command::Check {
                message_id: "msg-42".into()
            }
        );
    }

    #[test]
    fn parses_rotate_key_subcommand() {
        let cli = Cli::try_parse_from(["mailsift", "rotate-key"]).expect("parse");
        assert_eq!(cli.command, Command::RotateKey);
    }

    #[test]
    fn parses_config_init_subcommand() {
        let cli = Cli::try_parse_from(["mailsift", "config", "init"]).expect("parse");
        assert_eq!(cli.command, Command::Config(ConfigCommand::Init));
    }

    #[test]
    fn rejects_missing_subcommand() {
        assert!(Cli::try_parse_from(["mailsift"]).is_err());
    }
}
