//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Google Calendar bridge for chat workspaces.
#[derive(Debug, Parser)]
#[command(name = "calbridge-server", version, about)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "CALBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve {
        /// Override server.bind
        #[arg(long)]
        bind: Option<String>,
    },
    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration with secrets masked
    Dump,
    /// Check the configuration, including secret references
    Validate,
    /// Print the default configuration path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_is_optional() {
        let cli = Cli::try_parse_from(["calbridge-server", "--debug"]).unwrap();
        assert!(cli.debug);
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["calbridge-server", "serve", "--bind", "0.0.0.0:9000"]).unwrap();
        match cli.command {
            Some(Command::Serve { bind }) => assert_eq!(bind.as_deref(), Some("0.0.0.0:9000")),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn config_subcommands() {
        let cli = Cli::try_parse_from(["calbridge-server", "config", "validate"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Config {
                action: ConfigAction::Validate
            })
        ));
    }
}
