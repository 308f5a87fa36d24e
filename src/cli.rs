use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_PATH;

/// Downloads NIST WebBook structures and spectra, optionally under a supervisor that
/// restarts the scraper when it fails.
#[derive(Debug, Parser)]
#[command(name = "scrap", version, about)]
pub struct Cli {
    /// Path to the TOML config file. Defaults apply if it doesn't exist.
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Work through the manifest once, resuming from the checkpoint files.
    Run,
    /// Keep running the scraper in a child process until it finishes cleanly.
    Supervise,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn config_defaults_to_scrap_toml() {
        let cli = Cli::parse_from(["scrap", "run"]);
        assert_eq!(cli.config, PathBuf::from("scrap.toml"));
        assert!(matches!(cli.command, Command::Run));
    }

    #[test]
    fn config_is_accepted_before_the_subcommand() {
        let cli = Cli::parse_from(["scrap", "--config", "/etc/nist.toml", "supervise"]);
        assert_eq!(cli.config, PathBuf::from("/etc/nist.toml"));
        assert!(matches!(cli.command, Command::Supervise));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
