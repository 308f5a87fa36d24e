use std::process::ExitCode;

use clap::Parser;
use nist_scrap::cli::{Cli, Command};
use nist_scrap::config::ScrapConfig;
use nist_scrap::process::process_site;
use nist_scrap::supervisor::{ChildCommand, Supervisor};
use nist_scrap::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.command);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{}", err.report());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = ScrapConfig::load(&cli.config)?;
    match cli.command {
        Command::Run => {
            process_site(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Supervise => {
            let child = ChildCommand::current_exe_run(&cli.config)?;
            let mut supervisor = Supervisor::new(child, config.supervisor).await?;
            let verdict = supervisor.run().await?;
            Ok(ExitCode::from(verdict.exit_code()))
        }
    }
}

/// The runner logs to stdout so the supervisor sees everything in one stream.
/// The supervisor's own tracing output goes to stderr, next to its transcript on stdout.
fn init_tracing(command: &Command) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match command {
        Command::Run => builder.with_ansi(false).with_writer(std::io::stdout).init(),
        Command::Supervise => builder.with_writer(std::io::stderr).init(),
    }
}
