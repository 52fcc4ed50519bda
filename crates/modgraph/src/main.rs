mod cli;
mod commands;

use crate::cli::{Commands, LogFormat, LoggingArgs, ModgraphCli};
use anyhow::Result;
use logging::LogMode;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

fn log_mode(args: &LoggingArgs) -> LogMode {
    match (&args.log_dir, args.log_format) {
        (Some(dir), _) => LogMode::File(dir.clone()),
        (None, LogFormat::Json) => LogMode::Json,
        (None, LogFormat::Human) => LogMode::Cli,
    }
}

fn main() -> Result<()> {
    let cli = ModgraphCli::parse_args();

    let logging_args = match &cli.command {
        Commands::Analyze(args) => &args.logging,
        Commands::CheckConfig(args) => &args.logging,
    };
    let guards = logging::init(log_mode(logging_args), logging_args.verbose)?;

    let cancellation_token = CancellationToken::new();
    let handler_token = cancellation_token.clone();
    ctrlc::set_handler(move || {
        warn!("Interrupt received, cancelling analysis");
        handler_token.cancel();
    })?;

    let result = match cli.command {
        Commands::Analyze(args) => commands::analyze::run(args, cancellation_token),
        Commands::CheckConfig(args) => commands::check_config::run(args),
    };

    if let Err(e) = result {
        error!("{e:#}");
        // Flush file logs before exiting.
        drop(guards);
        process::exit(1);
    }
    Ok(())
}
