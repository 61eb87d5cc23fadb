//! CLI entry point.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use webgrab::app::{self, App};
use webgrab::cli::Cli;
use webgrab::error::ExitStatus;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli) {
        Ok(status) => ExitCode::from(status.code()),
        Err(error) => {
            eprintln!("webgrab: {error}");
            ExitCode::from(ExitStatus::Init.code())
        }
    }
}

fn run(cli: Cli) -> Result<ExitStatus> {
    let (cfg, seeds) = cli
        .into_config()
        .map_err(|message| anyhow::anyhow!(message))?;

    let app = App::new(cfg, seeds);
    app::install_signal_handler(&app.terminate_flag());
    Ok(app.run())
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("webgrab={}", cli.log_filter())));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
