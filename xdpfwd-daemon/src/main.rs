use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use xdpfwd_daemon::cli::DaemonCli;
use xdpfwd_daemon::logging;
use xdpfwd_daemon::orchestrator::{self, Orchestrator};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = DaemonCli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // 로거 초기화 전에 실패할 수 있으므로 stderr에 직접 출력
            eprintln!("xdpfwd: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: DaemonCli) -> Result<()> {
    let config = orchestrator::load_config(&cli.config, &cli.overrides())?;

    if cli.list {
        let orchestrator = Orchestrator::build_from_config(config, &cli.config)?;
        print!("{}", orchestrator.render_listing()?);
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "xdpfwd starting");

    let orchestrator = Orchestrator::build_from_config(config, &cli.config)?;
    let summary = orchestrator.run().await?;

    tracing::info!(reason = %summary.stop_reason, "xdpfwd shut down");
    Ok(())
}
