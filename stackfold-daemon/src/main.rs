use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use stackfold_core::config::StackfoldConfig;
use stackfold_daemon::cli::DaemonCli;
use stackfold_daemon::logging;
use stackfold_daemon::orchestrator::Orchestrator;

/// Grace period for runtime shutdown. A pending blocking stdin read
/// cannot be cancelled and would otherwise keep the process alive.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

fn main() -> ExitCode {
    let cli = DaemonCli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(cli));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("stackfold-daemon: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: DaemonCli) -> Result<()> {
    let mut config = StackfoldConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {}", cli.config.display(), e))?;
    cli.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if cli.validate {
        println!("configuration {} is valid", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "stackfold-daemon starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config)?;
    orchestrator.run().await
}
