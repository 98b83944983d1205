use clap::Parser;
use homepi::cli::{self, Cli, Commands};
use homepi::config::WatchdogConfig;
use homepi::services::StatusServer;
use std::net::SocketAddr;
use tokio::signal;
use tracing::{error, info, warn};

mod main_runtime;

use main_runtime::{announce_startup, build_monitor, init_logging, init_logging_simple, load_config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.clone().unwrap_or(Commands::Run) {
        Commands::Run => {
            let config = load_config(&cli.config)?;
            let _log_guard = init_logging(&config.logging);
            run_watchdog(config).await?;
        }
        Commands::Check { strict } => {
            init_logging_simple();
            let config = load_config(&cli.config)?;
            let (monitor, _) = build_monitor(&config)?;
            let snapshot = monitor.collect().await;
            cli::print_snapshot(&snapshot)?;
            if strict && !snapshot.all_passed() {
                anyhow::bail!("failing probes: {:?}", snapshot.failing());
            }
        }
        Commands::Config => {
            init_logging_simple();
            let config = WatchdogConfig::load_from(&cli.config)?;
            if !cli::print_config(&config)? {
                anyhow::bail!("invalid configuration");
            }
        }
    }

    Ok(())
}

async fn run_watchdog(config: WatchdogConfig) -> anyhow::Result<()> {
    announce_startup(&config);

    let bind: SocketAddr = config.status.bind.parse()?;
    let (mut monitor, publisher) = build_monitor(&config)?;

    // Status is answerable before the first probe runs
    let server = StatusServer::new(publisher, bind).start().await?;

    match monitor.post_reboot_check(&config.reboot_marker_path()).await {
        Ok(true) => info!("Post-reboot check complete"),
        Ok(false) => {}
        Err(e) => warn!(error = %e, "Could not read reboot marker, skipping post-reboot check"),
    }

    let handle = monitor.start();

    shutdown_signal().await;
    info!("Shutdown requested, stopping monitor");

    handle.stop();
    handle.join().await;
    server.shutdown();

    info!("HomePi watchdog stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
