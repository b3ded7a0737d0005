mod args;

use anyhow::Context;
use args::Cli;
use clap::Parser;
use scanfleet::supervisor::{build_server, SystemProcesses};
use scanfleet::FleetConfig;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = FleetConfig::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(binary) = cli.worker_bin {
        config.worker.binary = binary;
    }

    let server = build_server(&config, Arc::new(SystemProcesses::new()))?;
    let addr = server
        .start()
        .await
        .with_context(|| {
            format!(
                "Failed to bind {}:{}",
                config.server.host, config.server.port
            )
        })?;

    let ports: Vec<String> = config.clients.iter().map(|c| c.port.to_string()).collect();
    info!(
        "Managing {} clients on ports {} (worker binary: {})",
        config.clients.len(),
        ports.join(", "),
        config.worker.binary
    );
    info!("  GET  http://{}/clients                 - List all clients", addr);
    info!("  GET  http://{}/clients/status          - Health of all clients", addr);
    info!("  POST http://{}/clients/{{name}}/restart  - Restart a client", addr);

    wait_for_shutdown().await?;

    info!("Shutting down...");
    server.stop().await;
    Ok(())
}

async fn wait_for_shutdown() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
