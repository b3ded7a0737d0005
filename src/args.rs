use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "scanfleet")]
#[command(version)]
#[command(about = "Supervisor for a fleet of scanning-client workers", long_about = None)]
pub(crate) struct Cli {
    /// Port to listen on (default: 9009, or [server].port from the config file)
    pub port: Option<u16>,

    /// Address to bind (e.g., 127.0.0.1). Can also be set via SCANFLEET_HOST env var.
    #[arg(long)]
    pub host: Option<String>,

    /// Fleet config file. Can also be set via SCANFLEET_CONFIG env var.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Worker executable used for restarts. Can also be set via SCANFLEET_WORKER_BIN env var.
    #[arg(long)]
    pub worker_bin: Option<String>,
}
