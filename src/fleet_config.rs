use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::clienv;
use crate::supervisor::health::{DEFAULT_PROBE_HOST, DEFAULT_PROBE_TIMEOUT};
use crate::supervisor::lifecycle::RestartTiming;
use crate::supervisor::registry::{ClientRegistry, WorkerConfig};
use crate::supervisor::server::{ServerConfig, DEFAULT_SHUTDOWN_GRACE};

/// Supervisor configuration, read from `fleet.toml`.
///
/// Every section is optional; omitted keys fall back to the built-in defaults
/// and an omitted `[[clients]]` table keeps the default five-client fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FleetConfig {
    pub server: ServerSection,
    pub worker: WorkerSection,
    pub timing: TimingSection,
    pub clients: Vec<WorkerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerSection {
    /// Worker executable; a bare name is looked up on PATH
    pub binary: String,
    /// Host used to reach worker health endpoints
    pub probe_host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimingSection {
    pub probe_timeout_ms: u64,
    pub release_timeout_ms: u64,
    pub startup_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            worker: WorkerSection::default(),
            timing: TimingSection::default(),
            clients: ClientRegistry::default_fleet(),
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            host: defaults.host,
            port: defaults.port,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE.as_millis() as u64,
        }
    }
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            binary: clienv::default_worker_binary(),
            probe_host: DEFAULT_PROBE_HOST.to_string(),
        }
    }
}

impl Default for TimingSection {
    fn default() -> Self {
        let restart = RestartTiming::default();
        Self {
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT.as_millis() as u64,
            release_timeout_ms: restart.release_timeout.as_millis() as u64,
            startup_timeout_ms: restart.startup_timeout.as_millis() as u64,
            poll_interval_ms: restart.poll_interval.as_millis() as u64,
        }
    }
}

impl FleetConfig {
    /// Load from `path`, `$SCANFLEET_CONFIG`, or the default location, then apply
    /// environment overrides.
    ///
    /// An explicitly named file must exist; a missing default file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit: Option<PathBuf> = path
            .map(Path::to_path_buf)
            .or_else(clienv::config_path_override);

        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => {
                let path = clienv::config_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    tracing::trace!("Config file does not exist, using defaults");
                    Self::default()
                }
            }
        };

        if let Some(binary) = clienv::worker_binary_override() {
            config.worker.binary = binary;
        }
        if let Some(host) = clienv::host_override() {
            config.server.host = host;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        tracing::trace!(path = %path.display(), "Loading fleet config");

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        tracing::trace!(clients = config.clients.len(), "Fleet config loaded");
        Ok(config)
    }

    /// Reject configurations a worker name could not resolve against unambiguously.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut ports = HashSet::new();

        for client in &self.clients {
            if client.name.trim().is_empty() {
                bail!("Client with port {} has an empty name", client.port);
            }
            if client.port == 0 {
                bail!("Client '{}' has no port", client.name);
            }
            if !names.insert(client.name.to_ascii_lowercase()) {
                bail!("Duplicate client name '{}'", client.name);
            }
            if !ports.insert(client.port) {
                tracing::warn!(
                    "Port {} is assigned to more than one client (second: '{}')",
                    client.port,
                    client.name
                );
            }
        }

        if self.timing.poll_interval_ms == 0 {
            bail!("timing.poll_interval_ms must be greater than zero");
        }
        if self.timing.probe_timeout_ms == 0 {
            bail!("timing.probe_timeout_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn registry(&self) -> ClientRegistry {
        ClientRegistry::new(self.clients.clone())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.probe_timeout_ms)
    }

    pub fn restart_timing(&self) -> RestartTiming {
        RestartTiming {
            release_timeout: Duration::from_millis(self.timing.release_timeout_ms),
            startup_timeout: Duration::from_millis(self.timing.startup_timeout_ms),
            poll_interval: Duration::from_millis(self.timing.poll_interval_ms),
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            shutdown_grace: Duration::from_millis(self.server.shutdown_grace_ms),
        }
    }
}
