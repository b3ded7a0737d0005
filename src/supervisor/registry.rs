use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::clienv;
use crate::error::{Result, SupervisorError};

/// A managed worker: one scanning-client process listening on its own port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Unique name, matched case-insensitively (e.g., "client01")
    pub name: String,
    /// Loopback port the worker's HTTP API listens on
    pub port: u16,
    /// Worker data directory; may start with `~`
    pub data_path: String,
}

impl WorkerConfig {
    pub fn new(name: impl Into<String>, port: u16, data_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port,
            data_path: data_path.into(),
        }
    }

    /// Data directory with the home placeholder expanded.
    pub fn resolved_data_dir(&self) -> PathBuf {
        clienv::expand_home(&self.data_path)
    }
}

/// The fleet: an immutable, ordered table of workers.
///
/// Cloning shares the same snapshot.
#[derive(Debug, Clone)]
pub struct ClientRegistry {
    workers: Arc<[WorkerConfig]>,
}

impl ClientRegistry {
    pub fn new(workers: Vec<WorkerConfig>) -> Self {
        Self {
            workers: workers.into(),
        }
    }

    /// The built-in five-client fleet on ports 9061-9065.
    pub fn default_fleet() -> Vec<WorkerConfig> {
        (1..=5u16)
            .map(|i| {
                let name = format!("client{:02}", i);
                let data_path = format!("~/naps2-{}", name);
                WorkerConfig::new(name, 9060 + i, data_path)
            })
            .collect()
    }

    /// All workers in configuration order.
    pub fn list(&self) -> &[WorkerConfig] {
        &self.workers
    }

    pub fn find(&self, name: &str) -> Result<&WorkerConfig> {
        self.workers
            .iter()
            .find(|w| w.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| SupervisorError::ClientNotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(Self::default_fleet())
    }
}
