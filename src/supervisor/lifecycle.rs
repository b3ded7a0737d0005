use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::health::{HealthMonitor, HealthResult};
use super::process::{LaunchSpec, ProcessControl};
use super::registry::{ClientRegistry, WorkerConfig};
use crate::error::{Result, SupervisorError};

/// Pacing of the kill -> launch -> verify sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartTiming {
    /// How long the old listener may take to disappear
    pub release_timeout: Duration,
    /// How long the new worker may take to report healthy
    pub startup_timeout: Duration,
    /// Delay between readiness checks
    pub poll_interval: Duration,
}

impl Default for RestartTiming {
    fn default() -> Self {
        Self {
            release_timeout: Duration::from_secs(5),
            startup_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Result of one restart attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartOutcome {
    pub success: bool,
    pub message: String,
    pub worker_name: String,
    pub port: u16,
    /// Last probe after launch; `None` if no replacement was launched
    pub final_health: Option<HealthResult>,
}

impl RestartOutcome {
    fn failed(worker: &WorkerConfig, reason: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            message: format!("Failed to restart client: {}", reason),
            worker_name: worker.name.clone(),
            port: worker.port,
            final_health: None,
        }
    }

    fn verified(worker: &WorkerConfig, health: HealthResult) -> Self {
        let message = if health.healthy {
            format!("Client {} restarted successfully", worker.name)
        } else {
            "Client restarted but not healthy".to_string()
        };
        Self {
            success: health.healthy,
            message,
            worker_name: worker.name.clone(),
            port: worker.port,
            final_health: Some(health),
        }
    }
}

/// Kills, relaunches and verifies workers.
///
/// Restarts of one worker are mutually exclusive: a request arriving while
/// that worker is already restarting is rejected with
/// [`SupervisorError::RestartInProgress`]. Different workers restart
/// independently.
pub struct LifecycleManager {
    registry: ClientRegistry,
    health: HealthMonitor,
    processes: Arc<dyn ProcessControl>,
    worker_binary: String,
    timing: RestartTiming,
    guards: HashMap<String, Arc<Mutex<()>>>,
}

impl LifecycleManager {
    pub fn new(
        registry: ClientRegistry,
        health: HealthMonitor,
        processes: Arc<dyn ProcessControl>,
        worker_binary: impl Into<String>,
        timing: RestartTiming,
    ) -> Self {
        let guards = registry
            .list()
            .iter()
            .map(|w| (guard_key(&w.name), Arc::new(Mutex::new(()))))
            .collect();

        Self {
            registry,
            health,
            processes,
            worker_binary: worker_binary.into(),
            timing,
            guards,
        }
    }

    pub fn timing(&self) -> RestartTiming {
        self.timing
    }

    /// Restart the worker called `name` (case-insensitive).
    ///
    /// Fails only for an unknown name or a restart already in progress; every
    /// other failure is reported inside the outcome.
    pub async fn restart(&self, name: &str) -> Result<RestartOutcome> {
        let worker = self.registry.find(name)?.clone();
        let guard = self
            .guards
            .get(&guard_key(&worker.name))
            .cloned()
            .ok_or_else(|| SupervisorError::ClientNotFound(name.to_string()))?;

        let _restarting = guard
            .try_lock_owned()
            .map_err(|_| SupervisorError::RestartInProgress(worker.name.clone()))?;

        info!("Restarting client {}...", worker.name);
        let outcome = self.run_restart(&worker).await;

        if outcome.success {
            info!("{}", outcome.message);
        } else {
            warn!("Restart of '{}' unsuccessful: {}", worker.name, outcome.message);
        }
        Ok(outcome)
    }

    async fn run_restart(&self, worker: &WorkerConfig) -> RestartOutcome {
        self.kill_worker(worker).await;

        if !self.wait_port_released(worker.port).await {
            return RestartOutcome::failed(
                worker,
                format!(
                    "port {} still in use after {:?}",
                    worker.port, self.timing.release_timeout
                ),
            );
        }

        let spec = LaunchSpec::for_worker(&self.worker_binary, worker);
        if let Err(e) = self.processes.launch(&spec) {
            error!("Failed to start worker '{}': {}", worker.name, e);
            return RestartOutcome::failed(worker, format!("{}: {}", spec.program, e));
        }

        let health = self.wait_until_ready(worker).await;
        RestartOutcome::verified(worker, health)
    }

    /// Kill every process tree serving the worker's port. Best effort.
    async fn kill_worker(&self, worker: &WorkerConfig) {
        let processes = Arc::clone(&self.processes);
        let port = worker.port;

        let results = tokio::task::spawn_blocking(move || {
            let mut killed = BTreeSet::new();
            let mut results = Vec::new();
            for pid in processes.find_pids(port) {
                // Already taken down as part of an earlier tree
                if killed.contains(&pid) {
                    continue;
                }
                let result = processes.kill_tree(pid);
                if let Ok(ref pids) = result {
                    killed.extend(pids.iter().copied());
                }
                results.push((pid, result));
            }
            results
        })
        .await;

        let results = match results {
            Ok(results) => results,
            Err(e) => {
                warn!("Process discovery for '{}' failed: {}", worker.name, e);
                return;
            }
        };

        if results.is_empty() {
            debug!("No running process found for '{}'", worker.name);
        }

        for (pid, result) in results {
            match result {
                Ok(tree) => info!(
                    "Killed process {} for {} ({} in tree)",
                    pid,
                    worker.name,
                    tree.len()
                ),
                Err(e) => warn!("Failed to kill process {}: {}", pid, e),
            }
        }
    }

    /// Poll until nothing accepts connections on `port`, up to the release timeout.
    async fn wait_port_released(&self, port: u16) -> bool {
        let deadline = Instant::now() + self.timing.release_timeout;
        loop {
            if !self.health.is_listening(port).await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.timing.poll_interval).await;
        }
    }

    /// Probe until the worker reports running or the startup timeout passes.
    async fn wait_until_ready(&self, worker: &WorkerConfig) -> HealthResult {
        let deadline = Instant::now() + self.timing.startup_timeout;
        loop {
            let health = self.health.check_health(worker).await;
            if health.healthy || Instant::now() >= deadline {
                return health;
            }
            tokio::time::sleep(self.timing.poll_interval).await;
        }
    }
}

fn guard_key(name: &str) -> String {
    name.to_ascii_lowercase()
}
