//! Fleet supervisor - status aggregation and forced restarts for scanning clients
//!
//! Each worker is an independent process reachable over loopback HTTP on its
//! own port. The supervisor never talks to worker internals; it probes
//! `GET /health` and, when asked, kills and relaunches the process.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               SupervisorServer               │
//! │         (socket, accept loop, CORS)          │
//! ├──────────────────────────────────────────────┤
//! │                  Dispatcher                  │
//! ├──────────────┬────────────────┬──────────────┤
//! │ClientRegistry│ HealthMonitor  │ Lifecycle    │
//! │ (fleet table)│ (probe fan-out)│ (kill/launch)│
//! ├──────────────┴────────────────┴──────────────┤
//! │ client01 │ client02 │ client03 │ ...         │
//! └──────────────────────────────────────────────┘
//! ```

pub mod health;
pub mod lifecycle;
pub mod process;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;

pub use health::{HealthMonitor, HealthResult, HealthState};
pub use lifecycle::{LifecycleManager, RestartOutcome, RestartTiming};
pub use process::{LaunchSpec, ProcessControl, SystemProcesses};
pub use registry::{ClientRegistry, WorkerConfig};
pub use router::{Dispatcher, Reply};
pub use server::{ServerConfig, SupervisorServer};

use std::sync::Arc;

use crate::error::Result;
use crate::fleet_config::FleetConfig;

/// Wire registry, health monitor, lifecycle manager and dispatcher into a server.
pub fn build_server(
    config: &FleetConfig,
    processes: Arc<dyn ProcessControl>,
) -> Result<SupervisorServer> {
    let registry = config.registry();
    let health = HealthMonitor::new(config.worker.probe_host.clone(), config.probe_timeout())?;

    let lifecycle = LifecycleManager::new(
        registry.clone(),
        health.clone(),
        processes,
        config.worker.binary.clone(),
        config.restart_timing(),
    );

    let dispatcher = Dispatcher::new(registry, health, Arc::new(lifecycle));
    Ok(SupervisorServer::new(
        config.server_config(),
        Arc::new(dispatcher),
    ))
}
