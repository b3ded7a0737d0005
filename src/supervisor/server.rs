use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::router::{router, Dispatcher};
use crate::error::Result;

/// Default grace period for in-flight requests on stop
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9009,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

struct Running {
    addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the listening socket and the accept loop.
///
/// `start` and `stop` are idempotent.
pub struct SupervisorServer {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    running: Mutex<Option<Running>>,
}

impl SupervisorServer {
    pub fn new(config: ServerConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config,
            dispatcher,
            running: Mutex::new(None),
        }
    }

    /// Bind and spawn the accept loop. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            if !current.task.is_finished() {
                return Ok(current.addr);
            }
        }

        let bind = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(bind.as_str()).await.map_err(|e| {
            error!("Failed to start supervisor on {}: {}", bind, e);
            e
        })?;
        let addr = listener.local_addr()?;

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let app = router(Arc::clone(&self.dispatcher));

        // axum::serve spawns one task per connection and logs transient accept errors.
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await;
            if let Err(e) = result {
                error!("Supervisor accept loop failed: {}", e);
            }
        });

        info!("Supervisor started on http://{}/", addr);
        *running = Some(Running { addr, cancel, task });
        Ok(addr)
    }

    /// Stop accepting, unbind, and wait up to the grace period for in-flight requests.
    pub async fn stop(&self) {
        let Some(Running { cancel, mut task, .. }) = self.running.lock().await.take() else {
            return;
        };

        cancel.cancel();
        match tokio::time::timeout(self.config.shutdown_grace, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Supervisor task ended abnormally: {}", e),
            Err(_) => {
                warn!(
                    "In-flight requests still running after {:?}, aborting",
                    self.config.shutdown_grace
                );
                task.abort();
            }
        }

        info!("Supervisor stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.addr)
    }
}
