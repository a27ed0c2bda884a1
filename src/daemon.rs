// Daemon module - wires monitors, backend and host identity together
//
// Startup order:
// 1. Resolve host identity
// 2. Build the backend from configuration
// 3. Build one scheduler per configured monitor through the registry
// 4. Prepare the backend with the merged schema of every monitor
// 5. Connect the backend
// 6. Spawn every scheduler on its own task and wait for all of them

use futures_util::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::{ConfigError, DaemonConfig, MonitorConfig};
use crate::identity::HostIdentity;
use crate::measurement::{merge_schemas, Schema};
use crate::metrics::CollectorRegistry;
use crate::scheduler::{MonitorScheduler, MonitorStats};
use crate::storage::{self, Backend, BackendError};

/// Startup failures; steady-state faults never surface here
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Signals every scheduler of a daemon to stop
#[derive(Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        // send_replace stores the value even while no receiver is subscribed
        self.sender.send_replace(true);
    }
}

pub struct MonitorDaemon {
    schedulers: Vec<MonitorScheduler>,
    backend: Arc<dyn Backend>,
    shutdown: ShutdownHandle,
}

impl MonitorDaemon {
    /// Builds a daemon from a loaded configuration
    pub fn new(config: DaemonConfig, registry: &CollectorRegistry) -> Result<Self, DaemonError> {
        let identity = Arc::new(HostIdentity::resolve());
        let backend = storage::from_config(&config.backend)?;
        Self::with_backend(config.monitors, backend, identity, registry)
    }

    /// Builds a daemon around an already constructed backend
    pub fn with_backend(
        monitors: Vec<MonitorConfig>,
        backend: Arc<dyn Backend>,
        identity: Arc<HostIdentity>,
        registry: &CollectorRegistry,
    ) -> Result<Self, DaemonError> {
        let mut schedulers = Vec::with_capacity(monitors.len());
        for monitor in &monitors {
            let Some(collector) = registry.create(&monitor.kind) else {
                let known: Vec<&str> = registry.names().collect();
                error!(
                    monitor = %monitor.kind,
                    "Unknown monitor type, expected one of: {}",
                    known.join(", ")
                );
                return Err(ConfigError::UnknownMonitor(monitor.kind.clone()).into());
            };
            info!(
                monitor = %monitor.kind,
                "Scheduling monitor with interval of {}s",
                monitor.freq
            );
            schedulers.push(MonitorScheduler::new(
                monitor,
                collector,
                Arc::clone(&backend),
                Arc::clone(&identity),
            ));
        }

        let (sender, _) = watch::channel(false);
        Ok(MonitorDaemon {
            schedulers,
            backend,
            shutdown: ShutdownHandle {
                sender: Arc::new(sender),
            },
        })
    }

    /// Merged schema of every monitor, later monitors winning on conflicts
    pub fn schema(&self) -> Schema {
        let mappings: Vec<Schema> = self.schedulers.iter().map(MonitorScheduler::mapping).collect();
        merge_schemas(&mappings)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Runs every monitor until shutdown is signalled
    ///
    /// Returns once every scheduler has observed shutdown and exited, with
    /// their stats in configuration order.
    pub async fn run(self) -> Result<Vec<MonitorStats>, DaemonError> {
        let schema = self.schema();
        start_backend(self.backend.as_ref(), &schema).await?;

        let mut handles = Vec::with_capacity(self.schedulers.len());
        for scheduler in self.schedulers {
            let monitor = scheduler.monitor_type().to_string();
            let rx = self.shutdown.sender.subscribe();
            handles.push((monitor, tokio::spawn(scheduler.run(rx))));
        }
        info!("Started {} monitor task(s)", handles.len());

        let (monitors, tasks): (Vec<String>, Vec<_>) = handles.into_iter().unzip();
        let mut stats = Vec::with_capacity(tasks.len());
        for (monitor, result) in monitors.into_iter().zip(join_all(tasks).await) {
            match result {
                Ok(s) => stats.push(s),
                Err(e) => {
                    error!(monitor = %monitor, error = %e, "Monitor task panicked");
                    stats.push(MonitorStats {
                        monitor,
                        ..MonitorStats::default()
                    });
                }
            }
        }

        info!("All monitor tasks stopped");
        Ok(stats)
    }

    /// Prepares and connects the backend, then invokes every monitor once
    /// in configuration order
    pub async fn run_once(mut self) -> Result<Vec<MonitorStats>, DaemonError> {
        let schema = self.schema();
        start_backend(self.backend.as_ref(), &schema).await?;

        let mut stats = Vec::with_capacity(self.schedulers.len());
        for scheduler in &mut self.schedulers {
            scheduler.run_once().await;
            stats.push(scheduler.stats().clone());
        }
        Ok(stats)
    }
}

/// Prepares the backend with the merged schema, then connects it
async fn start_backend(backend: &dyn Backend, schema: &Schema) -> Result<(), BackendError> {
    info!(
        "Preparing {} backend with {} field(s)",
        backend.kind(),
        schema.len()
    );
    backend.prepare(schema).await?;
    backend.connect().await?;
    info!("Connected to {} backend", backend.kind());
    Ok(())
}
