// Storage module - the backend contract every measurement flows through
//
// This module is responsible for:
// 1. Defining the `Backend` trait (prepare, connect, write)
// 2. Classifying storage failures into unavailable vs rejected
// 3. Building the configured backend variant at startup
// 4. Writing measurements with the retry policy the schedulers rely on

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::BackendConfig;
use crate::measurement::{Measurement, Schema};

pub mod bucket;
pub mod elasticsearch;
pub mod influxdb;
pub mod memory;
pub mod mongo;

pub use memory::MemoryBackend;
#[cfg(test)]
pub(crate) use memory::RecordingBackend;

/// Errors that can occur while talking to a storage backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// The store could not be reached or failed server-side; transient
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The store refused this particular measurement
    #[error("write rejected: {0}")]
    WriteRejected(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

/// Storage backend contract
///
/// One instance is shared by every monitor task, so implementations must
/// tolerate concurrent `write` calls.
///
/// # Lifecycle
/// 1. `prepare` with the merged schema of every configured monitor
/// 2. `connect`
/// 3. any number of concurrent `write` calls
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short variant name used in logs
    fn kind(&self) -> &'static str;

    /// Establishes or updates durable storage structures; idempotent
    async fn prepare(&self, schema: &Schema) -> Result<(), BackendError>;

    /// Establishes and validates the live session
    async fn connect(&self) -> Result<(), BackendError>;

    /// Durably records one measurement
    async fn write(&self, measurement: Measurement) -> Result<(), BackendError>;
}

/// Instantiates the backend variant selected by the configuration
pub fn from_config(config: &BackendConfig) -> Result<Arc<dyn Backend>, BackendError> {
    let backend: Arc<dyn Backend> = match config {
        BackendConfig::Elasticsearch(cfg) => {
            Arc::new(elasticsearch::ElasticsearchBackend::new(cfg.clone())?)
        }
        BackendConfig::Mongodb(cfg) => Arc::new(mongo::MongoBackend::new(cfg.clone())),
        BackendConfig::Influxdb(cfg) => Arc::new(influxdb::InfluxBackend::new(cfg.clone())?),
        BackendConfig::Memory => Arc::new(MemoryBackend::new()),
    };
    info!("Using {} backend", backend.kind());
    Ok(backend)
}

/// Writes a measurement, retrying once on transient failures
///
/// Every failure is logged here; rejected measurements are not retried.
pub async fn write_with_retry(
    backend: &dyn Backend,
    monitor: &str,
    measurement: Measurement,
) -> Result<(), BackendError> {
    const MAX_RETRIES: u32 = 1;

    let mut attempt = 0;
    loop {
        match backend.write(measurement.clone()).await {
            Ok(()) => {
                if attempt > 0 {
                    info!(
                        "Successfully stored {} measurement after {} retry(ies)",
                        monitor, attempt
                    );
                }
                return Ok(());
            }
            Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                warn!(
                    "Failed to store {} measurement (attempt {}): {}. Retrying...",
                    monitor,
                    attempt + 1,
                    e
                );
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Err(e) => {
                error!(
                    "Failed to store {} measurement after {} attempt(s): {}. Giving up.",
                    monitor,
                    attempt + 1,
                    e
                );
                return Err(e);
            }
        }
    }
}

/// Maps a transport-level reqwest failure
pub(crate) fn unavailable(context: &str, e: reqwest::Error) -> BackendError {
    BackendError::Unavailable(format!("{}: {}", context, e))
}

/// Maps a non-success HTTP status: 4xx rejects the payload, anything else
/// is treated as the server being unavailable
pub(crate) fn status_error(context: &str, status: reqwest::StatusCode, body: &str) -> BackendError {
    let detail = format!("{} returned {}: {}", context, status, body.trim());
    if status.is_client_error() {
        BackendError::WriteRejected(detail)
    } else {
        BackendError::Unavailable(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyBackend {
        calls: AtomicUsize,
        fail_first: usize,
        error: BackendError,
    }

    #[async_trait]
    impl Backend for FlakyBackend {
        fn kind(&self) -> &'static str {
            "flaky"
        }

        async fn prepare(&self, _schema: &Schema) -> Result<(), BackendError> {
            Ok(())
        }

        async fn connect(&self) -> Result<(), BackendError> {
            Ok(())
        }

        async fn write(&self, _measurement: Measurement) -> Result<(), BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried_once() {
        let backend = FlakyBackend {
            calls: AtomicUsize::new(0),
            fail_first: 1,
            error: BackendError::Unavailable("connection reset".into()),
        };
        assert!(write_with_retry(&backend, "load", Measurement::new()).await.is_ok());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_gives_up() {
        let backend = FlakyBackend {
            calls: AtomicUsize::new(0),
            fail_first: usize::MAX,
            error: BackendError::Unavailable("down".into()),
        };
        let result = write_with_retry(&backend, "load", Measurement::new()).await;
        assert!(matches!(result, Err(BackendError::Unavailable(_))));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let backend = FlakyBackend {
            calls: AtomicUsize::new(0),
            fail_first: usize::MAX,
            error: BackendError::WriteRejected("mapper_parsing_exception".into()),
        };
        let result = write_with_retry(&backend, "load", Measurement::new()).await;
        assert!(matches!(result, Err(BackendError::WriteRejected(_))));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_status_classification() {
        let rejected = status_error("index", reqwest::StatusCode::BAD_REQUEST, "bad field");
        assert!(matches!(rejected, BackendError::WriteRejected(_)));

        let unavailable = status_error("index", reqwest::StatusCode::SERVICE_UNAVAILABLE, "");
        assert!(unavailable.is_transient());
    }

    #[test]
    fn test_memory_backend_from_config() {
        let backend = from_config(&BackendConfig::Memory).unwrap();
        assert_eq!(backend.kind(), "memory");
    }
}
