// In-memory backend
//
// Used when no backend is configured. Measurements are logged and dropped
// once `write` returns; nothing is retained, so a daemon left running
// without storage stays at constant memory.
//
// The tests use `RecordingBackend` instead, which keeps every write so they
// can observe exactly what reached storage.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info};

use super::{Backend, BackendError};
use crate::measurement::{Measurement, Schema};

#[derive(Default)]
pub struct MemoryBackend {
    connected: AtomicBool,
    written: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn prepare(&self, schema: &Schema) -> Result<(), BackendError> {
        info!("Declared {} field(s); measurements are logged, not stored", schema.len());
        Ok(())
    }

    async fn connect(&self) -> Result<(), BackendError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn write(&self, measurement: Measurement) -> Result<(), BackendError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("not connected".to_string()));
        }
        let n = self.written.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("#{} {}", n, measurement);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) use recording::{BackendEvent, RecordingBackend};

#[cfg(test)]
mod recording {
    use std::sync::{Mutex, MutexGuard};

    use super::*;

    /// Lifecycle call observed by the recording backend
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum BackendEvent {
        Prepare,
        Connect,
        Write,
    }

    /// Backend keeping every call and measurement for assertions
    #[derive(Default)]
    pub(crate) struct RecordingBackend {
        schema: Mutex<Option<Schema>>,
        measurements: Mutex<Vec<Measurement>>,
        events: Mutex<Vec<BackendEvent>>,
        connected: AtomicBool,
    }

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap()
    }

    impl RecordingBackend {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn prepared_schema(&self) -> Option<Schema> {
            lock(&self.schema).clone()
        }

        pub(crate) fn measurements(&self) -> Vec<Measurement> {
            lock(&self.measurements).clone()
        }

        pub(crate) fn events(&self) -> Vec<BackendEvent> {
            lock(&self.events).clone()
        }
    }

    #[async_trait]
    impl Backend for RecordingBackend {
        fn kind(&self) -> &'static str {
            "recording"
        }

        async fn prepare(&self, schema: &Schema) -> Result<(), BackendError> {
            lock(&self.events).push(BackendEvent::Prepare);
            *lock(&self.schema) = Some(schema.clone());
            Ok(())
        }

        async fn connect(&self) -> Result<(), BackendError> {
            lock(&self.events).push(BackendEvent::Connect);
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn write(&self, measurement: Measurement) -> Result<(), BackendError> {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(BackendError::Unavailable("not connected".to_string()));
            }
            lock(&self.events).push(BackendEvent::Write);
            lock(&self.measurements).push(measurement);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{schema_of, FieldType};

    #[tokio::test]
    async fn test_write_requires_connect() {
        let backend = MemoryBackend::new();
        let m = Measurement::new().with_value("uptime", 10);

        assert!(matches!(
            backend.write(m.clone()).await,
            Err(BackendError::Unavailable(_))
        ));

        backend.connect().await.unwrap();
        backend.write(m).await.unwrap();
    }

    #[tokio::test]
    async fn test_written_measurements_are_not_retained() {
        let backend = MemoryBackend::new();
        backend.prepare(&Schema::new()).await.unwrap();
        backend.connect().await.unwrap();

        for i in 0..1_000 {
            let m = Measurement::new()
                .with_value("uptime", i)
                .with_tag("type", "uptime");
            backend.write(m).await.unwrap();
        }

        // Only the connection flag and the write counter survive a write
        assert_eq!(backend.written.load(Ordering::Relaxed), 1_000);
        assert_eq!(std::mem::size_of::<MemoryBackend>(), 16);
    }

    #[tokio::test]
    async fn test_recording_backend_keeps_lifecycle_order() {
        let backend = RecordingBackend::new();
        let schema = schema_of(&[("uptime", FieldType::Integer)]);

        backend.prepare(&schema).await.unwrap();
        backend.connect().await.unwrap();
        backend
            .write(Measurement::new().with_value("uptime", 1))
            .await
            .unwrap();

        assert_eq!(backend.prepared_schema(), Some(schema));
        assert_eq!(backend.measurements().len(), 1);
        assert_eq!(
            backend.events(),
            vec![BackendEvent::Prepare, BackendEvent::Connect, BackendEvent::Write]
        );
    }
}
