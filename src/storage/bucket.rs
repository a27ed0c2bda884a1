// Daily bucket tracking shared by the document-store backends
//
// Writes land in `<prefix>-YYYY.MM.DD`. The name of the bucket known to
// exist is a single mutex-guarded field; the compare, create and update
// sequence runs under that lock so concurrent monitors never race on
// rollover.

use chrono::{DateTime, Utc};
use std::future::Future;
use tokio::sync::Mutex;
use tracing::info;

use super::BackendError;

/// Result of a create-if-not-exists call against the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

pub struct DailyBuckets {
    prefix: String,
    current: Mutex<Option<String>>,
}

impl DailyBuckets {
    pub fn new(prefix: impl Into<String>) -> Self {
        DailyBuckets {
            prefix: prefix.into(),
            current: Mutex::new(None),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Bucket name for a point in time, e.g. `monitor-2015.12.05`
    pub fn name_for(&self, at: DateTime<Utc>) -> String {
        format!("{}-{}", self.prefix, at.format("%Y.%m.%d"))
    }

    /// Glob matching every bucket of this prefix
    pub fn pattern(&self) -> String {
        format!("{}-*", self.prefix)
    }

    /// Returns the bucket for `at`, creating it first if it differs from
    /// the current one
    ///
    /// `create` must tolerate the bucket already existing. On failure the
    /// current bucket is left unchanged so the next write tries again.
    pub async fn ensure<F, Fut>(&self, at: DateTime<Utc>, create: F) -> Result<String, BackendError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<CreateOutcome, BackendError>>,
    {
        let name = self.name_for(at);
        let mut current = self.current.lock().await;
        if current.as_deref() == Some(name.as_str()) {
            return Ok(name);
        }

        match create(name.clone()).await? {
            CreateOutcome::Created => info!("Created bucket {}", name),
            CreateOutcome::AlreadyExists => info!("Switched to existing bucket {}", name),
        }
        *current = Some(name.clone());
        Ok(name)
    }

    #[cfg(test)]
    pub async fn current(&self) -> Option<String> {
        self.current.lock().await.clone()
    }
}
