// Scheduler module - drives one monitor on its own timer
//
// Each configured monitor gets a `MonitorScheduler` running in its own
// Tokio task. The scheduler owns the monitor's collector and timing state;
// the backend and host identity are shared with every other task.
//
// # Timing
// - The first invocation runs immediately
// - An invocation may start once `freq` has elapsed since the previous start
// - A slow invocation delays the next one; missed ticks are never queued,
//   so invocations of one monitor never overlap or catch up
// - Shutdown is cooperative: the invocation in progress finishes, the next
//   one is not started
// - Collectors block on /proc reads and statvfs, so each invocation runs on
//   Tokio's blocking pool; a collector that hangs only delays its own
//   monitor

use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::identity::HostIdentity;
use crate::measurement::Schema;
use crate::metrics::{Collector, CollectorError, MonitorArgs};
use crate::storage::{write_with_retry, Backend};

/// Counters reported by a scheduler when its loop exits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub monitor: String,
    /// Collector invocations started
    pub invocations: u64,
    /// Invocations whose collector returned an error
    pub failures: u64,
    /// Measurements stored
    pub written: u64,
    /// Measurements the backend did not store
    pub rejected: u64,
}

pub struct MonitorScheduler {
    monitor_type: String,
    freq: Duration,
    args: Arc<MonitorArgs>,
    collector_name: String,
    // Only ever locked by the single in-flight invocation or at startup
    collector: Arc<Mutex<Box<dyn Collector>>>,
    backend: Arc<dyn Backend>,
    identity: Arc<HostIdentity>,
    last_run: Option<Instant>,
    stats: MonitorStats,
}

impl MonitorScheduler {
    pub fn new(
        config: &MonitorConfig,
        collector: Box<dyn Collector>,
        backend: Arc<dyn Backend>,
        identity: Arc<HostIdentity>,
    ) -> Self {
        MonitorScheduler {
            monitor_type: config.kind.clone(),
            freq: Duration::from_secs(config.freq),
            args: Arc::new(config.args.clone()),
            collector_name: collector.name().to_string(),
            collector: Arc::new(Mutex::new(collector)),
            backend,
            identity,
            last_run: None,
            stats: MonitorStats {
                monitor: config.kind.clone(),
                ..MonitorStats::default()
            },
        }
    }

    pub fn monitor_type(&self) -> &str {
        &self.monitor_type
    }

    fn lock_collector(&self) -> MutexGuard<'_, Box<dyn Collector>> {
        self.collector.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Field types declared by this monitor's collector
    pub fn mapping(&self) -> Schema {
        self.lock_collector().mapping()
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    /// Runs the monitor until `shutdown` turns true or its sender is dropped
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> MonitorStats {
        info!(
            monitor = %self.monitor_type,
            collector = %self.collector_name,
            "Starting collection loop (every {}s)",
            self.freq.as_secs()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let now = Instant::now();
            let due = match self.last_run {
                Some(last) => last + self.freq,
                None => now,
            };

            if now >= due {
                self.last_run = Some(now);
                self.run_once().await;
                continue;
            }

            tokio::select! {
                _ = sleep_until(due) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(
            monitor = %self.monitor_type,
            invocations = self.stats.invocations,
            failures = self.stats.failures,
            written = self.stats.written,
            "Collection loop stopped"
        );
        self.stats
    }

    /// Performs one invocation: collect, enrich, then write every
    /// measurement in production order
    ///
    /// Returns the number of measurements stored. Failures are logged and
    /// counted, never propagated.
    pub async fn run_once(&mut self) -> usize {
        self.stats.invocations += 1;
        let started = Instant::now();

        let collector = Arc::clone(&self.collector);
        let args = Arc::clone(&self.args);
        let collected = tokio::task::spawn_blocking(move || {
            let mut collector = collector.lock().unwrap_or_else(PoisonError::into_inner);
            collector.collect(&args)
        })
        .await
        .unwrap_or_else(|e| Err(CollectorError::Failed(e.to_string())));

        let measurements = match collected {
            Ok(measurements) => measurements,
            Err(e) => {
                self.stats.failures += 1;
                error!(
                    monitor = %self.monitor_type,
                    collector = %self.collector_name,
                    error = %e,
                    "Failed to collect"
                );
                return 0;
            }
        };

        let now = Utc::now();
        let mut written = 0;
        for mut measurement in measurements {
            self.identity.enrich(&mut measurement, &self.monitor_type, now);
            match write_with_retry(self.backend.as_ref(), &self.monitor_type, measurement).await {
                Ok(()) => written += 1,
                Err(_) => self.stats.rejected += 1,
            }
        }
        self.stats.written += written as u64;

        let elapsed = started.elapsed();
        debug!(
            monitor = %self.monitor_type,
            elapsed_ms = elapsed.as_millis() as u64,
            written,
            "Invocation finished"
        );
        if elapsed > self.freq {
            warn!(
                monitor = %self.monitor_type,
                elapsed_ms = elapsed.as_millis() as u64,
                "Invocation took longer than its {}s interval",
                self.freq.as_secs()
            );
        }

        written
    }
}

/// Scripted collectors shared by the scheduler and daemon tests
#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;

    use crate::measurement::{schema_of, FieldType, Measurement, Schema};
    use crate::metrics::{Collector, CollectorError, MonitorArgs};

    #[derive(Clone, Default)]
    pub(crate) struct Starts(Arc<Mutex<Vec<Instant>>>);

    impl Starts {
        pub(crate) fn get(&self) -> Vec<Instant> {
            self.0.lock().unwrap().clone()
        }
    }

    /// Collector with scripted behaviour; `duration` blocks the calling
    /// thread in real time like a slow filesystem would
    pub(crate) struct FakeCollector {
        pub(crate) starts: Starts,
        pub(crate) duration: Duration,
        pub(crate) fail: bool,
        pub(crate) panic: bool,
        pub(crate) per_call: usize,
        pub(crate) fields: Vec<(&'static str, FieldType)>,
    }

    impl FakeCollector {
        pub(crate) fn new() -> Self {
            FakeCollector {
                starts: Starts::default(),
                duration: Duration::ZERO,
                fail: false,
                panic: false,
                per_call: 1,
                fields: vec![("value", FieldType::Long)],
            }
        }
    }

    impl Collector for FakeCollector {
        fn name(&self) -> &str {
            "fake"
        }

        fn mapping(&self) -> Schema {
            schema_of(&self.fields)
        }

        fn collect(&mut self, _args: &MonitorArgs) -> Result<Vec<Measurement>, CollectorError> {
            self.starts.0.lock().unwrap().push(Instant::now());
            if !self.duration.is_zero() {
                std::thread::sleep(self.duration);
            }
            if self.panic {
                panic!("collector crashed");
            }
            if self.fail {
                return Err(CollectorError::Parse {
                    path: "/proc/fake".to_string(),
                    detail: "unexpected format".to_string(),
                });
            }
            Ok((0..self.per_call)
                .map(|i| Measurement::new().with_value("value", i))
                .collect())
        }
    }
}
