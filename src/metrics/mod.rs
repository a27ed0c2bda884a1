// Metrics module - defines the extensible architecture for metric collection
//
// This module provides the core trait that all collectors must implement and
// the static registry the daemon uses to bind a monitor's `type` to a
// collector, enabling new monitors without touching the scheduler.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::measurement::{Measurement, Schema};

pub mod disk;
pub mod disk_io;
pub mod load_average;
pub mod memory;
pub mod network;
pub mod processes;
pub mod uptime;

/// Argument map passed verbatim from a monitor's configuration
pub type MonitorArgs = Map<String, Value>;

/// Errors a single collector invocation can raise
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {detail}")]
    Parse { path: String, detail: String },

    #[error("invalid monitor arguments: {0}")]
    InvalidArgs(#[from] serde_json::Error),

    /// The invocation itself crashed
    #[error("collector failed: {0}")]
    Failed(String),
}

impl CollectorError {
    pub(crate) fn read(path: &str, source: std::io::Error) -> Self {
        CollectorError::Read {
            path: path.to_string(),
            source,
        }
    }

    pub(crate) fn parse(path: &str, detail: impl Into<String>) -> Self {
        CollectorError::Parse {
            path: path.to_string(),
            detail: detail.into(),
        }
    }
}

/// Core trait that all collectors must implement.
///
/// A collector samples one operating-system subsystem and returns zero or
/// more measurements. It never sets timestamps or host identity; the
/// scheduler enriches every measurement after receipt.
///
/// # Design Philosophy
/// - **Blocking is fine**: collectors read `/proc` and call `statvfs`
///   synchronously; the scheduler runs each invocation on Tokio's blocking
///   pool, so a hung filesystem only stalls its own monitor
/// - **Owned per monitor**: `&mut self` lets a collector keep counters
///   between invocations (e.g. traffic rates), nothing is shared
/// - **Declared schema**: `mapping()` is read once at startup so the
///   backend can prepare storage before the first write
pub trait Collector: Send {
    /// Returns the collector name, used in log fields
    fn name(&self) -> &str;

    /// Static field name to storage type mapping of everything this
    /// collector may emit
    fn mapping(&self) -> Schema {
        Schema::new()
    }

    /// Collects current measurements
    ///
    /// # Arguments
    /// * `args` - The monitor's `args` object from the configuration
    ///
    /// # Errors
    /// Any failure; the scheduler logs it and waits for the next tick
    fn collect(&mut self, args: &MonitorArgs) -> Result<Vec<Measurement>, CollectorError>;
}

/// Deserializes a monitor's argument map into a typed struct
pub(crate) fn parse_args<T: DeserializeOwned>(args: &MonitorArgs) -> Result<T, CollectorError> {
    Ok(serde_json::from_value(Value::Object(args.clone()))?)
}

type CollectorFactory = Box<dyn Fn() -> Box<dyn Collector> + Send + Sync>;

/// Static name → collector factory table
///
/// Built once at process start. Looking up an unknown name yields `None`,
/// which the daemon reports as a configuration error.
pub struct CollectorRegistry {
    factories: BTreeMap<String, CollectorFactory>,
}

impl CollectorRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        CollectorRegistry {
            factories: BTreeMap::new(),
        }
    }

    /// Registry holding every built-in collector.
    ///
    /// # Adding New Monitors
    /// 1. Create a new module implementing `Collector`
    /// 2. Declare it at the top of this file
    /// 3. Register its factory here under the monitor `type` name
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry
            // Filesystem usage via statvfs
            .register("diskspace", || Box::new(disk::DiskSpaceCollector::new()))
            // Block device I/O counters
            .register("diskio", || Box::new(disk_io::DiskIoCollector::new()))
            // Network interface counters and traffic rates
            .register("ifstats", || Box::new(network::InterfaceCollector::new()))
            // /proc/meminfo
            .register("meminfo", || Box::new(memory::MemoryCollector::new()))
            // 1/5/15 minute load average
            .register("load", || Box::new(load_average::LoadAverageCollector::new()))
            // Process, thread and kernel thread counts
            .register("procs", || Box::new(processes::ProcessCollector::new()))
            // Seconds since boot
            .register("uptime", || Box::new(uptime::UptimeCollector::new()));
        registry
    }

    /// Registers a factory under `name`, replacing any previous entry
    pub fn register<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Collector> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
        self
    }

    /// Instantiates a fresh collector for `name`
    pub fn create(&self, name: &str) -> Option<Box<dyn Collector>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_builtin_registry_names() {
        let registry = CollectorRegistry::builtin();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(
            names,
            vec!["diskio", "diskspace", "ifstats", "load", "meminfo", "procs", "uptime"]
        );
    }

    #[test]
    fn test_create_binds_by_name() {
        let registry = CollectorRegistry::builtin();
        let collector = registry.create("uptime").unwrap();
        assert_eq!(collector.name(), "uptime");
        assert!(collector.mapping().contains_key("uptime"));
        assert!(registry.create("nonexistent").is_none());
    }

    #[test]
    fn test_every_builtin_declares_a_mapping() {
        let registry = CollectorRegistry::builtin();
        for name in registry.names() {
            let collector = registry.create(name).unwrap();
            assert!(!collector.mapping().is_empty(), "{} declares no fields", name);
        }
    }

    #[test]
    fn test_parse_args() {
        #[derive(Deserialize)]
        struct Args {
            #[serde(default)]
            filesystems: Vec<String>,
        }

        let args: MonitorArgs = serde_json::from_str(r#"{"filesystems": ["/", "/home"]}"#).unwrap();
        let parsed: Args = parse_args(&args).unwrap();
        assert_eq!(parsed.filesystems, vec!["/", "/home"]);

        let parsed: Args = parse_args(&MonitorArgs::new()).unwrap();
        assert!(parsed.filesystems.is_empty());

        let bad: MonitorArgs = serde_json::from_str(r#"{"filesystems": 5}"#).unwrap();
        assert!(matches!(
            parse_args::<Args>(&bad),
            Err(CollectorError::InvalidArgs(_))
        ));
    }
}
