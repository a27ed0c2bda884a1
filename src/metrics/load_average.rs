// Load Average metric collector
//
// Collects system load average metrics (1min, 5min, 15min)
// These values indicate the average number of processes in the run queue
// or waiting for disk I/O over the specified time periods.

use sysinfo::System;
use tracing::debug;

use super::{Collector, CollectorError, MonitorArgs};
use crate::measurement::{schema_of, FieldType, Measurement, Schema};

/// Load Average metric collector
///
/// Collects CPU load average values for 1, 5, and 15 minute intervals.
///
/// # Interpretation
/// - Values represent the average number of processes waiting for CPU time
/// - Values < number of CPU cores = system not overloaded
/// - Values > number of CPU cores = system is experiencing high load
///
/// # Platform Support
/// - Linux: Full support via /proc/loadavg
/// - macOS: Full support via sysctl
/// - Windows: Not available (returns 0.0)
pub struct LoadAverageCollector;

impl LoadAverageCollector {
    /// Creates a new LoadAverageCollector instance
    pub fn new() -> Self {
        LoadAverageCollector
    }
}

impl Collector for LoadAverageCollector {
    fn name(&self) -> &str {
        "load"
    }

    fn mapping(&self) -> Schema {
        schema_of(&[
            ("load_1m", FieldType::Double),
            ("load_5m", FieldType::Double),
            ("load_15m", FieldType::Double),
            ("cpu_cores", FieldType::Integer),
        ])
    }

    /// Collects current load average metrics
    ///
    /// # Measurement
    /// ```json
    /// { "load_1m": 1.5, "load_5m": 1.2, "load_15m": 0.9, "cpu_cores": 8 }
    /// ```
    fn collect(&mut self, _args: &MonitorArgs) -> Result<Vec<Measurement>, CollectorError> {
        let load_avg = System::load_average();

        // Number of CPU cores helps interpret whether load values are high
        let cpu_count = num_cpus::get();

        debug!(
            "Load average: 1min={:.2}, 5min={:.2}, 15min={:.2} (CPUs: {})",
            load_avg.one, load_avg.five, load_avg.fifteen, cpu_count
        );

        Ok(vec![Measurement::new()
            .with_value("load_1m", load_avg.one)
            .with_value("load_5m", load_avg.five)
            .with_value("load_15m", load_avg.fifteen)
            .with_value("cpu_cores", cpu_count)])
    }
}

impl Default for LoadAverageCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::FieldValue;

    #[test]
    fn test_load_fields_are_floats() {
        let mut collector = LoadAverageCollector::new();
        let measurements = collector.collect(&MonitorArgs::new()).unwrap();
        let m = &measurements[0];
        for key in ["load_1m", "load_5m", "load_15m"] {
            assert!(matches!(m.value(key), Some(FieldValue::Float(_))), "{}", key);
        }
        assert!(matches!(m.value("cpu_cores"), Some(FieldValue::Integer(n)) if *n >= 1));
    }
}
