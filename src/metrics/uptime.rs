// Uptime collector
//
// Reports the number of whole seconds since the system booted

use sysinfo::System;
use tracing::debug;

use super::{Collector, CollectorError, MonitorArgs};
use crate::measurement::{schema_of, FieldType, Measurement, Schema};

pub struct UptimeCollector;

impl UptimeCollector {
    pub fn new() -> Self {
        UptimeCollector
    }
}

impl Collector for UptimeCollector {
    fn name(&self) -> &str {
        "uptime"
    }

    fn mapping(&self) -> Schema {
        schema_of(&[("uptime", FieldType::Integer)])
    }

    fn collect(&mut self, _args: &MonitorArgs) -> Result<Vec<Measurement>, CollectorError> {
        let uptime = System::uptime();
        debug!("Uptime: {}s", uptime);
        Ok(vec![Measurement::new().with_value("uptime", uptime)])
    }
}

impl Default for UptimeCollector {
    fn default() -> Self {
        Self::new()
    }
}
