// Disk I/O metric collector
//
// Reads cumulative block device counters from /proc/diskstats and reports
// them together with per-second averages since boot.

use serde::Deserialize;
use sysinfo::System;
use tracing::debug;

use super::{parse_args, Collector, CollectorError, MonitorArgs};
use crate::measurement::{round2, schema_of, FieldType, Measurement, Schema};

const DISKSTATS_PATH: &str = "/proc/diskstats";

/// /proc/diskstats always counts in 512-byte sectors
const SECTOR_SIZE: u64 = 512;

#[derive(Debug, Default, Deserialize)]
struct DiskIoArgs {
    /// Device names to report (e.g. "sda"); empty reports every device
    #[serde(default)]
    disks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct DiskCounters {
    name: String,
    reads: u64,
    read_bytes: u64,
    writes: u64,
    write_bytes: u64,
}

pub struct DiskIoCollector;

impl DiskIoCollector {
    pub fn new() -> Self {
        DiskIoCollector
    }
}

fn parse_diskstats(text: &str) -> Result<Vec<DiskCounters>, CollectorError> {
    let mut disks = Vec::new();

    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() < 10 {
            return Err(CollectorError::parse(
                DISKSTATS_PATH,
                format!("expected at least 10 columns in '{}'", line.trim()),
            ));
        }

        let num = |idx: usize| -> Result<u64, CollectorError> {
            fields[idx].parse().map_err(|_| {
                CollectorError::parse(DISKSTATS_PATH, format!("bad counter '{}'", fields[idx]))
            })
        };

        // major minor name reads merged sectors ms writes merged sectors ...
        disks.push(DiskCounters {
            name: fields[2].to_string(),
            reads: num(3)?,
            read_bytes: num(5)? * SECTOR_SIZE,
            writes: num(7)?,
            write_bytes: num(9)? * SECTOR_SIZE,
        });
    }

    Ok(disks)
}

fn per(total: u64, over: u64) -> f64 {
    if over == 0 {
        0.0
    } else {
        round2(total as f64 / over as f64)
    }
}

fn build_measurement(disk: &DiskCounters, uptime: u64) -> Measurement {
    Measurement::new()
        .with_tag("disk", disk.name.as_str())
        .with_value("reads", disk.reads)
        .with_value("writes", disk.writes)
        .with_value("read", disk.read_bytes)
        .with_value("written", disk.write_bytes)
        .with_value("reads_ps", per(disk.reads, uptime))
        .with_value("writes_ps", per(disk.writes, uptime))
        .with_value("read_ps", per(disk.read_bytes, uptime))
        .with_value("write_ps", per(disk.write_bytes, uptime))
        .with_value("read_size", per(disk.read_bytes, disk.reads))
        .with_value("write_size", per(disk.write_bytes, disk.writes))
}

impl Collector for DiskIoCollector {
    fn name(&self) -> &str {
        "diskio"
    }

    fn mapping(&self) -> Schema {
        schema_of(&[
            ("disk", FieldType::Keyword),
            ("reads_ps", FieldType::Double),
            ("writes_ps", FieldType::Double),
            ("read_ps", FieldType::Double),
            ("write_ps", FieldType::Double),
            ("reads", FieldType::Long),
            ("writes", FieldType::Long),
            ("read", FieldType::Long),
            ("written", FieldType::Long),
            ("read_size", FieldType::Double),
            ("write_size", FieldType::Double),
        ])
    }

    fn collect(&mut self, args: &MonitorArgs) -> Result<Vec<Measurement>, CollectorError> {
        let args: DiskIoArgs = parse_args(args)?;

        let text = std::fs::read_to_string(DISKSTATS_PATH)
            .map_err(|e| CollectorError::read(DISKSTATS_PATH, e))?;
        let uptime = System::uptime();

        let measurements: Vec<Measurement> = parse_diskstats(&text)?
            .iter()
            .filter(|d| args.disks.is_empty() || args.disks.contains(&d.name))
            .map(|d| build_measurement(d, uptime))
            .collect();

        debug!("Collected I/O counters for {} disk(s)", measurements.len());
        Ok(measurements)
    }
}

impl Default for DiskIoCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::FieldValue;

    const FIXTURE: &str = "\
   8       0 sda 1000 10 20000 500 400 5 8000 300 0 700 800 0 0 0 0
   8       1 sda1 0 0 0 0 0 0 0 0 0 0 0
 259       0 nvme0n1 200 0 4000 10 100 0 1000 20 0 30 30
";

    #[test]
    fn test_parse_diskstats() {
        let disks = parse_diskstats(FIXTURE).unwrap();
        assert_eq!(disks.len(), 3);
        assert_eq!(
            disks[0],
            DiskCounters {
                name: "sda".to_string(),
                reads: 1000,
                read_bytes: 20000 * 512,
                writes: 400,
                write_bytes: 8000 * 512,
            }
        );
        assert_eq!(disks[2].name, "nvme0n1");
    }

    #[test]
    fn test_parse_rejects_short_line() {
        assert!(parse_diskstats("8 0 sda 1 2\n").is_err());
    }

    #[test]
    fn test_rates_over_uptime() {
        let disks = parse_diskstats(FIXTURE).unwrap();
        let m = build_measurement(&disks[0], 100);

        assert_eq!(m.tag("disk"), Some("sda"));
        assert_eq!(m.value("reads_ps"), Some(&FieldValue::Float(10.0)));
        assert_eq!(m.value("writes_ps"), Some(&FieldValue::Float(4.0)));
        assert_eq!(m.value("read_size"), Some(&FieldValue::Float(10240.0)));
        assert_eq!(m.value("write_size"), Some(&FieldValue::Float(10240.0)));
    }

    #[test]
    fn test_idle_device_has_zero_sizes() {
        let disks = parse_diskstats(FIXTURE).unwrap();
        let m = build_measurement(&disks[1], 100);
        assert_eq!(m.value("read_size"), Some(&FieldValue::Float(0.0)));
        assert_eq!(m.value("write_size"), Some(&FieldValue::Float(0.0)));
    }
}
