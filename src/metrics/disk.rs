// Disk space metric collector
//
// Collects space and inode usage for the configured filesystems via statvfs

use serde::Deserialize;
use tracing::{debug, warn};

use super::{parse_args, Collector, CollectorError, MonitorArgs};
use crate::measurement::{ratio, schema_of, FieldType, Measurement, Schema};

#[derive(Debug, Default, Deserialize)]
struct DiskSpaceArgs {
    /// Mount points to report, e.g. ["/", "/home"]
    #[serde(default)]
    filesystems: Vec<String>,
}

/// Raw figures for one filesystem
#[derive(Debug, Clone, Copy, PartialEq)]
struct FsStats {
    block_size: u64,
    blocks: u64,
    blocks_avail: u64,
    files: u64,
    files_avail: u64,
}

/// Disk space metric collector
///
/// One measurement per configured filesystem, tagged with `fs`. A
/// filesystem that cannot be read is logged and left out.
///
/// # What is Collected
/// - `disksize`, `diskfree`, `diskused` in bytes; free space is what an
///   unprivileged user can still allocate
/// - `diskpctused` / `diskpctfree` as fractions of the total size
/// - inode totals and their usage fractions
pub struct DiskSpaceCollector;

impl DiskSpaceCollector {
    /// Creates a new DiskSpaceCollector instance
    pub fn new() -> Self {
        DiskSpaceCollector
    }
}

fn statvfs(path: &str) -> Result<FsStats, CollectorError> {
    let stat = nix::sys::statvfs::statvfs(path)
        .map_err(|errno| CollectorError::read(path, std::io::Error::from(errno)))?;

    Ok(FsStats {
        block_size: stat.fragment_size() as u64,
        blocks: stat.blocks() as u64,
        blocks_avail: stat.blocks_available() as u64,
        files: stat.files() as u64,
        files_avail: stat.files_available() as u64,
    })
}

fn build_measurement(fs: &str, stats: FsStats) -> Measurement {
    let disksize = stats.blocks * stats.block_size;
    let diskfree = stats.blocks_avail * stats.block_size;
    let diskused = disksize.saturating_sub(diskfree);
    let inodesused = stats.files.saturating_sub(stats.files_avail);

    Measurement::new()
        .with_tag("fs", fs)
        .with_value("disksize", disksize)
        .with_value("diskfree", diskfree)
        .with_value("diskused", diskused)
        .with_value("diskpctused", ratio(diskused, disksize))
        .with_value("diskpctfree", ratio(diskfree, disksize))
        .with_value("inodesmax", stats.files)
        .with_value("inodesfree", stats.files_avail)
        .with_value("inodesused", inodesused)
        .with_value("inodesused_pct", ratio(inodesused, stats.files))
        .with_value("inodesfree_pct", ratio(stats.files_avail, stats.files))
}

impl Collector for DiskSpaceCollector {
    fn name(&self) -> &str {
        "diskspace"
    }

    fn mapping(&self) -> Schema {
        schema_of(&[
            ("fs", FieldType::Keyword),
            ("disksize", FieldType::Long),
            ("diskfree", FieldType::Long),
            ("diskused", FieldType::Long),
            ("diskpctused", FieldType::Double),
            ("diskpctfree", FieldType::Double),
            ("inodesmax", FieldType::Long),
            ("inodesfree", FieldType::Long),
            ("inodesused", FieldType::Long),
            ("inodesused_pct", FieldType::Double),
            ("inodesfree_pct", FieldType::Double),
        ])
    }

    fn collect(&mut self, args: &MonitorArgs) -> Result<Vec<Measurement>, CollectorError> {
        let args: DiskSpaceArgs = parse_args(args)?;

        let mut measurements = Vec::with_capacity(args.filesystems.len());
        let mut first_error = None;
        for fs in &args.filesystems {
            match statvfs(fs) {
                Ok(stats) => {
                    let m = build_measurement(fs, stats);
                    debug!("Disk {}: {}", fs, m);
                    measurements.push(m);
                }
                Err(e) => {
                    warn!(fs = %fs, error = %e, "Skipping filesystem");
                    first_error.get_or_insert(e);
                }
            }
        }

        // Only an invocation where every filesystem failed is a failure
        match first_error {
            Some(e) if measurements.is_empty() => Err(e),
            _ => Ok(measurements),
        }
    }
}

impl Default for DiskSpaceCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::FieldValue;

    #[test]
    fn test_build_measurement() {
        let m = build_measurement(
            "/",
            FsStats {
                block_size: 4096,
                blocks: 100,
                blocks_avail: 25,
                files: 1000,
                files_avail: 900,
            },
        );

        assert_eq!(m.tag("fs"), Some("/"));
        assert_eq!(m.value("disksize"), Some(&FieldValue::Integer(409_600)));
        assert_eq!(m.value("diskfree"), Some(&FieldValue::Integer(102_400)));
        assert_eq!(m.value("diskused"), Some(&FieldValue::Integer(307_200)));
        assert_eq!(m.value("diskpctused"), Some(&FieldValue::Float(0.75)));
        assert_eq!(m.value("diskpctfree"), Some(&FieldValue::Float(0.25)));
        assert_eq!(m.value("inodesused"), Some(&FieldValue::Integer(100)));
        assert_eq!(m.value("inodesused_pct"), Some(&FieldValue::Float(0.1)));
        assert_eq!(m.value("inodesfree_pct"), Some(&FieldValue::Float(0.9)));
    }

    #[test]
    fn test_empty_filesystem_has_zero_ratios() {
        let m = build_measurement(
            "/proc",
            FsStats {
                block_size: 4096,
                blocks: 0,
                blocks_avail: 0,
                files: 0,
                files_avail: 0,
            },
        );
        assert_eq!(m.value("diskpctused"), Some(&FieldValue::Float(0.0)));
        assert_eq!(m.value("inodesfree_pct"), Some(&FieldValue::Float(0.0)));
    }

    #[test]
    fn test_collect_root() {
        let mut collector = DiskSpaceCollector::new();
        let args: MonitorArgs = serde_json::from_str(r#"{"filesystems": ["/"]}"#).unwrap();
        let measurements = collector.collect(&args).unwrap();
        assert_eq!(measurements.len(), 1);
        assert!(measurements[0].value("disksize").is_some());
    }

    #[test]
    fn test_unreadable_filesystem_is_skipped() {
        let mut collector = DiskSpaceCollector::new();
        let args: MonitorArgs = serde_json::from_str(
            r#"{"filesystems": ["/definitely/not/mounted/here", "/"]}"#,
        )
        .unwrap();
        let measurements = collector.collect(&args).unwrap();
        assert_eq!(measurements.len(), 1);
        assert_eq!(measurements[0].tag("fs"), Some("/"));
    }

    #[test]
    fn test_no_filesystems_configured() {
        let mut collector = DiskSpaceCollector::new();
        assert!(collector.collect(&MonitorArgs::new()).unwrap().is_empty());
    }

    #[test]
    fn test_missing_filesystem_fails() {
        let mut collector = DiskSpaceCollector::new();
        let args: MonitorArgs =
            serde_json::from_str(r#"{"filesystems": ["/definitely/not/mounted/here"]}"#).unwrap();
        assert!(matches!(
            collector.collect(&args),
            Err(CollectorError::Read { .. })
        ));
    }
}
