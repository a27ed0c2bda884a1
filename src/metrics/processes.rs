// Process count collector
//
// Scans /proc/<pid>/stat and splits the process table into user processes
// (with their thread count) and kernel threads.

use tracing::debug;

use super::{Collector, CollectorError, MonitorArgs};
use crate::measurement::{schema_of, FieldType, Measurement, Schema};

const PROC_PATH: &str = "/proc";

/// Kernel threads are children of kthreadd
const KTHREADD_PID: u32 = 2;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ProcessCounts {
    procs: u64,
    threads: u64,
    kthreads: u64,
}

impl ProcessCounts {
    fn add(&mut self, stat: &StatLine) {
        if stat.ppid == KTHREADD_PID {
            self.kthreads += 1;
        } else {
            self.procs += 1;
            self.threads += stat.num_threads;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatLine {
    ppid: u32,
    num_threads: u64,
}

/// Parses the fields we need out of one /proc/<pid>/stat line
///
/// The command name is parenthesised and may itself contain spaces and
/// parentheses, so fields are counted from the last `)`.
fn parse_stat(line: &str) -> Option<StatLine> {
    let rest = &line[line.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // fields[0] is the state (stat field 3)
    Some(StatLine {
        ppid: fields.get(1)?.parse().ok()?,
        num_threads: fields.get(17)?.parse().ok()?,
    })
}

pub struct ProcessCollector;

impl ProcessCollector {
    pub fn new() -> Self {
        ProcessCollector
    }
}

impl Collector for ProcessCollector {
    fn name(&self) -> &str {
        "procs"
    }

    fn mapping(&self) -> Schema {
        schema_of(&[
            ("procs", FieldType::Integer),
            ("threads", FieldType::Integer),
            ("kthreads", FieldType::Integer),
        ])
    }

    fn collect(&mut self, _args: &MonitorArgs) -> Result<Vec<Measurement>, CollectorError> {
        let entries =
            std::fs::read_dir(PROC_PATH).map_err(|e| CollectorError::read(PROC_PATH, e))?;

        let mut counts = ProcessCounts::default();
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(pid) = file_name.to_str() else {
                continue;
            };
            if !pid.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }

            let path = entry.path().join("stat");
            // Processes routinely exit between listing and reading
            let line = match std::fs::read_to_string(&path) {
                Ok(line) => line,
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            match parse_stat(&line) {
                Some(stat) => counts.add(&stat),
                None => debug!("Unparseable stat line in {}", path.display()),
            }
        }

        debug!(
            "Processes: {} ({} threads), kernel threads: {}",
            counts.procs, counts.threads, counts.kthreads
        );

        Ok(vec![Measurement::new()
            .with_value("procs", counts.procs)
            .with_value("threads", counts.threads)
            .with_value("kthreads", counts.kthreads)])
    }
}

impl Default for ProcessCollector {
    fn default() -> Self {
        Self::new()
    }
}
