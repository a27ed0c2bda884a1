// Network interface collector
//
// Parses /proc/net/dev. Counters are reported as-is; traffic rates are
// derived from the counters remembered by the previous invocation of the
// same collector instance.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

use super::{parse_args, Collector, CollectorError, MonitorArgs};
use crate::measurement::{schema_of, FieldType, Measurement, Schema};

const NET_DEV_PATH: &str = "/proc/net/dev";

#[derive(Debug, Default, Deserialize)]
struct InterfaceArgs {
    /// Interfaces to report; empty reports every interface
    #[serde(default)]
    interfaces: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IfCounters {
    rx_bytes: u64,
    rx_packets: u64,
    tx_bytes: u64,
    tx_packets: u64,
}

/// Interface statistics collector
///
/// Holds the last seen counters per interface so the second and later
/// invocations can report per-second traffic.
pub struct InterfaceCollector {
    previous: HashMap<String, (IfCounters, Instant)>,
}

impl InterfaceCollector {
    pub fn new() -> Self {
        InterfaceCollector {
            previous: HashMap::new(),
        }
    }

    fn sample(
        &mut self,
        text: &str,
        now: Instant,
        only: &[String],
    ) -> Result<Vec<Measurement>, CollectorError> {
        let mut measurements = Vec::new();

        for (iface, counters) in parse_net_dev(text)? {
            if !only.is_empty() && !only.contains(&iface) {
                continue;
            }

            let mut m = Measurement::new()
                .with_tag("iface", iface.as_str())
                .with_value("rx_bytes", counters.rx_bytes)
                .with_value("tx_bytes", counters.tx_bytes)
                .with_value("rx_packets", counters.rx_packets)
                .with_value("tx_packets", counters.tx_packets);

            if let Some((prev, at)) = self.previous.get(&iface) {
                let elapsed = now.duration_since(*at).as_secs_f64();
                if elapsed > 0.0 {
                    let rate = |cur: u64, old: u64| {
                        cur.checked_sub(old).map(|d| (d as f64 / elapsed).round() as i64)
                    };
                    // A counter going backwards means a reset or wrap
                    if let (Some(rx), Some(tx), Some(rxp), Some(txp)) = (
                        rate(counters.rx_bytes, prev.rx_bytes),
                        rate(counters.tx_bytes, prev.tx_bytes),
                        rate(counters.rx_packets, prev.rx_packets),
                        rate(counters.tx_packets, prev.tx_packets),
                    ) {
                        m.set_value("rx_traffic", rx);
                        m.set_value("tx_traffic", tx);
                        m.set_value("rx_packetcnt", rxp);
                        m.set_value("tx_packetcnt", txp);
                    }
                }
            }

            self.previous.insert(iface, (counters, now));
            measurements.push(m);
        }

        Ok(measurements)
    }
}

fn parse_net_dev(text: &str) -> Result<Vec<(String, IfCounters)>, CollectorError> {
    let mut result = Vec::new();

    // Two header lines precede the interfaces
    for line in text.lines().skip(2) {
        if line.trim().is_empty() {
            continue;
        }
        let (name, rest) = line
            .split_once(':')
            .ok_or_else(|| CollectorError::parse(NET_DEV_PATH, format!("malformed line '{}'", line)))?;

        let fields = rest
            .split_whitespace()
            .map(|f| f.parse::<u64>())
            .collect::<Result<Vec<u64>, _>>()
            .map_err(|e| CollectorError::parse(NET_DEV_PATH, e.to_string()))?;
        if fields.len() < 16 {
            return Err(CollectorError::parse(
                NET_DEV_PATH,
                format!("expected 16 counters for '{}'", name.trim()),
            ));
        }

        result.push((
            name.trim().to_string(),
            IfCounters {
                rx_bytes: fields[0],
                rx_packets: fields[1],
                tx_bytes: fields[8],
                tx_packets: fields[9],
            },
        ));
    }

    Ok(result)
}

impl Collector for InterfaceCollector {
    fn name(&self) -> &str {
        "ifstats"
    }

    fn mapping(&self) -> Schema {
        schema_of(&[
            ("iface", FieldType::Keyword),
            ("rx_bytes", FieldType::Long),
            ("tx_bytes", FieldType::Long),
            ("rx_packets", FieldType::Long),
            ("tx_packets", FieldType::Long),
            ("rx_traffic", FieldType::Long),
            ("tx_traffic", FieldType::Long),
            ("rx_packetcnt", FieldType::Long),
            ("tx_packetcnt", FieldType::Long),
        ])
    }

    fn collect(&mut self, args: &MonitorArgs) -> Result<Vec<Measurement>, CollectorError> {
        let args: InterfaceArgs = parse_args(args)?;
        let text = std::fs::read_to_string(NET_DEV_PATH)
            .map_err(|e| CollectorError::read(NET_DEV_PATH, e))?;

        let measurements = self.sample(&text, Instant::now(), &args.interfaces)?;
        debug!("Collected stats for {} interface(s)", measurements.len());
        Ok(measurements)
    }
}

impl Default for InterfaceCollector {
    fn default() -> Self {
        Self::new()
    }
}
