// Memory metric collector
//
// Parses /proc/meminfo into byte counts and derives usage ratios for RAM
// (with and without page cache) and swap.

use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

use super::{parse_args, Collector, CollectorError, MonitorArgs};
use crate::measurement::{ratio, round2, schema_of, FieldType, Measurement, Schema};

const MEMINFO_PATH: &str = "/proc/meminfo";

const DEFAULT_WHITELIST: &[&str] = &[
    "swaptotal",
    "swapfree",
    "swapcached",
    "memtotal",
    "memfree",
    "cached",
    "active",
    "inactive",
];

#[derive(Debug, Default, Deserialize)]
struct MemoryArgs {
    /// Normalized meminfo keys to report; empty means the default set
    #[serde(default)]
    whitelist: Vec<String>,
}

/// Memory usage collector
///
/// Every `/proc/meminfo` key is normalized by lowercasing and dropping
/// anything that is not a letter (`Active(anon)` becomes `activeanon`).
/// Values are reported in bytes.
pub struct MemoryCollector;

impl MemoryCollector {
    /// Creates a new MemoryCollector instance
    pub fn new() -> Self {
        MemoryCollector
    }
}

/// Parses meminfo text into normalized key → bytes
fn parse_meminfo(text: &str) -> Result<BTreeMap<String, u64>, CollectorError> {
    let mut result = BTreeMap::new();

    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let (key, rest) = line
            .split_once(':')
            .ok_or_else(|| CollectorError::parse(MEMINFO_PATH, format!("malformed line '{}'", line)))?;

        let mut parts = rest.split_whitespace();
        let value: u64 = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| CollectorError::parse(MEMINFO_PATH, format!("no value in '{}'", line)))?;

        let value = match parts.next() {
            None => value,
            Some("kB") => value * 1024,
            Some(unit) => {
                return Err(CollectorError::parse(
                    MEMINFO_PATH,
                    format!("unknown unit '{}'", unit),
                ))
            }
        };

        let name: String = key
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        result.insert(name, value);
    }

    Ok(result)
}

/// Builds the measurement from parsed meminfo
///
/// Ratios are computed from the full parse so they are available whatever
/// the whitelist says.
fn build_measurement(
    parsed: &BTreeMap<String, u64>,
    whitelist: &[String],
) -> Result<Measurement, CollectorError> {
    let get = |key: &str| {
        parsed
            .get(key)
            .copied()
            .ok_or_else(|| CollectorError::parse(MEMINFO_PATH, format!("missing '{}'", key)))
    };

    let mut m = Measurement::new();

    if whitelist.is_empty() {
        for key in DEFAULT_WHITELIST {
            if let Some(v) = parsed.get(*key) {
                m.set_value(*key, *v);
            }
        }
    } else {
        for key in whitelist {
            if let Some(v) = parsed.get(key) {
                m.set_value(key.as_str(), *v);
            }
        }
    }

    let memtotal = get("memtotal")?;
    let memfree = get("memfree")?;
    let cached = parsed.get("cached").copied().unwrap_or(0);
    let swaptotal = parsed.get("swaptotal").copied().unwrap_or(0);
    let swapfree = parsed.get("swapfree").copied().unwrap_or(0);

    let mem_used = ratio(memtotal.saturating_sub(memfree), memtotal);
    let mem_used_nocache = ratio(
        memtotal.saturating_sub(memfree).saturating_sub(cached),
        memtotal,
    );
    let swap_used = ratio(swaptotal.saturating_sub(swapfree), swaptotal);

    m.set_value("mempctused", mem_used);
    m.set_value("mempctfree", round2(1.0 - mem_used));
    m.set_value("mempctused_nocache", mem_used_nocache);
    m.set_value("mempctfree_nocache", round2(1.0 - mem_used_nocache));
    m.set_value("swappctused", swap_used);
    m.set_value(
        "swappctfree",
        if swaptotal == 0 { 0.0 } else { round2(1.0 - swap_used) },
    );

    Ok(m)
}

impl Collector for MemoryCollector {
    fn name(&self) -> &str {
        "meminfo"
    }

    fn mapping(&self) -> Schema {
        schema_of(&[
            ("swaptotal", FieldType::Long),
            ("swapfree", FieldType::Long),
            ("swapcached", FieldType::Long),
            ("memtotal", FieldType::Long),
            ("memfree", FieldType::Long),
            ("memavailable", FieldType::Long),
            ("cached", FieldType::Long),
            ("active", FieldType::Long),
            ("inactive", FieldType::Long),
            ("mempctused", FieldType::Double),
            ("mempctfree", FieldType::Double),
            ("mempctused_nocache", FieldType::Double),
            ("mempctfree_nocache", FieldType::Double),
            ("swappctused", FieldType::Double),
            ("swappctfree", FieldType::Double),
        ])
    }

    fn collect(&mut self, args: &MonitorArgs) -> Result<Vec<Measurement>, CollectorError> {
        let args: MemoryArgs = parse_args(args)?;

        let text = std::fs::read_to_string(MEMINFO_PATH)
            .map_err(|e| CollectorError::read(MEMINFO_PATH, e))?;
        let parsed = parse_meminfo(&text)?;
        let m = build_measurement(&parsed, &args.whitelist)?;

        debug!("Memory: {}", m);
        Ok(vec![m])
    }
}

impl Default for MemoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::FieldValue;

    const FIXTURE: &str = "\
MemTotal:        1000 kB
MemFree:          250 kB
MemAvailable:     600 kB
Buffers:           10 kB
Cached:           250 kB
SwapCached:         0 kB
Active:           300 kB
Inactive:         200 kB
Active(anon):     100 kB
SwapTotal:        400 kB
SwapFree:         300 kB
HugePages_Total:    0
";

    #[test]
    fn test_parse_normalizes_keys_and_units() {
        let parsed = parse_meminfo(FIXTURE).unwrap();
        assert_eq!(parsed["memtotal"], 1000 * 1024);
        assert_eq!(parsed["activeanon"], 100 * 1024);
        assert_eq!(parsed["hugepagestotal"], 0);
    }

    #[test]
    fn test_parse_rejects_unknown_unit() {
        assert!(parse_meminfo("MemTotal: 5 MB\n").is_err());
    }

    #[test]
    fn test_default_whitelist_and_ratios() {
        let parsed = parse_meminfo(FIXTURE).unwrap();
        let m = build_measurement(&parsed, &[]).unwrap();

        assert_eq!(m.value("memtotal"), Some(&FieldValue::Integer(1000 * 1024)));
        assert!(m.value("memavailable").is_none());
        assert!(m.value("activeanon").is_none());

        assert_eq!(m.value("mempctused"), Some(&FieldValue::Float(0.75)));
        assert_eq!(m.value("mempctfree"), Some(&FieldValue::Float(0.25)));
        assert_eq!(m.value("mempctused_nocache"), Some(&FieldValue::Float(0.5)));
        assert_eq!(m.value("mempctfree_nocache"), Some(&FieldValue::Float(0.5)));
        assert_eq!(m.value("swappctused"), Some(&FieldValue::Float(0.25)));
        assert_eq!(m.value("swappctfree"), Some(&FieldValue::Float(0.75)));
    }

    #[test]
    fn test_custom_whitelist_keeps_ratios() {
        let parsed = parse_meminfo(FIXTURE).unwrap();
        let m = build_measurement(&parsed, &["memavailable".to_string()]).unwrap();
        assert!(m.value("memavailable").is_some());
        assert!(m.value("memtotal").is_none());
        assert!(m.value("mempctused").is_some());
    }

    #[test]
    fn test_no_swap() {
        let parsed = parse_meminfo("MemTotal: 100 kB\nMemFree: 50 kB\nSwapTotal: 0 kB\nSwapFree: 0 kB\n").unwrap();
        let m = build_measurement(&parsed, &[]).unwrap();
        assert_eq!(m.value("swappctused"), Some(&FieldValue::Float(0.0)));
        assert_eq!(m.value("swappctfree"), Some(&FieldValue::Float(0.0)));
    }

    #[test]
    fn test_missing_memtotal_is_an_error() {
        let parsed = parse_meminfo("MemFree: 50 kB\n").unwrap();
        assert!(build_measurement(&parsed, &[]).is_err());
    }
}
