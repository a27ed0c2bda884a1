// Measurement module - the uniform value type produced by every monitor
//
// A measurement carries:
// 1. Values: the quantitative payload (integers, floats, strings)
// 2. Tags: classification metadata (filesystem, interface, hostname, ...)
// 3. A timestamp, stamped by host-identity enrichment only
//
// It also defines the field-type mapping each collector declares so that
// backends can prepare storage before the first write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single scalar in a measurement's value set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Integer(v as i64)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Integer(v as i64)
    }
}

impl From<u64> for FieldValue {
    /// Counters above `i64::MAX` saturate
    fn from(v: u64) -> Self {
        FieldValue::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<usize> for FieldValue {
    fn from(v: usize) -> Self {
        FieldValue::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

/// One observation produced by a collector
///
/// Value keys and tag keys never overlap: inserting a key on one side
/// removes it from the other. The timestamp cannot be set by collectors;
/// it is stamped once by [`crate::identity::HostIdentity::enrich`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurement {
    values: BTreeMap<String, FieldValue>,
    tags: BTreeMap<String, String>,
    timestamp: Option<DateTime<Utc>>,
}

impl Measurement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style value insertion
    ///
    /// # Example
    /// ```ignore
    /// let m = Measurement::new()
    ///     .with_value("uptime", 3600u64)
    ///     .with_tag("fs", "/");
    /// ```
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set_value(key, value);
        self
    }

    /// Builder-style tag insertion
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_tag(key, value);
        self
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        let key = key.into();
        self.tags.remove(&key);
        self.values.insert(key, value.into());
    }

    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.values.remove(&key);
        self.tags.insert(key, value.into());
    }

    #[cfg(test)]
    pub fn value(&self, key: &str) -> Option<&FieldValue> {
        self.values.get(key)
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn values(&self) -> &BTreeMap<String, FieldValue> {
        &self.values
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Stamps the timestamp unless one is already present
    pub(crate) fn stamp(&mut self, at: DateTime<Utc>) {
        if self.timestamp.is_none() {
            self.timestamp = Some(at);
        }
    }

    /// Returns true if the measurement carries no values at all
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Measurement{{")?;
        let mut first = true;
        for (k, v) in &self.values {
            if !first {
                write!(f, ",")?;
            }
            first = false;
            write!(f, "{}={}", k, v)?;
        }
        for (k, v) in &self.tags {
            if !first {
                write!(f, ",")?;
            }
            first = false;
            write!(f, "{}={}", k, v)?;
        }
        write!(f, "}}>")
    }
}

/// Storage type a collector declares for one of its fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Long,
    Integer,
    Double,
    Keyword,
    Text,
    Ip,
    Date,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Long => "long",
            FieldType::Integer => "integer",
            FieldType::Double => "double",
            FieldType::Keyword => "keyword",
            FieldType::Text => "text",
            FieldType::Ip => "ip",
            FieldType::Date => "date",
        }
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, FieldType::Long | FieldType::Integer)
    }
}

/// Field name to storage type mapping handed to `Backend::prepare`
pub type Schema = BTreeMap<String, FieldType>;

/// Builds a schema fragment from a static list of declarations
pub fn schema_of(fields: &[(&str, FieldType)]) -> Schema {
    fields
        .iter()
        .map(|(name, ty)| (name.to_string(), *ty))
        .collect()
}

/// Merges schema fragments in order; on key collision the later fragment wins
pub fn merge_schemas<'a, I>(fragments: I) -> Schema
where
    I: IntoIterator<Item = &'a Schema>,
{
    let mut merged = Schema::new();
    for fragment in fragments {
        for (name, ty) in fragment {
            merged.insert(name.clone(), *ty);
        }
    }
    merged
}

/// Rounds a ratio to two decimals, matching how percentages are reported
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Ratio of `part` to `total`, 0 when the total is 0
pub fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        round2(part as f64 / total as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_and_tags_stay_disjoint() {
        let mut m = Measurement::new().with_value("fs", "/").with_value("diskfree", 10u64);
        m.set_tag("fs", "/");
        assert!(m.value("fs").is_none());
        assert_eq!(m.tag("fs"), Some("/"));

        m.set_value("fs", 1i64);
        assert!(m.tag("fs").is_none());
        assert_eq!(m.value("fs"), Some(&FieldValue::Integer(1)));
    }

    #[test]
    fn test_stamp_only_once() {
        let mut m = Measurement::new();
        let first = DateTime::parse_from_rfc3339("2024-01-15T10:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let second = DateTime::parse_from_rfc3339("2024-01-16T10:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        m.stamp(first);
        m.stamp(second);
        assert_eq!(m.timestamp(), Some(first));
    }

    #[test]
    fn test_merge_later_fragment_wins() {
        let a = schema_of(&[("shared", FieldType::Long), ("a_only", FieldType::Double)]);
        let b = schema_of(&[("shared", FieldType::Keyword), ("b_only", FieldType::Integer)]);

        let merged = merge_schemas([&a, &b]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged["shared"], FieldType::Keyword);
        assert_eq!(merged["a_only"], FieldType::Double);
        assert_eq!(merged["b_only"], FieldType::Integer);

        let reversed = merge_schemas([&b, &a]);
        assert_eq!(reversed["shared"], FieldType::Long);
    }

    #[test]
    fn test_u64_saturates() {
        assert_eq!(FieldValue::from(u64::MAX), FieldValue::Integer(i64::MAX));
    }

    #[test]
    fn test_ratio_handles_zero_total() {
        assert_eq!(ratio(5, 0), 0.0);
        assert_eq!(ratio(1, 3), 0.33);
    }

    #[test]
    fn test_display() {
        let m = Measurement::new().with_value("uptime", 5i64).with_tag("type", "uptime");
        assert_eq!(m.to_string(), "<Measurement{uptime=5,type=uptime}>");
    }

    #[test]
    fn test_field_type_serializes_lowercase() {
        let json = serde_json::to_string(&FieldType::Keyword).unwrap();
        assert_eq!(json, "\"keyword\"");
    }
}
