// InfluxDB backend - pure time-series store, no bucketing
//
// Speaks the InfluxDB 1.x HTTP API. Each measurement becomes one point in
// line protocol: the monitor type is the measurement name, tags are the
// tag set and values are the fields.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use std::fmt::Write as _;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info};

use super::{status_error, unavailable, Backend, BackendError};
use crate::config::InfluxConfig;
use crate::identity::TYPE_TAG;
use crate::measurement::{FieldValue, Measurement, Schema};

pub struct InfluxBackend {
    client: Client,
    base_url: String,
    config: InfluxConfig,
    /// Declared types, used to write integral fields with the `i` suffix
    schema: RwLock<Schema>,
}

impl InfluxBackend {
    pub fn new(config: InfluxConfig) -> Result<Self, BackendError> {
        let scheme = if config.ssl { "https" } else { "http" };
        let base_url = format!("{}://{}:{}", scheme, config.host, config.port);
        info!("InfluxDB backend at {}, database '{}'", base_url, config.database);

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| unavailable("building HTTP client", e))?;

        Ok(InfluxBackend {
            client,
            base_url,
            config,
            schema: RwLock::new(Schema::new()),
        })
    }

    fn auth_params(&self) -> Vec<(&str, &str)> {
        let mut params = Vec::new();
        if let Some(user) = &self.config.user {
            params.push(("u", user.as_str()));
        }
        if let Some(password) = &self.config.password {
            params.push(("p", password.as_str()));
        }
        params
    }
}

fn escape_key(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_string_field(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Renders one measurement as a line protocol point
///
/// Fields declared integral in the schema are written as integers even if
/// a collector produced a float, so the series type never flips.
pub(crate) fn encode_line(measurement: &Measurement, schema: &Schema) -> Result<String, BackendError> {
    if measurement.is_empty() {
        return Err(BackendError::WriteRejected(
            "measurement has no fields".to_string(),
        ));
    }

    let name = measurement.tag(TYPE_TAG).unwrap_or("monitor");
    let mut line = escape_measurement(name);

    for (k, v) in measurement.tags() {
        if v.is_empty() {
            continue;
        }
        let _ = write!(line, ",{}={}", escape_key(k), escape_key(v));
    }

    let mut first = true;
    for (k, v) in measurement.values() {
        line.push(if first { ' ' } else { ',' });
        first = false;

        let integral = schema.get(k).map(|t| t.is_integral()).unwrap_or(false);
        let rendered = match v {
            FieldValue::Integer(i) => format!("{}i", i),
            FieldValue::Float(f) if integral => format!("{}i", f.round() as i64),
            FieldValue::Float(f) => {
                if f.is_finite() {
                    format!("{}", f)
                } else {
                    return Err(BackendError::WriteRejected(format!(
                        "field '{}' is not a finite number",
                        k
                    )));
                }
            }
            FieldValue::Text(s) => format!("\"{}\"", escape_string_field(s)),
        };
        let _ = write!(line, "{}={}", escape_key(k), rendered);
    }

    let at = measurement.timestamp().unwrap_or_else(Utc::now);
    let nanos = at
        .timestamp_nanos_opt()
        .ok_or_else(|| BackendError::WriteRejected(format!("timestamp {} out of range", at)))?;
    let _ = write!(line, " {}", nanos);

    Ok(line)
}

#[async_trait]
impl Backend for InfluxBackend {
    fn kind(&self) -> &'static str {
        "influxdb"
    }

    async fn prepare(&self, schema: &Schema) -> Result<(), BackendError> {
        let resp = self
            .client
            .get(format!("{}/ping", self.base_url))
            .send()
            .await
            .map_err(|e| unavailable("ping", e))?;
        if !resp.status().is_success() {
            return Err(BackendError::Unavailable(format!(
                "ping returned {}",
                resp.status()
            )));
        }

        let mut stored = self
            .schema
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *stored = schema.clone();
        info!("Prepared {} declared field type(s)", stored.len());
        Ok(())
    }

    async fn connect(&self) -> Result<(), BackendError> {
        // CREATE DATABASE is a no-op when the database already exists
        let query = format!("CREATE DATABASE \"{}\"", self.config.database);
        let resp = self
            .client
            .post(format!("{}/query", self.base_url))
            .query(&self.auth_params())
            .form(&[("q", query.as_str())])
            .send()
            .await
            .map_err(|e| unavailable("database creation", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Unavailable(format!(
                "database creation returned {}: {}",
                status,
                body.trim()
            )));
        }

        info!("Connected to InfluxDB database '{}'", self.config.database);
        Ok(())
    }

    async fn write(&self, measurement: Measurement) -> Result<(), BackendError> {
        let line = {
            let schema = self
                .schema
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            encode_line(&measurement, &schema)?
        };
        debug!("Writing point {}", line);

        let mut params = self.auth_params();
        params.push(("db", self.config.database.as_str()));
        params.push(("precision", "ns"));

        let resp = self
            .client
            .post(format!("{}/write", self.base_url))
            .query(&params)
            .body(line)
            .send()
            .await
            .map_err(|e| unavailable("write", e))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(status_error("write", status, &body))
        }
    }
}
