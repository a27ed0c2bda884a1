// Elasticsearch backend - document index with daily buckets
//
// prepare: installs an index template covering every `<prefix>-*` index
// connect: checks the cluster answers and opens today's index
// write:   rolls the index over when the date changes, then indexes the
//          measurement as one JSON document

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::bucket::{CreateOutcome, DailyBuckets};
use super::{status_error, unavailable, Backend, BackendError};
use crate::config::ElasticsearchConfig;
use crate::identity::{HOSTNAME_RAW_TAG, HOSTNAME_TAG, IPADDR_TAG, TYPE_TAG};
use crate::measurement::{FieldType, Measurement, Schema};

const TIMESTAMP_FIELD: &str = "@timestamp";
const RAW_SUFFIX: &str = "_raw";

/// The slice of the Elasticsearch REST API this backend needs
#[async_trait]
pub trait IndexApi: Send + Sync {
    async fn ping(&self) -> Result<(), BackendError>;

    async fn put_template(&self, name: &str, body: &Value) -> Result<(), BackendError>;

    async fn index_exists(&self, index: &str) -> Result<bool, BackendError>;

    /// Creates an index; an index that already exists is not an error
    async fn create_index(&self, index: &str) -> Result<CreateOutcome, BackendError>;

    async fn index_document(&self, index: &str, document: &Value) -> Result<(), BackendError>;
}

/// `IndexApi` over HTTP with reqwest
pub struct HttpIndexApi {
    client: Client,
    base_url: String,
}

impl HttpIndexApi {
    pub fn new(base_url: &str) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| unavailable("building HTTP client", e))?;
        Ok(HttpIndexApi {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

/// Interprets the answer to an index creation request
fn classify_create(status: StatusCode, body: &str) -> Result<CreateOutcome, BackendError> {
    if status.is_success() {
        Ok(CreateOutcome::Created)
    } else if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception") {
        Ok(CreateOutcome::AlreadyExists)
    } else {
        Err(BackendError::Unavailable(format!(
            "index creation returned {}: {}",
            status,
            body.trim()
        )))
    }
}

#[async_trait]
impl IndexApi for HttpIndexApi {
    async fn ping(&self) -> Result<(), BackendError> {
        let resp = self
            .client
            .get(self.url(""))
            .send()
            .await
            .map_err(|e| unavailable("cluster ping", e))?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(BackendError::Unavailable(format!(
                "cluster ping returned {}: {}",
                status,
                body.trim()
            )))
        }
    }

    async fn put_template(&self, name: &str, body: &Value) -> Result<(), BackendError> {
        let resp = self
            .client
            .put(self.url(&format!("_index_template/{}", name)))
            .json(body)
            .send()
            .await
            .map_err(|e| unavailable("template upload", e))?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(BackendError::Unavailable(format!(
                "template upload returned {}: {}",
                status,
                body.trim()
            )))
        }
    }

    async fn index_exists(&self, index: &str) -> Result<bool, BackendError> {
        let resp = self
            .client
            .head(self.url(index))
            .send()
            .await
            .map_err(|e| unavailable("index lookup", e))?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(BackendError::Unavailable(format!("index lookup returned {}", s))),
        }
    }

    async fn create_index(&self, index: &str) -> Result<CreateOutcome, BackendError> {
        let resp = self
            .client
            .put(self.url(index))
            .send()
            .await
            .map_err(|e| unavailable("index creation", e))?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        classify_create(status, &body)
    }

    async fn index_document(&self, index: &str, document: &Value) -> Result<(), BackendError> {
        let resp = self
            .client
            .post(self.url(&format!("{}/_doc", index)))
            .json(document)
            .send()
            .await
            .map_err(|e| unavailable("indexing", e))?;
        let status = resp.status();
        if status.is_success() {
            if let Ok(body) = resp.json::<Value>().await {
                debug!("Indexed document {} in {}", body["_id"], index);
            }
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(status_error("indexing", status, &body))
        }
    }
}

/// Document-store backend writing into daily Elasticsearch indices
pub struct ElasticsearchBackend {
    api: Box<dyn IndexApi>,
    buckets: DailyBuckets,
    shards: u32,
    replicas: Option<u32>,
}

impl ElasticsearchBackend {
    pub fn new(config: ElasticsearchConfig) -> Result<Self, BackendError> {
        info!("Elasticsearch backend at {}", config.url);
        let api = HttpIndexApi::new(&config.url)?;
        Ok(Self::with_api(
            Box::new(api),
            &config.index_prefix,
            config.shards,
            config.replicas,
        ))
    }

    pub fn with_api(
        api: Box<dyn IndexApi>,
        index_prefix: &str,
        shards: u32,
        replicas: Option<u32>,
    ) -> Self {
        ElasticsearchBackend {
            api,
            buckets: DailyBuckets::new(index_prefix),
            shards,
            replicas,
        }
    }

    /// Index template body for the merged schema
    fn template(&self, schema: &Schema) -> Value {
        let mut properties = Map::new();
        for (name, ty) in schema {
            properties.insert(name.clone(), json!({ "type": ty.as_str() }));
            if *ty == FieldType::Keyword && !name.ends_with(RAW_SUFFIX) {
                properties.insert(
                    format!("{}{}", name, RAW_SUFFIX),
                    json!({ "type": FieldType::Keyword.as_str() }),
                );
            }
        }

        // Fields every document carries regardless of monitor
        let defaults = [
            (TIMESTAMP_FIELD, FieldType::Date),
            (HOSTNAME_TAG, FieldType::Text),
            (HOSTNAME_RAW_TAG, FieldType::Keyword),
            (IPADDR_TAG, FieldType::Ip),
            (TYPE_TAG, FieldType::Keyword),
            ("type_raw", FieldType::Keyword),
        ];
        for (name, ty) in defaults {
            properties.insert(name.to_string(), json!({ "type": ty.as_str() }));
        }

        let mut settings = json!({ "number_of_shards": self.shards });
        if let Some(replicas) = self.replicas {
            settings["number_of_replicas"] = json!(replicas);
        }

        json!({
            "index_patterns": [self.buckets.pattern()],
            "template": {
                "settings": settings,
                "mappings": { "properties": properties },
            },
        })
    }

    async fn ensure_bucket(&self, at: DateTime<Utc>) -> Result<String, BackendError> {
        let api = self.api.as_ref();
        self.buckets
            .ensure(at, |index| async move {
                if api.index_exists(&index).await? {
                    Ok(CreateOutcome::AlreadyExists)
                } else {
                    api.create_index(&index).await
                }
            })
            .await
    }
}

/// Flattens a measurement into the indexed document
///
/// Every tag is duplicated into a `<tag>_raw` field for exact-match
/// grouping, unless that key is already present.
pub(crate) fn build_document(measurement: &Measurement, at: DateTime<Utc>) -> Value {
    let mut doc = Map::new();
    for (k, v) in measurement.values() {
        doc.insert(k.clone(), json!(v));
    }
    for (k, v) in measurement.tags() {
        doc.insert(k.clone(), json!(v));
    }
    for (k, v) in measurement.tags() {
        if k.ends_with(RAW_SUFFIX) {
            continue;
        }
        doc.entry(format!("{}{}", k, RAW_SUFFIX))
            .or_insert_with(|| json!(v));
    }
    doc.insert(TIMESTAMP_FIELD.to_string(), json!(at.to_rfc3339()));
    Value::Object(doc)
}

#[async_trait]
impl Backend for ElasticsearchBackend {
    fn kind(&self) -> &'static str {
        "elasticsearch"
    }

    async fn prepare(&self, schema: &Schema) -> Result<(), BackendError> {
        let template = self.template(schema);
        debug!("Creating template with body {}", template);
        self.api.put_template(self.buckets.prefix(), &template).await?;
        info!(
            "Installed index template '{}' with {} declared field(s)",
            self.buckets.prefix(),
            schema.len()
        );
        Ok(())
    }

    async fn connect(&self) -> Result<(), BackendError> {
        self.api.ping().await?;
        self.ensure_bucket(Utc::now()).await?;
        info!("Connected to Elasticsearch");
        Ok(())
    }

    async fn write(&self, measurement: Measurement) -> Result<(), BackendError> {
        let at = measurement.timestamp().unwrap_or_else(Utc::now);
        let index = self.ensure_bucket(at).await?;
        let document = build_document(&measurement, at);
        debug!(
            "Logging type {}: {}",
            measurement.tag(TYPE_TAG).unwrap_or("unknown"),
            measurement
        );
        self.api.index_document(&index, &document).await
    }
}
