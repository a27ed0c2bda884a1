// MongoDB backend - document store with daily collections
//
// This module is responsible for:
// 1. Connecting to MongoDB lazily on first use
// 2. Rolling measurements into one collection per day
// 3. Creating the recommended indexes on every collection it switches to
// 4. Inserting one BSON document per measurement

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use chrono::{DateTime, Utc};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use std::future::Future;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::bucket::{CreateOutcome, DailyBuckets};
use super::{Backend, BackendError};
use crate::config::MongoConfig;
use crate::measurement::{FieldValue, Measurement, Schema};

/// Server error code for "collection already exists"
const NAMESPACE_EXISTS: i32 = 48;

const TIMESTAMP_FIELD: &str = "@timestamp";

pub struct MongoBackend {
    config: MongoConfig,
    client: OnceCell<Client>,
    buckets: DailyBuckets,
}

impl MongoBackend {
    pub fn new(config: MongoConfig) -> Self {
        let buckets = DailyBuckets::new(config.collection_prefix.as_str());
        MongoBackend {
            config,
            client: OnceCell::new(),
            buckets,
        }
    }

    async fn database(&self) -> Result<Database, BackendError> {
        let client = self
            .client
            .get_or_try_init(|| async {
                info!("Connecting to MongoDB...");
                Client::with_uri_str(&self.config.uri)
                    .await
                    .map_err(|e| BackendError::Unavailable(format!("MongoDB connection failed: {}", e)))
            })
            .await?;
        Ok(client.database(&self.config.database))
    }

    /// Creates the collection if missing, then its indexes
    async fn create_collection(&self, name: &str) -> Result<CreateOutcome, BackendError> {
        let db = self.database().await?;
        let collection: Collection<Document> = db.collection(name);

        provision(
            || async {
                match db.create_collection(name, None).await {
                    Ok(()) => Ok(CreateOutcome::Created),
                    Err(e) if is_namespace_exists(&e) => Ok(CreateOutcome::AlreadyExists),
                    Err(e) => Err(unavailable(e)),
                }
            },
            || create_indexes(&collection),
        )
        .await
    }

    async fn ensure_bucket(&self, at: DateTime<Utc>) -> Result<String, BackendError> {
        self.buckets
            .ensure(at, |name| async move { self.create_collection(&name).await })
            .await
    }
}

/// Runs `create`, then `index` whatever the create outcome
///
/// A collection can exist without its indexes when a previous attempt
/// failed between the two steps, so an existing collection still gets
/// `create_index`, which is a no-op for an identical index.
async fn provision<C, CF, I, IF>(create: C, index: I) -> Result<CreateOutcome, BackendError>
where
    C: FnOnce() -> CF,
    CF: Future<Output = Result<CreateOutcome, BackendError>>,
    I: FnOnce() -> IF,
    IF: Future<Output = Result<(), BackendError>>,
{
    let outcome = create().await?;
    index().await?;
    Ok(outcome)
}

async fn create_indexes(collection: &Collection<Document>) -> Result<(), BackendError> {
    // Compound index on host + time for per-node time-series queries
    let by_host = IndexModel::builder()
        .keys(doc! {
            "hostname": 1,
            "@timestamp": -1
        })
        .options(
            IndexOptions::builder()
                .name("hostname_timestamp_idx".to_string())
                .build(),
        )
        .build();
    collection.create_index(by_host, None).await.map_err(unavailable)?;

    let by_type = IndexModel::builder()
        .keys(doc! { "type": 1 })
        .options(IndexOptions::builder().name("type_idx".to_string()).build())
        .build();
    collection.create_index(by_type, None).await.map_err(unavailable)?;
    Ok(())
}

fn is_namespace_exists(e: &MongoError) -> bool {
    matches!(e.kind.as_ref(), ErrorKind::Command(c) if c.code == NAMESPACE_EXISTS)
}

fn unavailable(e: MongoError) -> BackendError {
    BackendError::Unavailable(e.to_string())
}

/// Converts a measurement into the inserted BSON document
pub(crate) fn to_bson_document(measurement: &Measurement, at: DateTime<Utc>) -> Document {
    let mut document = Document::new();
    for (k, v) in measurement.values() {
        let value = match v {
            FieldValue::Integer(i) => Bson::Int64(*i),
            FieldValue::Float(f) => Bson::Double(*f),
            FieldValue::Text(s) => Bson::String(s.clone()),
        };
        document.insert(k.as_str(), value);
    }
    for (k, v) in measurement.tags() {
        document.insert(k.as_str(), v.as_str());
    }
    document.insert(TIMESTAMP_FIELD, bson::DateTime::from_chrono(at));
    document
}

#[async_trait]
impl Backend for MongoBackend {
    fn kind(&self) -> &'static str {
        "mongodb"
    }

    async fn prepare(&self, schema: &Schema) -> Result<(), BackendError> {
        let db = self.database().await?;
        db.run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(unavailable)?;

        // Collections are schemaless; the declared fields are only reported
        info!(
            "MongoDB reachable, {} declared field(s) for '{}'",
            schema.len(),
            self.buckets.pattern()
        );
        Ok(())
    }

    async fn connect(&self) -> Result<(), BackendError> {
        self.ensure_bucket(Utc::now()).await?;
        info!("Connected to MongoDB database '{}'", self.config.database);
        Ok(())
    }

    async fn write(&self, measurement: Measurement) -> Result<(), BackendError> {
        let at = measurement.timestamp().unwrap_or_else(Utc::now);
        let name = self.ensure_bucket(at).await?;
        let document = to_bson_document(&measurement, at);

        let collection: Collection<Document> = self.database().await?.collection(&name);
        match collection.insert_one(document, None).await {
            Ok(result) => {
                debug!(
                    "Stored measurement with id {:?} in collection '{}'",
                    result.inserted_id, name
                );
                Ok(())
            }
            Err(e) => match e.kind.as_ref() {
                ErrorKind::Write(_) | ErrorKind::InvalidArgument { .. } => {
                    Err(BackendError::WriteRejected(e.to_string()))
                }
                _ => Err(unavailable(e)),
            },
        }
    }
}
