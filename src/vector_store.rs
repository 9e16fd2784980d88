//! # VectorStore
//!
//! Persistence for tagged messages in a Milvus collection, spoken to over the
//! Milvus RESTful API (v2, served on the same port as gRPC, `19530` by default).
//!
//! ## Collection layout
//! | field          | type                    |
//! |----------------|-------------------------|
//! | `id`           | Int64, primary, auto-id |
//! | `vector`       | FloatVector, dim 384    |
//! | `text`         | VarChar(1000)           |
//! | `tags`         | VarChar(256)            |
//! | `user_id`      | Int64                   |
//! | `created_time` | Int64 (Unix seconds)    |
//!
//! The `vector` field carries an IVF_FLAT index with cosine metric and
//! [`NLIST`] partitions; searches probe [`NPROBE`] of them.
//!
//! ## Setup
//! [`MilvusStore::connect`] checks reachability, creates the collection and the
//! index if they are missing (an existing collection is reused as is) and loads
//! the collection. Any failure there is returned to the caller.
//!
//! ## Operations
//! The [`MessageStore`] methods never return errors: failures are logged and
//! turned into `false`, an empty result, or `0`. Inserts and counts flush, so a
//! record is visible to the next search or count as soon as `insert` returns.
//! A row is stored whole or not at all: text or a tag over its byte cap fails
//! the insert instead of being shortened.
//!
//! ## Distances
//! Milvus reports cosine *similarity* for the COSINE metric. [`MessageMatch`]
//! carries the cosine *distance* `1 - similarity`, best match first.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error, info};

use crate::embedding::EMBEDDING_DIM;
use crate::{Error, Result};

/// Storage cap for the `text` field, in bytes. Longer text is rejected.
pub const TEXT_MAX_LENGTH: usize = 1000;
/// Storage cap for the `tags` field, in bytes. Longer tags are rejected.
pub const TAG_MAX_LENGTH: usize = 256;
/// IVF partition count.
pub const NLIST: u32 = 128;
/// Partitions probed per search.
pub const NPROBE: u32 = 10;

const VECTOR_FIELD: &str = "vector";
const OUTPUT_FIELDS: [&str; 4] = ["text", "tags", "user_id", "created_time"];

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMatch {
    pub id: i64,
    /// Cosine distance in `[0, 2]`, lower is closer.
    pub distance: f32,
    pub text: String,
    pub tag: String,
    pub user_id: i64,
    pub created_time: i64,
}

impl MessageMatch {
    /// `(1 - distance) * 100`, meaningful while `distance` is in `[0, 1]`.
    pub fn similarity_percent(&self) -> f32 {
        (1.0 - self.distance) * 100.0
    }
}

/// Insert / search / count over persisted messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist one message; `created_time` is assigned here. Returns `false` on failure.
    async fn insert(&self, text: &str, vector: &[f32], tag: &str, user_id: i64) -> bool;

    /// Nearest messages to `query`, closest first. Empty on failure.
    async fn search_similar(&self, query: &[f32], limit: usize) -> Vec<MessageMatch>;

    /// Total number of stored messages. `0` on failure.
    async fn count_messages(&self) -> u64;
}

/// Connection settings for [`MilvusStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct MilvusSettings {
    pub host: String,
    pub port: u16,
    pub collection: String,
    /// Sent as a bearer token when present.
    pub token: Option<String>,
}

impl MilvusSettings {
    pub fn base_url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}", self.host.trim_end_matches('/'), self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct HasCollection {
    has: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertResult {
    #[serde(default)]
    insert_count: u64,
    #[serde(default)]
    insert_ids: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectionStats {
    row_count: Value,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    id: Value,
    distance: f32,
    #[serde(default)]
    text: String,
    #[serde(default)]
    tags: String,
    #[serde(default)]
    user_id: i64,
    #[serde(default)]
    created_time: i64,
}

/// Milvus accepts 64-bit integers either as JSON numbers or as strings.
fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Reject values the VarChar field would not hold; nothing is cut.
fn check_length(field: &str, value: &str, max_bytes: usize) -> Result<()> {
    if value.len() > max_bytes {
        return Err(Error::Store {
            code: -1,
            message: format!("{field} is {} bytes, limit is {max_bytes}", value.len()),
        });
    }
    Ok(())
}

/// A Milvus collection ready for inserts and searches.
///
/// `reqwest::Client` is an `Arc` internally and safe to share, so one store is
/// used by every in-flight message; Milvus serializes concurrent writes itself.
#[derive(Debug, Clone)]
pub struct MilvusStore {
    client: Client,
    base_url: String,
    collection: String,
    token: Option<String>,
}

impl MilvusStore {
    /// Connect and make sure the collection, its index and its load state exist.
    ///
    /// # Errors
    /// Transport failures, non-zero Milvus codes, or malformed responses in any
    /// setup step.
    pub async fn connect(settings: &MilvusSettings) -> Result<Self> {
        let store = Self {
            client: Client::new(),
            base_url: settings.base_url(),
            collection: settings.collection.clone(),
            token: settings.token.clone(),
        };

        let exists = store.has_collection().await?;
        info!("Connected to Milvus at {}", store.base_url);

        if exists {
            info!("Collection {} already exists", store.collection);
        } else {
            info!("Creating collection {}", store.collection);
            store.create_collection().await?;
        }

        store.ensure_index().await?;
        store
            .call::<Value>("/v2/vectordb/collections/load", json!({ "collectionName": store.collection }))
            .await?;
        info!("Collection {} loaded", store.collection);

        Ok(store)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    async fn call<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {url}");

        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let envelope: Envelope = request.send().await?.error_for_status()?.json().await?;
        if envelope.code != 0 {
            return Err(Error::Store {
                code: envelope.code,
                message: envelope.message,
            });
        }
        Ok(serde_json::from_value(envelope.data)?)
    }

    async fn has_collection(&self) -> Result<bool> {
        let has: HasCollection = self
            .call("/v2/vectordb/collections/has", json!({ "collectionName": self.collection }))
            .await?;
        Ok(has.has)
    }

    async fn create_collection(&self) -> Result<()> {
        let body = json!({
            "collectionName": self.collection,
            "description": "Chat messages with topic tags",
            "schema": {
                "autoId": true,
                "enableDynamicField": false,
                "fields": [
                    { "fieldName": "id", "dataType": "Int64", "isPrimary": true },
                    {
                        "fieldName": VECTOR_FIELD,
                        "dataType": "FloatVector",
                        "elementTypeParams": { "dim": EMBEDDING_DIM.to_string() }
                    },
                    {
                        "fieldName": "text",
                        "dataType": "VarChar",
                        "elementTypeParams": { "max_length": TEXT_MAX_LENGTH.to_string() }
                    },
                    {
                        "fieldName": "tags",
                        "dataType": "VarChar",
                        "elementTypeParams": { "max_length": TAG_MAX_LENGTH.to_string() }
                    },
                    { "fieldName": "user_id", "dataType": "Int64" },
                    { "fieldName": "created_time", "dataType": "Int64" }
                ]
            }
        });
        self.call::<Value>("/v2/vectordb/collections/create", body).await?;
        Ok(())
    }

    async fn ensure_index(&self) -> Result<()> {
        let indexes: Vec<String> = self
            .call(
                "/v2/vectordb/indexes/list",
                json!({ "collectionName": self.collection, "fieldName": VECTOR_FIELD }),
            )
            .await?;
        if !indexes.is_empty() {
            debug!("Index on {VECTOR_FIELD} already present: {indexes:?}");
            return Ok(());
        }

        let body = json!({
            "collectionName": self.collection,
            "indexParams": [{
                "fieldName": VECTOR_FIELD,
                "indexName": VECTOR_FIELD,
                "metricType": "COSINE",
                "indexType": "IVF_FLAT",
                "params": { "nlist": NLIST }
            }]
        });
        self.call::<Value>("/v2/vectordb/indexes/create", body).await?;
        info!("Index created on {VECTOR_FIELD}");
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.call::<Value>("/v2/vectordb/collections/flush", json!({ "collectionName": self.collection }))
            .await?;
        Ok(())
    }

    async fn try_insert(&self, text: &str, vector: &[f32], tag: &str, user_id: i64) -> Result<Vec<i64>> {
        if vector.len() != EMBEDDING_DIM {
            return Err(Error::Store {
                code: -1,
                message: format!("vector has {} dimensions, expected {EMBEDDING_DIM}", vector.len()),
            });
        }
        check_length("text", text, TEXT_MAX_LENGTH)?;
        check_length("tag", tag, TAG_MAX_LENGTH)?;

        let body = json!({
            "collectionName": self.collection,
            "data": [{
                "vector": vector,
                "text": text,
                "tags": tag,
                "user_id": user_id,
                "created_time": chrono::Utc::now().timestamp(),
            }]
        });
        let result: InsertResult = self.call("/v2/vectordb/entities/insert", body).await?;
        if result.insert_count == 0 {
            return Err(Error::Store {
                code: -1,
                message: "insert reported no rows".into(),
            });
        }
        self.flush().await?;

        Ok(result.insert_ids.iter().filter_map(lenient_i64).collect())
    }

    async fn try_search(&self, query: &[f32], limit: usize) -> Result<Vec<MessageMatch>> {
        let body = json!({
            "collectionName": self.collection,
            "data": [query],
            "annsField": VECTOR_FIELD,
            "limit": limit,
            "outputFields": OUTPUT_FIELDS,
            "searchParams": {
                "metricType": "COSINE",
                "params": { "nprobe": NPROBE }
            }
        });
        let hits: Vec<RawHit> = self.call("/v2/vectordb/entities/search", body).await?;

        let mut matches: Vec<MessageMatch> = hits
            .into_iter()
            .map(|hit| MessageMatch {
                id: lenient_i64(&hit.id).unwrap_or_default(),
                distance: 1.0 - hit.distance,
                text: hit.text,
                tag: hit.tags,
                user_id: hit.user_id,
                created_time: hit.created_time,
            })
            .collect();
        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(matches)
    }

    async fn try_count(&self) -> Result<u64> {
        self.flush().await?;
        let stats: CollectionStats = self
            .call("/v2/vectordb/collections/get_stats", json!({ "collectionName": self.collection }))
            .await?;
        lenient_i64(&stats.row_count)
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| Error::Store {
                code: -1,
                message: format!("bad rowCount {}", stats.row_count),
            })
    }
}

#[async_trait]
impl MessageStore for MilvusStore {
    async fn insert(&self, text: &str, vector: &[f32], tag: &str, user_id: i64) -> bool {
        match self.try_insert(text, vector, tag, user_id).await {
            Ok(ids) => {
                info!("Message from user {user_id} stored with id {ids:?}");
                true
            }
            Err(e) => {
                error!("Insert for user {user_id} failed: {e}");
                false
            }
        }
    }

    async fn search_similar(&self, query: &[f32], limit: usize) -> Vec<MessageMatch> {
        self.try_search(query, limit).await.unwrap_or_else(|e| {
            error!("Similarity search failed: {e}");
            Vec::new()
        })
    }

    async fn count_messages(&self) -> u64 {
        self.try_count().await.unwrap_or_else(|e| {
            error!("Counting messages failed: {e}");
            0
        })
    }
}
