use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub const FIELD_ID: &str = "id";
pub const FIELD_EMBEDDING: &str = "embedding";
pub const FIELD_TEXT: &str = "text";
pub const TEXT_MAX_LENGTH: usize = 65535;
const METRIC_TYPE: &str = "L2";
const INDEX_TYPE: &str = "IVF_FLAT";
const NLIST: u32 = 1024;
const NPROBE: u32 = 10;
const MAX_NAME_LENGTH: usize = 255;

#[derive(Debug, Error)]
pub enum MilvusError {
    #[error("invalid collection name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("milvus request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("milvus returned HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("milvus error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("unexpected milvus response: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, MilvusError>;

/// One row of the document collection; `id` is assigned by Milvus.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkRow {
    pub embedding: Vec<f32>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchHit {
    #[serde(deserialize_with = "lenient_i64")]
    pub id: i64,
    pub distance: f32,
    #[serde(default)]
    pub text: String,
}

#[derive(Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct HasData {
    has: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertData {
    insert_count: u64,
}

/// Client for the Milvus RESTful v2 API.
#[derive(Clone)]
pub struct MilvusClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl MilvusClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_host_port(host: &str, port: u16, token: Option<String>) -> Result<Self> {
        Self::new(format!("http://{host}:{port}"), token)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn list_collections(&self) -> Result<Vec<String>> {
        let data = self.call("/v2/vectordb/collections/list", json!({})).await?;
        decode(data)
    }

    pub async fn has_collection(&self, name: &str) -> Result<bool> {
        validate_collection_name(name)?;
        let data = self
            .call("/v2/vectordb/collections/has", json!({ "collectionName": name }))
            .await?;
        Ok(decode::<HasData>(data)?.has)
    }

    /// Creates the document collection (auto id, `dim`-wide float vector, text) with an
    /// IVF_FLAT/L2 index on the vector field.
    pub async fn create_collection(&self, name: &str, dim: usize) -> Result<()> {
        validate_collection_name(name)?;
        let body = json!({
            "collectionName": name,
            "description": "Document collection",
            "schema": {
                "autoId": true,
                "enableDynamicField": false,
                "fields": [
                    { "fieldName": FIELD_ID, "dataType": "Int64", "isPrimary": true },
                    {
                        "fieldName": FIELD_EMBEDDING,
                        "dataType": "FloatVector",
                        "elementTypeParams": { "dim": dim.to_string() }
                    },
                    {
                        "fieldName": FIELD_TEXT,
                        "dataType": "VarChar",
                        "elementTypeParams": { "max_length": TEXT_MAX_LENGTH.to_string() }
                    }
                ]
            },
            "indexParams": [{
                "fieldName": FIELD_EMBEDDING,
                "indexName": FIELD_EMBEDDING,
                "metricType": METRIC_TYPE,
                "indexType": INDEX_TYPE,
                "params": { "nlist": NLIST }
            }]
        });
        self.call("/v2/vectordb/collections/create", body).await?;
        info!(collection = name, dim, "created collection");
        Ok(())
    }

    pub async fn create_collection_if_not_exists(&self, name: &str, dim: usize) -> Result<()> {
        if self.has_collection(name).await? {
            info!(collection = name, "collection already exists; do not create");
            return Ok(());
        }
        self.create_collection(name, dim).await
    }

    pub async fn drop_collection(&self, name: &str) -> Result<()> {
        validate_collection_name(name)?;
        self.call("/v2/vectordb/collections/drop", json!({ "collectionName": name }))
            .await?;
        Ok(())
    }

    pub async fn load_collection(&self, name: &str) -> Result<()> {
        validate_collection_name(name)?;
        self.call("/v2/vectordb/collections/load", json!({ "collectionName": name }))
            .await?;
        Ok(())
    }

    pub async fn insert(&self, name: &str, rows: &[ChunkRow]) -> Result<u64> {
        validate_collection_name(name)?;
        if rows.is_empty() {
            return Ok(0);
        }
        let data = self
            .call(
                "/v2/vectordb/entities/insert",
                json!({ "collectionName": name, "data": rows }),
            )
            .await?;
        Ok(decode::<InsertData>(data)?.insert_count)
    }

    pub async fn search(&self, name: &str, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        validate_collection_name(name)?;
        let body = json!({
            "collectionName": name,
            "data": [vector],
            "annsField": FIELD_EMBEDDING,
            "limit": limit,
            "outputFields": [FIELD_TEXT],
            "searchParams": {
                "metricType": METRIC_TYPE,
                "params": { "nprobe": NPROBE }
            }
        });
        let data = self.call("/v2/vectordb/entities/search", body).await?;
        decode(data)
    }

    async fn call(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "milvus request");
        let mut request = self.http.post(&url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MilvusError::Status { status, body });
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| MilvusError::Decode(e.to_string()))?;
        // older proxies report success as 200
        if envelope.code != 0 && envelope.code != 200 {
            return Err(MilvusError::Api {
                code: envelope.code,
                message: envelope.message,
            });
        }
        Ok(envelope.data)
    }
}

pub fn validate_collection_name(name: &str) -> Result<()> {
    let invalid = |reason| {
        Err(MilvusError::InvalidName {
            name: name.to_string(),
            reason,
        })
    };
    let Some(first) = name.chars().next() else {
        return invalid("name is empty");
    };
    if name.len() > MAX_NAME_LENGTH {
        return invalid("name is longer than 255 characters");
    }
    if first.is_ascii_digit() {
        return invalid("name must not start with a digit");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    {
        return invalid("only letters, digits, '_' and '$' are allowed");
    }
    Ok(())
}

fn decode<T: DeserializeOwned>(data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(|e| MilvusError::Decode(e.to_string()))
}

// Int64 primary keys may come back as JSON numbers or strings.
fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Num(i64),
        Str(String),
    }
    match Id::deserialize(deserializer)? {
        Id::Num(n) => Ok(n),
        Id::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
