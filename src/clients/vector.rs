use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::Level;

use crate::models::*;

/// Vector store bound to one named collection.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Nearest neighbours of `vector`, most similar first.
    async fn search(&self, vector: &[f32], limit: usize) -> Result<RankList>;
    /// Insert-or-overwrite by point id.
    async fn upsert(&self, points: &[Point]) -> Result<()>;
    /// `None` when the collection does not exist.
    async fn collection_info(&self) -> Result<Option<CollectionInfo>>;
    async fn create_collection(&self, dimension: usize, distance: Distance) -> Result<()>;
    /// Returns whether a collection was actually removed.
    async fn delete_collection(&self) -> Result<bool>;
    async fn count(&self) -> Result<u64>;
}

/// Qdrant REST client.
#[derive(Clone)]
pub struct QdrantClient {
    http: Client,
    base_url: String,
    collection: String,
}

impl QdrantClient {
    pub fn new(base_url: String, collection: String, api_key: Option<&str>, timeout_ms: u64) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = api_key {
            let value = reqwest::header::HeaderValue::from_str(key.trim())
                .map_err(|e| RetrievalError::Configuration(format!("invalid Qdrant API key: {}", e)))?;
            headers.insert("api-key", value);
        }
        let http = Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .connect_timeout(std::time::Duration::from_millis(timeout_ms.min(10_000)))
            .default_headers(headers)
            .build()
            .map_err(|e| RetrievalError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string(), collection })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    fn truncate_body(body: &str) -> String {
        const LIMIT: usize = 2_000;
        if body.len() > LIMIT {
            let cut: String = body.chars().take(LIMIT).collect();
            format!("{}…<truncated {} chars>", cut, body.len() - LIMIT)
        } else {
            body.to_string()
        }
    }

    // Qdrant errors: { "status": { "error": "..." }, "time": ... }
    fn error_message(body: &str) -> String {
        serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|json| json.get("status").and_then(|s| s.get("error")).and_then(|e| e.as_str()).map(|s| s.to_string()))
            .unwrap_or_else(|| Self::truncate_body(body))
    }

    async fn read_result(&self, resp: reqwest::Response, op: &'static str) -> Result<Value> {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            let message = Self::error_message(&body);
            tracing::event!(
                Level::ERROR,
                target = "qdrant",
                op = op,
                http.status = %status,
                collection = %self.collection,
                error.message = %message,
                "qdrant request failed"
            );
            return Err(RetrievalError::Store(format!("{} failed ({}): {}", op, status, message)));
        }
        let json: Value = serde_json::from_str(&body)?;
        Ok(json.get("result").cloned().unwrap_or(Value::Null))
    }
}

fn parse_point_id(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_collection_info(result: &Value) -> Result<CollectionInfo> {
    let vectors = result
        .get("config")
        .and_then(|c| c.get("params"))
        .and_then(|p| p.get("vectors"))
        .ok_or_else(|| RetrievalError::Store("collection info missing vectors config".into()))?;
    let dimension = vectors
        .get("size")
        .and_then(|s| s.as_u64())
        .ok_or_else(|| RetrievalError::Store("named vectors are not supported; expected a single unnamed vector".into()))?;
    let distance = vectors
        .get("distance")
        .and_then(|d| d.as_str())
        .ok_or_else(|| RetrievalError::Store("collection info missing distance".into()))?
        .parse::<Distance>()
        .map_err(RetrievalError::Store)?;
    let points_count = result.get("points_count").and_then(|c| c.as_u64()).unwrap_or(0);
    Ok(CollectionInfo { dimension: dimension as usize, distance, points_count })
}

#[async_trait]
impl VectorIndex for QdrantClient {
    async fn search(&self, vector: &[f32], limit: usize) -> Result<RankList> {
        let body = serde_json::json!({
            "vector": vector,
            "limit": limit,
            "with_payload": false,
        });
        let resp = self.http.post(format!("{}/points/search", self.collection_url())).json(&body).send().await?;
        let result = self.read_result(resp, "search").await?;
        let hits = result.as_array().cloned().unwrap_or_default();
        Ok(hits.iter().filter_map(|h| h.get("id").and_then(parse_point_id)).collect())
    }

    async fn upsert(&self, points: &[Point]) -> Result<()> {
        if points.is_empty() { return Ok(()); }
        let body = serde_json::json!({ "points": points });
        let resp = self.http
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::StoreWrite(format!("upsert request error: {}", e)))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RetrievalError::StoreWrite(format!("upsert failed ({}): {}", status, Self::error_message(&text))));
        }
        tracing::debug!(collection = %self.collection, points = points.len(), "qdrant upsert ok");
        Ok(())
    }

    async fn collection_info(&self) -> Result<Option<CollectionInfo>> {
        let resp = self.http.get(self.collection_url()).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let result = self.read_result(resp, "collection_info").await?;
        parse_collection_info(&result).map(Some)
    }

    async fn create_collection(&self, dimension: usize, distance: Distance) -> Result<()> {
        let body = serde_json::json!({
            "vectors": { "size": dimension, "distance": distance.as_str() }
        });
        let resp = self.http.put(self.collection_url()).json(&body).send().await?;
        self.read_result(resp, "create_collection").await?;
        tracing::info!(collection = %self.collection, dimension, distance = %distance, "qdrant collection created");
        Ok(())
    }

    async fn delete_collection(&self) -> Result<bool> {
        let resp = self.http.delete(self.collection_url()).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let result = self.read_result(resp, "delete_collection").await?;
        Ok(result.as_bool().unwrap_or(false))
    }

    async fn count(&self) -> Result<u64> {
        let resp = self.http
            .post(format!("{}/points/count", self.collection_url()))
            .json(&serde_json::json!({ "exact": true }))
            .send()
            .await?;
        let result = self.read_result(resp, "count").await?;
        Ok(result.get("count").and_then(|c| c.as_u64()).unwrap_or(0))
    }
}
