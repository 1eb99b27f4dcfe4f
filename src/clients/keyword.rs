use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::models::*;

/// Lexical search backend over documents carrying at least `id`, `title`
/// and `description`.
#[async_trait]
pub trait KeywordIndex: Send + Sync {
    async fn search(&self, text: &str, filters: Option<&Value>, limit: usize) -> Result<RankList>;
    /// Indexes (or overwrites) one document per point, keyed by point id.
    async fn index_points(&self, points: &[Point]) -> Result<()>;
}

/// Elasticsearch REST client for a single index.
#[derive(Clone)]
pub struct ElasticsearchClient {
    http: Client,
    base_url: String,
    index: String,
}

impl ElasticsearchClient {
    pub fn new(base_url: String, index: String, timeout_ms: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| RetrievalError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string(), index })
    }

    pub fn build_query(text: &str, filters: Option<&Value>, limit: usize) -> Value {
        let filter = match filters {
            Some(Value::Array(a)) => Value::Array(a.clone()),
            Some(f) if !f.is_null() => Value::Array(vec![f.clone()]),
            _ => Value::Array(vec![]),
        };
        serde_json::json!({
            "query": {
                "bool": {
                    "must": { "multi_match": { "query": text, "fields": ["title", "description"] } },
                    "filter": filter
                }
            },
            "size": limit,
            "_source": false
        })
    }

    fn document(point: &Point) -> Value {
        let p = &point.payload;
        let mut doc = serde_json::json!({
            "id": point.id,
            "item_id": p.item_id,
            "main_image_id": p.main_image_id,
        });
        let optional = [
            ("title", p.title.clone().map(Value::String)),
            ("description", p.description().map(Value::String)),
            ("brand", p.brand.clone().map(Value::String)),
            ("category", p.category.clone().map(Value::String)),
            ("color", p.color.clone().map(Value::String)),
            ("price", p.price.and_then(serde_json::Number::from_f64).map(Value::Number)),
            ("currency", p.currency.clone().map(Value::String)),
            ("rating", p.rating.and_then(serde_json::Number::from_f64).map(Value::Number)),
        ];
        if let Some(obj) = doc.as_object_mut() {
            for (k, v) in optional {
                if let Some(v) = v { obj.insert(k.to_string(), v); }
            }
        }
        doc
    }
}

#[async_trait]
impl KeywordIndex for ElasticsearchClient {
    async fn search(&self, text: &str, filters: Option<&Value>, limit: usize) -> Result<RankList> {
        let url = format!("{}/{}/_search", self.base_url, self.index);
        let body = Self::build_query(text, filters, limit);
        let resp = self.http.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RetrievalError::KeywordIndex(format!(
                "search failed ({}): {}",
                status,
                text.chars().take(200).collect::<String>()
            )));
        }
        let json: Value = resp.json().await?;
        let hits = json
            .get("hits")
            .and_then(|h| h.get("hits"))
            .and_then(|h| h.as_array())
            .cloned()
            .unwrap_or_default();
        let mut ids = Vec::with_capacity(hits.len());
        for hit in hits {
            match hit.get("_id").and_then(|v| v.as_str()).and_then(|s| s.parse::<u64>().ok()) {
                Some(id) => ids.push(id),
                None => tracing::warn!(hit_id = ?hit.get("_id"), index = %self.index, "keyword hit with non-numeric id ignored"),
            }
        }
        Ok(ids)
    }

    async fn index_points(&self, points: &[Point]) -> Result<()> {
        if points.is_empty() { return Ok(()); }
        let mut ndjson = String::new();
        for point in points {
            let action = serde_json::json!({ "index": { "_index": self.index, "_id": point.id.to_string() } });
            ndjson.push_str(&action.to_string());
            ndjson.push('\n');
            ndjson.push_str(&Self::document(point).to_string());
            ndjson.push('\n');
        }
        let resp = self.http
            .post(format!("{}/_bulk", self.base_url))
            .header("Content-Type", "application/x-ndjson")
            .body(ndjson)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RetrievalError::KeywordIndex(format!("bulk index failed ({}): {}", status, text.chars().take(200).collect::<String>())));
        }
        let json: Value = resp.json().await?;
        if json.get("errors").and_then(|e| e.as_bool()).unwrap_or(false) {
            return Err(RetrievalError::KeywordIndex("bulk index reported item errors".into()));
        }
        Ok(())
    }
}
