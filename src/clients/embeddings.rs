use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::Value;

use crate::metrics;
use crate::models::*;

/// Opaque embedding model: bytes or text in, fixed-length vector out.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>>;
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;
}

/// Client for the embeddings service GraphQL endpoint.
#[derive(Clone)]
pub struct EmbeddingsServiceClient {
    client: Client,
    base_url: String,
    image_model: Option<String>,
    text_model: Option<String>,
}

impl EmbeddingsServiceClient {
    pub fn new(
        base_url: String,
        timeout_ms: u64,
        image_model: Option<String>,
        text_model: Option<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| RetrievalError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            image_model,
            text_model,
        })
    }

    async fn build_embedding(&self, input: Value) -> Result<Vec<f32>> {
        let mutation = r#"
            mutation BuildQueryEmbedding($input: QueryEmbeddingInput!) {
                buildQueryEmbedding(input: $input) {
                    vector
                    dimension
                }
            }
        "#;
        let body = serde_json::json!({
            "query": mutation,
            "variables": { "input": input }
        });

        let started = std::time::Instant::now();
        let response = self.client
            .post(format!("{}/graphql", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::Embedding(format!("embeddings request failed: {}", e)))?;
        metrics::record_embedding_latency(started.elapsed().as_millis() as u64);

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Embedding(format!(
                "Embeddings service error: status={} body={}",
                status,
                text.chars().take(200).collect::<String>()
            )));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| RetrievalError::Embedding(format!("invalid embeddings response: {}", e)))?;
        if let Some(errors) = result.get("errors").filter(|e| !e.is_null()) {
            return Err(RetrievalError::Embedding(format!("Embeddings service GraphQL errors: {}", errors)));
        }

        match extract_vector(&result) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(RetrievalError::Embedding("response carried no vector".into())),
        }
    }
}

#[async_trait]
impl Embedder for EmbeddingsServiceClient {
    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let mut input = serde_json::json!({
            "weightedImages": [{ "imageBase64": encoded, "weight": 1.0 }],
            "normalize": true
        });
        if let Some(m) = &self.image_model {
            input["imageModelName"] = Value::String(m.clone());
        }
        self.build_embedding(input).await
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut input = serde_json::json!({
            "weightedTexts": [{ "text": text, "weight": 1.0 }],
            "normalize": true
        });
        if let Some(m) = &self.text_model {
            input["textModelName"] = Value::String(m.clone());
        }
        self.build_embedding(input).await
    }
}

// Accepts { data: { buildQueryEmbedding: { vector } } } or any flattened variant
fn extract_vector(root: &Value) -> Option<Vec<f32>> {
    let obj = root.as_object()?;
    if let Some(data) = obj.get("data") { return extract_vector(data); }
    if let Some(inner) = obj.get("buildQueryEmbedding") { return extract_vector(inner); }
    let arr = obj.get("vector")?.as_array()?;
    let out: Vec<f32> = arr.iter().filter_map(|v| v.as_f64()).map(|f| f as f32).collect();
    // A partially numeric vector is unusable
    (out.len() == arr.len()).then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_nested_and_flat_vectors() {
        let nested = json!({"data": {"buildQueryEmbedding": {"vector": [0.5, 1.0], "dimension": 2}}});
        assert_eq!(extract_vector(&nested), Some(vec![0.5, 1.0]));
        assert_eq!(extract_vector(&json!({"vector": [1]})), Some(vec![1.0]));
        assert_eq!(extract_vector(&json!({"vector": [1, "x"]})), None);
        assert_eq!(extract_vector(&json!({"data": null})), None);
    }
}
