use crate::models::{CollectionSpec, Distance};

#[derive(Debug, Clone)]
pub struct Config {
    // Vector store (Qdrant)
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub collection_name: String,
    pub embedding_dim: usize,
    pub vector_distance: Distance,
    // Fail fast when an existing collection's shape differs from the above
    pub collection_validate: bool,
    // Keyword index (Elasticsearch)
    pub elasticsearch_url: String,
    pub keyword_index: String,
    pub mirror_keyword_index: bool,
    // Embeddings service
    pub embeddings_service_url: String,
    pub embeddings_image_model: Option<String>,
    pub embeddings_text_model: Option<String>,
    // Source corpus
    pub shard_base_url: String,
    pub shard_paths: Vec<String>,
    pub image_base_url: String,
    pub image_extension: String,
    pub max_image_size_mb: u64,
    // HTTP
    pub http_user_agent: String,
    pub http_timeout_ms: u64,
    pub shard_timeout_ms: u64,
    pub image_timeout_ms: u64,
    // Ingestion
    pub batch_size: usize,
    pub ingest_parallelism: usize,
    pub upsert_max_retries: u32,
    pub upsert_retry_backoff_ms: u64,
    pub dead_letter_path: Option<String>,
    pub preferred_language: String,
    pub source_tag: String,
    // Hybrid fusion
    pub rrf_k: f64,
    pub fusion_candidates: usize,
    pub fusion_timeout_ms: u64,
    pub fusion_fallback: bool,
}

pub fn default_shard_paths() -> Vec<String> {
    (0..16).map(|i| format!("listings/metadata/listings_{}.json.gz", i)).collect()
}

fn parse_bool(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true")
}

impl Config {
    pub fn from_env() -> Self {
        let get = |k: &str| std::env::var(k).ok().filter(|v| !v.trim().is_empty());

        let qdrant_url = get("QDRANT_URL").unwrap_or_else(|| "http://localhost:6333".to_string());
        let qdrant_api_key = get("QDRANT_API_KEY");
        let collection_name = get("COLLECTION_NAME").unwrap_or_else(|| "products".to_string());
        // CLIP ViT-B/32 image projection
        let embedding_dim: usize = get("EMBEDDING_DIM").and_then(|s| s.parse().ok()).unwrap_or(512);
        let vector_distance = match get("VECTOR_DISTANCE").map(|s| s.parse::<Distance>()) {
            Some(Ok(d)) => d,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Invalid VECTOR_DISTANCE; using Cosine");
                Distance::Cosine
            }
            None => Distance::Cosine,
        };
        let collection_validate = get("COLLECTION_VALIDATE").map(|s| parse_bool(&s)).unwrap_or(true);

        let elasticsearch_url = get("ELASTICSEARCH_URL").unwrap_or_else(|| "http://localhost:9200".to_string());
        let keyword_index = get("KEYWORD_INDEX").unwrap_or_else(|| "products".to_string());
        let mirror_keyword_index = get("MIRROR_KEYWORD_INDEX").map(|s| parse_bool(&s)).unwrap_or(false);

        let embeddings_service_url = get("EMBEDDINGS_SERVICE_URL").unwrap_or_else(|| "http://localhost:8090".to_string());
        let embeddings_image_model = get("EMBEDDINGS_IMAGE_MODEL");
        let embeddings_text_model = get("EMBEDDINGS_TEXT_MODEL");

        let shard_base_url = get("SHARD_BASE_URL").unwrap_or_else(|| "https://amazon-berkeley-objects.s3.amazonaws.com".to_string());
        let shard_paths = get("SHARD_PATHS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect::<Vec<_>>())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_shard_paths);
        let image_base_url = get("IMAGE_BASE_URL").unwrap_or_else(|| "https://m.media-amazon.com/images/I/".to_string());
        let image_extension = get("IMAGE_EXTENSION").unwrap_or_else(|| ".jpg".to_string());
        let max_image_size_mb: u64 = get("MAX_IMAGE_SIZE_MB").and_then(|s| s.parse().ok()).unwrap_or(20);

        let http_user_agent = get("HTTP_USER_AGENT").unwrap_or_else(|| "retrieval-core/0.1".to_string());
        let http_timeout_ms: u64 = get("HTTP_TIMEOUT_MS").and_then(|s| s.parse().ok()).unwrap_or(30_000);
        let shard_timeout_ms: u64 = get("SHARD_TIMEOUT_MS").and_then(|s| s.parse().ok()).unwrap_or(30_000);
        let image_timeout_ms: u64 = get("IMAGE_TIMEOUT_MS").and_then(|s| s.parse().ok()).unwrap_or(10_000);

        let batch_size: usize = get("BATCH_SIZE").and_then(|s| s.parse().ok()).unwrap_or(50);
        let ingest_parallelism: usize = get("INGEST_PARALLELISM").and_then(|s| s.parse().ok()).unwrap_or(8);
        let upsert_max_retries: u32 = get("UPSERT_MAX_RETRIES").and_then(|s| s.parse().ok()).unwrap_or(3);
        let upsert_retry_backoff_ms: u64 = get("UPSERT_RETRY_BACKOFF_MS").and_then(|s| s.parse().ok()).unwrap_or(500);
        let dead_letter_path = get("DEAD_LETTER_PATH");
        let preferred_language = get("PREFERRED_LANGUAGE").unwrap_or_else(|| "en_US".to_string());
        let source_tag = get("SOURCE_TAG").unwrap_or_else(|| "ABO".to_string());

        let rrf_k = parse_rrf_k(get("RRF_K"));
        let fusion_candidates: usize = get("FUSION_CANDIDATES").and_then(|s| s.parse().ok()).unwrap_or(100);
        let fusion_timeout_ms: u64 = get("FUSION_TIMEOUT_MS").and_then(|s| s.parse().ok()).unwrap_or(5_000);
        let fusion_fallback = get("FUSION_FALLBACK").map(|s| parse_bool(&s)).unwrap_or(false);

        Self {
            qdrant_url,
            qdrant_api_key,
            collection_name,
            embedding_dim,
            vector_distance,
            collection_validate,
            elasticsearch_url,
            keyword_index,
            mirror_keyword_index,
            embeddings_service_url,
            embeddings_image_model,
            embeddings_text_model,
            shard_base_url,
            shard_paths,
            image_base_url,
            image_extension,
            max_image_size_mb,
            http_user_agent,
            http_timeout_ms,
            shard_timeout_ms,
            image_timeout_ms,
            batch_size,
            ingest_parallelism,
            upsert_max_retries,
            upsert_retry_backoff_ms,
            dead_letter_path,
            preferred_language,
            source_tag,
            rrf_k,
            fusion_candidates,
            fusion_timeout_ms,
            fusion_fallback,
        }
    }

    pub fn collection_spec(&self) -> CollectionSpec {
        CollectionSpec {
            name: self.collection_name.clone(),
            dimension: self.embedding_dim,
            distance: self.vector_distance,
        }
    }
}

// k <= 0 would divide by zero or invert the ranking
fn parse_rrf_k(raw: Option<String>) -> f64 {
    match raw.map(|s| s.parse::<f64>()) {
        Some(Ok(k)) if k.is_finite() && k > 0.0 => k,
        Some(Ok(k)) => {
            tracing::warn!(rrf_k = k, "RRF_K must be positive; using 60");
            60.0
        }
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Invalid RRF_K; using 60");
            60.0
        }
        None => 60.0,
    }
}
