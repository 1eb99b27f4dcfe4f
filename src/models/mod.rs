pub mod point;
pub mod product;

pub use point::*;
pub use product::*;

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("No asset available for {key} after {attempts} reference(s)")]
    AssetUnavailable { key: String, attempts: usize },

    #[error("Asset fetch error for {reference}: {message}")]
    AssetFetch { reference: String, message: String },

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Store write error: {0}")]
    StoreWrite(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Keyword index error: {0}")]
    KeywordIndex(String),

    #[error("Shard fetch error ({shard}): {message}")]
    ShardFetch { shard: String, message: String },

    #[error("Fusion backend error ({backend}): {message}")]
    FusionBackend { backend: &'static str, message: String },

    #[error("Collection config mismatch: {0}")]
    ConfigMismatch(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
