use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use tokio::time::timeout;

use crate::config::Config;
use crate::models::*;

/// Retrieves the raw bytes behind one image reference.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>>;
}

/// Fetches `base_url + reference + extension` over HTTP. One attempt per
/// reference, bounded by a per-request timeout.
pub struct HttpAssetFetcher {
    http_client: HttpClient,
    base_url: String,
    extension: String,
    request_timeout: Duration,
    max_bytes: usize,
}

impl HttpAssetFetcher {
    pub fn new(
        base_url: String,
        extension: String,
        user_agent: &str,
        timeout_ms: u64,
        max_image_size_mb: u64,
    ) -> Result<Self> {
        let request_timeout = Duration::from_millis(timeout_ms);
        let http_client = HttpClient::builder()
            .user_agent(user_agent)
            .timeout(request_timeout)
            .build()
            .map_err(|e| RetrievalError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            base_url,
            extension,
            request_timeout,
            max_bytes: (max_image_size_mb * 1024 * 1024) as usize,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.image_base_url.clone(),
            config.image_extension.clone(),
            &config.http_user_agent,
            config.image_timeout_ms,
            config.max_image_size_mb,
        )
    }

    /// Absolute URLs pass through; bare ids are expanded against the image host.
    pub fn url_for(&self, reference: &str) -> String {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            reference.to_string()
        } else {
            format!("{}{}{}", self.base_url, reference, self.extension)
        }
    }

    fn fetch_error(reference: &str, message: impl Into<String>) -> RetrievalError {
        RetrievalError::AssetFetch { reference: reference.to_string(), message: message.into() }
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
        let url = self.url_for(reference);
        tracing::debug!(url = %url, "Downloading image");

        let download = async {
            let response = self.http_client
                .get(&url)
                .send()
                .await
                .map_err(|e| Self::fetch_error(reference, e.to_string()))?;

            if !response.status().is_success() {
                return Err(Self::fetch_error(reference, format!(
                    "HTTP error downloading image: {} {}",
                    response.status().as_u16(),
                    response.status().canonical_reason().unwrap_or("Unknown")
                )));
            }

            let bytes = response.bytes().await.map_err(|e| Self::fetch_error(reference, e.to_string()))?;
            if bytes.len() > self.max_bytes {
                return Err(Self::fetch_error(reference, format!(
                    "Image too large: {} bytes (max: {} bytes)",
                    bytes.len(),
                    self.max_bytes
                )));
            }
            // Error pages served with 200 are not images
            image::guess_format(&bytes)
                .map_err(|e| Self::fetch_error(reference, format!("unrecognised image format: {}", e)))?;
            Ok(bytes.to_vec())
        };

        timeout(self.request_timeout, download)
            .await
            .map_err(|_| Self::fetch_error(reference, "Image download timeout"))?
    }
}

/// Image bytes together with the reference that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAsset {
    pub bytes: Vec<u8>,
    pub used_ref: String,
}

/// Primary-then-alternates image resolution.
#[derive(Clone)]
pub struct AssetResolver {
    fetcher: Arc<dyn AssetFetcher>,
}

impl AssetResolver {
    pub fn new(fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self { fetcher }
    }

    /// Tries `primary`, then each alternate in order, returning the first
    /// success. `key` is only used for logging and the error.
    pub async fn resolve(&self, key: &str, primary: &str, alternates: &[String]) -> Result<ResolvedAsset> {
        let candidates = std::iter::once(primary)
            .chain(alternates.iter().map(|s| s.as_str()))
            .filter(|r| !r.trim().is_empty());

        let mut attempts = 0usize;
        for reference in candidates {
            attempts += 1;
            match self.fetcher.fetch(reference).await {
                Ok(bytes) => {
                    if reference != primary {
                        tracing::debug!(item_id = %key, used_ref = %reference, primary_ref = %primary, "Using fallback image");
                    }
                    return Ok(ResolvedAsset { bytes, used_ref: reference.to_string() });
                }
                Err(e) => {
                    tracing::warn!(item_id = %key, reference = %reference, error = %e, "Could not download image");
                }
            }
        }

        Err(RetrievalError::AssetUnavailable { key: key.to_string(), attempts })
    }
}
