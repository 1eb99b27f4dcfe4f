use std::io::{BufRead, BufReader, Cursor};
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::MultiGzDecoder;
use reqwest::Client;
use serde_json::Value;

use crate::config::Config;
use crate::models::*;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Lazily parsed records of one shard. A yielded `Err` ends the shard.
pub type ShardRecords = Box<dyn Iterator<Item = Result<Value>> + Send>;

/// Addressable, independently fetchable chunks of the source corpus.
#[async_trait]
pub trait ShardSource: Send + Sync {
    fn shard_names(&self) -> Vec<String>;
    /// Opens a shard from the start; calling again restarts it.
    async fn open(&self, shard: &str) -> Result<ShardRecords>;
}

#[derive(Debug, Clone, PartialEq)]
enum ShardLocation {
    Http(String),
    File(PathBuf),
}

/// Shards served over HTTP(S) or read from disk, gzip-compressed or plain
/// line-delimited JSON.
pub struct HttpShardSource {
    client: Client,
    base_url: String,
    paths: Vec<String>,
}

impl HttpShardSource {
    pub fn new(base_url: String, paths: Vec<String>, user_agent: &str, timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| RetrievalError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, base_url, paths })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.shard_base_url.clone(),
            config.shard_paths.clone(),
            &config.http_user_agent,
            config.shard_timeout_ms,
        )
    }

    fn locate(&self, shard: &str) -> ShardLocation {
        if shard.starts_with("http://") || shard.starts_with("https://") {
            return ShardLocation::Http(shard.to_string());
        }
        if let Some(path) = shard.strip_prefix("file://") {
            return ShardLocation::File(PathBuf::from(path));
        }
        let base = self.base_url.trim_end_matches('/');
        if base.starts_with("http://") || base.starts_with("https://") {
            ShardLocation::Http(format!("{}/{}", base, shard.trim_start_matches('/')))
        } else if base.is_empty() {
            ShardLocation::File(PathBuf::from(shard))
        } else {
            ShardLocation::File(PathBuf::from(base.strip_prefix("file://").unwrap_or(base)).join(shard))
        }
    }

    async fn download(&self, shard: &str, url: &str) -> Result<Bytes> {
        let fetch_err = |message: String| RetrievalError::ShardFetch { shard: shard.to_string(), message };
        let response = self.client
            .get(url)
            .header("Accept", "application/json, application/gzip, */*")
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_err(format!("HTTP {}", response.status())));
        }
        response.bytes().await.map_err(|e| fetch_err(e.to_string()))
    }
}

#[async_trait]
impl ShardSource for HttpShardSource {
    fn shard_names(&self) -> Vec<String> {
        self.paths.clone()
    }

    async fn open(&self, shard: &str) -> Result<ShardRecords> {
        let body = match self.locate(shard) {
            ShardLocation::Http(url) => {
                tracing::info!(shard = %shard, url = %url, "Fetching shard");
                self.download(shard, &url).await?
            }
            ShardLocation::File(path) => {
                tracing::info!(shard = %shard, path = %path.display(), "Reading shard from disk");
                let data = tokio::fs::read(&path).await.map_err(|e| RetrievalError::ShardFetch {
                    shard: shard.to_string(),
                    message: e.to_string(),
                })?;
                Bytes::from(data)
            }
        };
        Ok(decode_records(shard, body))
    }
}

/// Wraps a (possibly gzip-compressed) JSONL body in a lazy record iterator.
pub fn decode_records(shard: &str, body: Bytes) -> ShardRecords {
    let reader: Box<dyn BufRead + Send> = if body.starts_with(&GZIP_MAGIC) {
        Box::new(BufReader::new(MultiGzDecoder::new(Cursor::new(body))))
    } else {
        Box::new(BufReader::new(Cursor::new(body)))
    };
    Box::new(JsonLines { reader, shard: shard.to_string(), line_no: 0, done: false })
}

struct JsonLines {
    reader: Box<dyn BufRead + Send>,
    shard: String,
    line_no: usize,
    done: bool,
}

impl Iterator for JsonLines {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut line = String::new();
        loop {
            line.clear();
            self.line_no += 1;
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(_) if line.trim().is_empty() => continue,
                Ok(_) => {
                    return Some(serde_json::from_str::<Value>(line.trim()).map_err(|e| {
                        self.done = true;
                        RetrievalError::ShardFetch {
                            shard: self.shard.clone(),
                            message: format!("line {}: {}", self.line_no, e),
                        }
                    }));
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(RetrievalError::ShardFetch {
                        shard: self.shard.clone(),
                        message: format!("line {}: {}", self.line_no, e),
                    }));
                }
            }
        }
    }
}
