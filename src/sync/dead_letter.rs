use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::models::*;

/// Append-only JSONL file of points whose batch could not be written.
/// One line per point so entries can be replayed individually.
#[derive(Debug, Clone)]
pub struct DeadLetterLog {
    path: PathBuf,
}

impl DeadLetterLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, run_id: Uuid, error: &str, points: &[Point]) -> Result<()> {
        let failed_at = Utc::now().to_rfc3339();
        let mut buf = Vec::new();
        for point in points {
            let line = json!({
                "run_id": run_id.to_string(),
                "error": error,
                "failed_at": failed_at,
                "point": point,
            });
            serde_json::to_writer(&mut buf, &line)?;
            buf.push(b'\n');
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(())
    }
}
