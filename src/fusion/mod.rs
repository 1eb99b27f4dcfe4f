use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::clients::{KeywordIndex, VectorIndex};
use crate::config::Config;
use crate::models::*;

pub const DEFAULT_RRF_K: f64 = 60.0;

/// What to do when exactly one retrieval backend fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FusionPolicy {
    /// Any backend failure fails the query.
    #[default]
    Strict,
    /// Fuse whichever list survived; fail only if both backends fail.
    FallbackToSurvivor,
}

#[derive(Debug, Clone)]
pub struct FusionSettings {
    pub k: f64,
    pub candidates: usize,
    pub timeout_ms: u64,
    pub policy: FusionPolicy,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self { k: DEFAULT_RRF_K, candidates: 100, timeout_ms: 5_000, policy: FusionPolicy::Strict }
    }
}

impl FusionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            k: config.rrf_k,
            candidates: config.fusion_candidates,
            timeout_ms: config.fusion_timeout_ms,
            policy: if config.fusion_fallback { FusionPolicy::FallbackToSurvivor } else { FusionPolicy::Strict },
        }
    }
}

/// Reciprocal Rank Fusion: each id at zero-based position `pos` of a list
/// gains `1 / (k + pos)`. Sorted by score descending, ties by id ascending.
pub fn rrf(lists: &[RankList], k: f64) -> Vec<FusedHit> {
    let mut scores: HashMap<u64, f64> = HashMap::new();
    for list in lists {
        for (pos, id) in list.iter().enumerate() {
            *scores.entry(*id).or_insert(0.0) += 1.0 / (k + pos as f64);
        }
    }
    let mut hits: Vec<FusedHit> = scores.into_iter().map(|(id, score)| FusedHit { id, score }).collect();
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
    hits
}

/// Runs keyword and vector retrieval concurrently and fuses the rankings.
pub struct HybridSearcher {
    keyword: Arc<dyn KeywordIndex>,
    vector: Arc<dyn VectorIndex>,
    settings: FusionSettings,
}

impl HybridSearcher {
    pub fn new(keyword: Arc<dyn KeywordIndex>, vector: Arc<dyn VectorIndex>, settings: FusionSettings) -> Self {
        Self { keyword, vector, settings }
    }

    pub fn settings(&self) -> &FusionSettings {
        &self.settings
    }

    pub async fn search(
        &self,
        query_text: &str,
        query_vector: &[f32],
        top_k: usize,
        filters: Option<&Value>,
    ) -> Result<Vec<FusedHit>> {
        let limit = self.settings.candidates.max(top_k);
        let timeout = Duration::from_millis(self.settings.timeout_ms);

        let (keyword_res, vector_res) = tokio::join!(
            bounded("keyword", timeout, self.keyword.search(query_text, filters, limit)),
            bounded("vector", timeout, self.vector.search(query_vector, limit)),
        );

        let lists = match (keyword_res, vector_res) {
            (Ok(kw), Ok(vec)) => vec![kw, vec],
            (Err(e), Ok(survivor)) | (Ok(survivor), Err(e)) => match self.settings.policy {
                FusionPolicy::Strict => return Err(e),
                FusionPolicy::FallbackToSurvivor => {
                    tracing::warn!(error = %e, survivors = survivor.len(), "Retrieval backend failed; fusing surviving list only");
                    vec![survivor]
                }
            },
            (Err(kw), Err(vec)) => {
                tracing::error!(keyword_error = %kw, vector_error = %vec, "Both retrieval backends failed");
                return Err(kw);
            }
        };

        let mut fused = rrf(&lists, self.settings.k);
        fused.truncate(top_k);
        tracing::debug!(lists = lists.len(), fused = fused.len(), top_k, "Hybrid query fused");
        Ok(fused)
    }
}

/// Applies the per-backend timeout and tags any failure with the backend name.
async fn bounded<F>(backend: &'static str, timeout: Duration, fut: F) -> Result<RankList>
where
    F: Future<Output = Result<RankList>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(list)) => Ok(list),
        Ok(Err(e)) => Err(RetrievalError::FusionBackend { backend, message: e.to_string() }),
        Err(_) => Err(RetrievalError::FusionBackend {
            backend,
            message: format!("timed out after {}ms", timeout.as_millis()),
        }),
    }
}
