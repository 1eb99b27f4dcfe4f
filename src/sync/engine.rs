use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::clients::*;
use crate::config::Config;
use crate::handlers::*;
use crate::identity::stable_id;
use crate::mapping::MetadataNormalizer;
use crate::metrics;
use crate::models::*;
use crate::processing::AssetResolver;
use crate::sync::DeadLetterLog;

#[derive(Debug, Clone)]
pub struct IngestionSettings {
    pub parallelism: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub source_tag: String,
    pub dimension: usize,
}

impl IngestionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            parallelism: config.ingest_parallelism,
            max_retries: config.upsert_max_retries,
            retry_backoff_ms: config.upsert_retry_backoff_ms,
            source_tag: config.source_tag.clone(),
            dimension: config.embedding_dim,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestionSummary {
    /// Points confirmed written to the store.
    pub processed: usize,
    /// Items dropped before reaching a batch (malformed, no asset, embedding failure).
    pub skipped: usize,
    /// Points in batches that exhausted their retries.
    pub failed: usize,
    pub shards_failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionProgress {
    pub shard: String,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

// Normalized record waiting on asset resolution and embedding
struct Candidate {
    key: String,
    primary: String,
    alternates: Vec<String>,
    payload: ProductPayload,
}

/// Streams shards into the vector store: normalize, resolve the image,
/// embed, then upsert in batches keyed by the stable point id.
pub struct IngestionPipeline {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorIndex>,
    keyword_mirror: Option<Arc<dyn KeywordIndex>>,
    resolver: AssetResolver,
    normalizer: MetadataNormalizer,
    dead_letters: Option<DeadLetterLog>,
    settings: IngestionSettings,
}

impl IngestionPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorIndex>,
        resolver: AssetResolver,
        normalizer: MetadataNormalizer,
        settings: IngestionSettings,
    ) -> Self {
        Self {
            embedder,
            store,
            keyword_mirror: None,
            resolver,
            normalizer,
            dead_letters: None,
            settings,
        }
    }

    /// Also bulk-index every written batch into the keyword backend.
    pub fn with_keyword_mirror(mut self, index: Arc<dyn KeywordIndex>) -> Self {
        self.keyword_mirror = Some(index);
        self
    }

    pub fn with_dead_letter_log(mut self, log: DeadLetterLog) -> Self {
        self.dead_letters = Some(log);
        self
    }

    /// Never fails: item, shard and batch errors are logged and counted.
    /// `max_items` caps points written; `Some(0)` means no limit.
    pub async fn run<F>(
        &self,
        source: &dyn ShardSource,
        batch_size: usize,
        max_items: Option<usize>,
        on_progress: F,
    ) -> IngestionSummary
    where
        F: FnMut(&IngestionProgress) + Send,
    {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("ingest", run_id = %run_id);
        let max_items = max_items.filter(|&m| m > 0);
        self.run_inner(run_id, source, batch_size.max(1), max_items, on_progress)
            .instrument(span)
            .await
    }

    async fn run_inner<F>(
        &self,
        run_id: Uuid,
        source: &dyn ShardSource,
        batch_size: usize,
        max_items: Option<usize>,
        mut on_progress: F,
    ) -> IngestionSummary
    where
        F: FnMut(&IngestionProgress) + Send,
    {
        let start = Instant::now();
        let shards = source.shard_names();
        tracing::info!(shards = shards.len(), batch_size, max_items = ?max_items, "Starting ingestion run");

        let mut summary = IngestionSummary::default();
        let mut buffer: Vec<Point> = Vec::with_capacity(batch_size);
        let mut last_shard = String::new();

        'shards: for shard in &shards {
            last_shard = shard.clone();
            let mut records = match source.open(shard).await {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!(shard = %shard, error = %e, "Skipping shard");
                    summary.shards_failed += 1;
                    continue;
                }
            };
            tracing::info!(shard = %shard, "Processing shard");

            let mut exhausted = false;
            while !exhausted {
                // pending points count against the cap until their batch is written
                let remaining = max_items
                    .map(|m| m.saturating_sub(summary.processed + buffer.len()))
                    .unwrap_or(usize::MAX);
                if remaining == 0 {
                    break 'shards;
                }
                let want = (batch_size - buffer.len()).min(remaining);

                let mut window = Vec::with_capacity(want);
                while window.len() < want {
                    match records.next() {
                        None => {
                            exhausted = true;
                            break;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(shard = %shard, error = %e, "Shard stream ended early");
                            summary.shards_failed += 1;
                            exhausted = true;
                            break;
                        }
                        Some(Ok(value)) => match self.prepare(value) {
                            Some(candidate) => window.push(candidate),
                            None => {
                                summary.skipped += 1;
                                metrics::record_item_skipped();
                            }
                        },
                    }
                }

                let built: Vec<Result<Point>> = stream::iter(window.into_iter().map(|c| self.build_point(c)))
                    .buffered(self.settings.parallelism.max(1))
                    .collect()
                    .await;
                for result in built {
                    match result {
                        Ok(point) => buffer.push(point),
                        Err(_) => {
                            summary.skipped += 1;
                            metrics::record_item_skipped();
                        }
                    }
                }

                let cap_pending = max_items.is_some_and(|m| summary.processed + buffer.len() >= m);
                if buffer.len() >= batch_size || cap_pending {
                    self.flush(run_id, &mut buffer, &mut summary).await;
                    on_progress(&progress(shard, &summary));
                }
                if max_items.is_some_and(|m| summary.processed >= m) {
                    tracing::info!(max_items = ?max_items, "Item limit reached; stopping");
                    break 'shards;
                }
            }

            on_progress(&progress(shard, &summary));
        }

        if !buffer.is_empty() {
            self.flush(run_id, &mut buffer, &mut summary).await;
            on_progress(&progress(&last_shard, &summary));
        }

        tracing::info!(
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            shards_failed = summary.shards_failed,
            duration_ms = start.elapsed().as_millis(),
            metrics = %metrics::export_metrics_json(),
            "Ingestion run finished"
        );
        summary
    }

    /// Decodes and normalizes one raw record. `None` means malformed.
    fn prepare(&self, raw: serde_json::Value) -> Option<Candidate> {
        let record: ProductRecord = match serde_json::from_value(raw) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "Malformed record");
                return None;
            }
        };
        let (key, primary) = match (record.key(), record.primary_image()) {
            (Some(k), Some(p)) => (k.to_string(), p.to_string()),
            _ => {
                tracing::debug!(item_id = ?record.item_id, "Record missing item_id or main_image_id");
                return None;
            }
        };
        let payload = self.normalizer.normalize(&record);
        Some(Candidate { key, primary, alternates: record.other_image_id, payload })
    }

    async fn build_point(&self, candidate: Candidate) -> Result<Point> {
        let Candidate { key, primary, alternates, mut payload } = candidate;

        let asset = self.resolver.resolve(&key, &primary, &alternates).await.map_err(|e| {
            tracing::warn!(item_id = %key, error = %e, "Skipping item: no image");
            e
        })?;

        let dimension = self.settings.dimension;
        let vector = self
            .embedder
            .embed_image(&asset.bytes)
            .await
            .and_then(|v| {
                if v.len() == dimension {
                    Ok(v)
                } else {
                    Err(RetrievalError::Embedding(format!("expected {} dimensions, got {}", dimension, v.len())))
                }
            })
            .map_err(|e| {
                tracing::warn!(item_id = %key, error = %e, "Skipping item: embedding failed");
                e
            })?;

        payload.main_image_id = asset.used_ref;
        payload.source = Some(self.settings.source_tag.clone());
        Ok(Point { id: stable_id(&key), vector, payload })
    }

    async fn flush(&self, run_id: Uuid, buffer: &mut Vec<Point>, summary: &mut IngestionSummary) {
        if buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(buffer);
        match self.write_with_retry(&batch).await {
            Ok(()) => {
                summary.processed += batch.len();
                metrics::record_points_upserted(batch.len());
                tracing::info!(batch_size = batch.len(), processed = summary.processed, "Batch upserted");
                if let Some(mirror) = &self.keyword_mirror {
                    if let Err(e) = mirror.index_points(&batch).await {
                        tracing::warn!(batch_size = batch.len(), error = %e, "Keyword mirror failed for batch");
                    }
                }
            }
            Err(e) => {
                summary.failed += batch.len();
                metrics::record_batch_dead_lettered();
                let ids: Vec<u64> = batch.iter().map(|p| p.id).collect();
                tracing::error!(batch_size = batch.len(), point_ids = ?ids, error = %e, "Batch upsert failed after retries");
                match &self.dead_letters {
                    Some(log) => {
                        if let Err(write_err) = log.append(run_id, &e.to_string(), &batch).await {
                            tracing::error!(path = %log.path().display(), error = %write_err, "Failed to write dead-letter entries");
                        }
                    }
                    None => tracing::warn!(batch_size = batch.len(), "No dead-letter log configured; batch dropped"),
                }
            }
        }
    }

    async fn write_with_retry(&self, batch: &[Point]) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            match self.store.upsert(batch).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.settings.max_retries => {
                    let backoff_ms = self.settings.retry_backoff_ms.saturating_mul(1u64 << attempt.min(16));
                    tracing::warn!(attempt = attempt + 1, backoff_ms, batch_size = batch.len(), error = %e, "Batch upsert failed; retrying");
                    metrics::record_batch_retry();
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn progress(shard: &str, summary: &IngestionSummary) -> IngestionProgress {
    IngestionProgress {
        shard: shard.to_string(),
        processed: summary.processed,
        skipped: summary.skipped,
        failed: summary.failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use serde_json::{json, Value};

    const DIM: usize = 4;

    fn record(id: &str, main: &str, others: &[&str]) -> Value {
        json!({
            "item_id": id,
            "main_image_id": main,
            "other_image_id": others,
            "item_name": [{"language_tag": "en_US", "value": format!("Item {id}")}],
        })
    }

    fn settings(max_retries: u32) -> IngestionSettings {
        IngestionSettings { parallelism: 4, max_retries, retry_backoff_ms: 1, source_tag: "ABO".into(), dimension: DIM }
    }

    fn pipeline(fetcher: FakeFetcher, embedder: FakeEmbedder, store: Arc<FakeVectorIndex>, max_retries: u32) -> IngestionPipeline {
        IngestionPipeline::new(
            Arc::new(embedder),
            store,
            AssetResolver::new(Arc::new(fetcher)),
            MetadataNormalizer::new("en_US"),
            settings(max_retries),
        )
    }

    fn images(ids: &[&str]) -> FakeFetcher {
        let owned: Vec<(&str, &[u8])> = ids.iter().map(|id| (*id, id.as_bytes())).collect();
        FakeFetcher::new(&owned)
    }

    #[tokio::test]
    async fn skips_bad_items_without_aborting() {
        let store = Arc::new(FakeVectorIndex::with_collection(DIM, Distance::Cosine));
        let source = FakeShardSource::new(vec![(
            "s0",
            vec![
                record("a", "img-a", &[]),
                json!({"main_image_id": "img-x"}),
                json!({"item_id": "no-image"}),
                json!("not an object"),
                record("b", "img-missing", &[]),
                record("c", "img-c", &[]),
                record("d", "img-d", &[]),
            ],
        )]);
        let embedder = FakeEmbedder::new(DIM).failing_on(&[b"img-c"]);
        let p = pipeline(images(&["img-a", "img-c", "img-d"]), embedder, store.clone(), 0);

        let summary = p.run(&source, 10, None, |_| {}).await;
        assert_eq!(summary, IngestionSummary { processed: 2, skipped: 5, failed: 0, shards_failed: 0 });
        let mut expected = vec![stable_id("a"), stable_id("d")];
        expected.sort();
        assert_eq!(store.ids(), expected);
    }

    #[tokio::test]
    async fn wrong_dimension_embedding_is_skipped() {
        let store = Arc::new(FakeVectorIndex::with_collection(DIM, Distance::Cosine));
        let source = FakeShardSource::new(vec![("s0", vec![record("a", "img-a", &[])])]);
        let p = pipeline(images(&["img-a"]), FakeEmbedder::new(DIM + 1), store.clone(), 0);

        let summary = p.run(&source, 10, None, |_| {}).await;
        assert_eq!((summary.processed, summary.skipped), (0, 1));
        assert_eq!(store.upsert_calls(), 0);
    }

    #[tokio::test]
    async fn persists_the_used_image_reference() {
        let store = Arc::new(FakeVectorIndex::with_collection(DIM, Distance::Cosine));
        let source = FakeShardSource::new(vec![("s0", vec![record("a", "img-gone", &["", "img-b", "img-c"])])]);
        let p = pipeline(images(&["img-b", "img-c"]), FakeEmbedder::new(DIM), store.clone(), 0);

        p.run(&source, 10, None, |_| {}).await;
        let point = store.point(stable_id("a")).unwrap();
        assert_eq!(point.payload.main_image_id, "img-b");
        assert_eq!(point.payload.source.as_deref(), Some("ABO"));
        assert_eq!(point.payload.title.as_deref(), Some("Item a"));
        assert_eq!(point.payload.item_id, "a");
    }

    #[tokio::test]
    async fn failed_second_batch_keeps_first_batch_processed() {
        let dir = tempfile::tempdir().unwrap();
        let dead = dir.path().join("dead.jsonl");
        let store = Arc::new(FakeVectorIndex::with_collection(DIM, Distance::Cosine).failing_upserts(&[2]));
        let source = FakeShardSource::new(vec![(
            "s0",
            vec![
                record("a", "img-a", &[]),
                record("b", "img-b", &[]),
                record("c", "img-c", &[]),
                record("d", "img-d", &[]),
            ],
        )]);
        let p = pipeline(images(&["img-a", "img-b", "img-c", "img-d"]), FakeEmbedder::new(DIM), store.clone(), 0)
            .with_dead_letter_log(DeadLetterLog::new(&dead));

        let summary = p.run(&source, 2, None, |_| {}).await;
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(store.upsert_batches(), vec![
            vec![stable_id("a"), stable_id("b")],
            vec![stable_id("c"), stable_id("d")],
        ]);
        assert_eq!(store.count().await.unwrap(), 2);

        let lines: Vec<Value> = std::fs::read_to_string(&dead)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["point"]["id"], stable_id("c"));
        assert!(lines[0]["error"].as_str().unwrap().contains("injected failure"));
    }

    #[tokio::test]
    async fn retries_recover_a_failed_batch() {
        let store = Arc::new(FakeVectorIndex::with_collection(DIM, Distance::Cosine).failing_upserts(&[1, 2]));
        let source = FakeShardSource::new(vec![("s0", vec![record("a", "img-a", &[]), record("b", "img-b", &[])])]);
        let p = pipeline(images(&["img-a", "img-b"]), FakeEmbedder::new(DIM), store.clone(), 3);

        let summary = p.run(&source, 2, None, |_| {}).await;
        assert_eq!((summary.processed, summary.failed), (2, 0));
        assert_eq!(store.upsert_calls(), 3);
    }

    #[tokio::test]
    async fn reingesting_a_key_yields_one_point() {
        let store = Arc::new(FakeVectorIndex::with_collection(DIM, Distance::Cosine));
        let source = FakeShardSource::new(vec![
            ("s0", vec![record("same", "img-a", &[])]),
            ("s1", vec![record("same", "img-a", &[])]),
        ]);
        let p = pipeline(images(&["img-a"]), FakeEmbedder::new(DIM), store.clone(), 0);

        let first = p.run(&source, 1, None, |_| {}).await;
        let second = p.run(&source, 1, None, |_| {}).await;
        assert_eq!(first.processed, 2);
        assert_eq!(second.processed, 2);
        assert_eq!(store.ids(), vec![stable_id("same")]);
    }

    #[tokio::test]
    async fn max_items_stops_across_shards() {
        let store = Arc::new(FakeVectorIndex::with_collection(DIM, Distance::Cosine));
        let source = FakeShardSource::new(vec![
            ("s0", vec![record("a", "img-a", &[]), record("b", "img-b", &[])]),
            ("s1", vec![record("c", "img-c", &[]), record("d", "img-d", &[]), record("e", "img-e", &[])]),
        ]);
        let p = pipeline(images(&["img-a", "img-b", "img-c", "img-d", "img-e"]), FakeEmbedder::new(DIM), store.clone(), 0);

        let summary = p.run(&source, 2, Some(3), |_| {}).await;
        assert_eq!(summary.processed, 3);
        assert_eq!(store.upsert_batches(), vec![
            vec![stable_id("a"), stable_id("b")],
            vec![stable_id("c")],
        ]);
    }

    #[tokio::test]
    async fn max_items_counts_written_points_not_failed_batches() {
        let store = Arc::new(FakeVectorIndex::with_collection(DIM, Distance::Cosine).failing_upserts(&[1]));
        let source = FakeShardSource::new(vec![(
            "s0",
            vec![
                record("a", "img-a", &[]),
                record("b", "img-b", &[]),
                record("c", "img-c", &[]),
                record("d", "img-d", &[]),
                record("e", "img-e", &[]),
            ],
        )]);
        let p = pipeline(images(&["img-a", "img-b", "img-c", "img-d", "img-e"]), FakeEmbedder::new(DIM), store.clone(), 0);

        let summary = p.run(&source, 2, Some(2), |_| {}).await;
        assert_eq!((summary.processed, summary.failed), (2, 2));
        assert_eq!(store.ids(), {
            let mut ids = vec![stable_id("c"), stable_id("d")];
            ids.sort();
            ids
        });
        assert_eq!(store.upsert_calls(), 2);
    }

    #[tokio::test]
    async fn zero_max_items_means_no_limit() {
        let store = Arc::new(FakeVectorIndex::with_collection(DIM, Distance::Cosine));
        let source = FakeShardSource::new(vec![("s0", vec![record("a", "img-a", &[]), record("b", "img-b", &[])])]);
        let p = pipeline(images(&["img-a", "img-b"]), FakeEmbedder::new(DIM), store, 0);

        let summary = p.run(&source, 5, Some(0), |_| {}).await;
        assert_eq!(summary.processed, 2);
    }

    #[tokio::test]
    async fn unavailable_shard_is_skipped() {
        let store = Arc::new(FakeVectorIndex::with_collection(DIM, Distance::Cosine));
        let source = FakeShardSource::new(vec![("s0", vec![record("a", "img-a", &[])])]).with_unavailable("s1");
        let p = pipeline(images(&["img-a"]), FakeEmbedder::new(DIM), store.clone(), 0);

        let summary = p.run(&source, 5, None, |_| {}).await;
        assert_eq!(summary, IngestionSummary { processed: 1, skipped: 0, failed: 0, shards_failed: 1 });
    }

    #[tokio::test]
    async fn reports_progress_after_flushes_and_shards() {
        let store = Arc::new(FakeVectorIndex::with_collection(DIM, Distance::Cosine));
        let source = FakeShardSource::new(vec![(
            "s0",
            vec![record("a", "img-a", &[]), record("b", "img-b", &[]), record("c", "img-c", &[])],
        )]);
        let p = pipeline(images(&["img-a", "img-b", "img-c"]), FakeEmbedder::new(DIM), store, 0);

        let mut events = Vec::new();
        p.run(&source, 2, None, |ev| events.push(ev.clone())).await;
        let processed: Vec<usize> = events.iter().map(|e| e.processed).collect();
        assert_eq!(processed, vec![2, 2, 3]);
        assert!(events.iter().all(|e| e.shard == "s0"));
    }

    #[tokio::test]
    async fn mirrors_written_batches_to_keyword_index() {
        let store = Arc::new(FakeVectorIndex::with_collection(DIM, Distance::Cosine).failing_upserts(&[2]));
        let keyword = Arc::new(FakeKeywordIndex::default());
        let source = FakeShardSource::new(vec![("s0", vec![record("a", "img-a", &[]), record("b", "img-b", &[])])]);
        let p = pipeline(images(&["img-a", "img-b"]), FakeEmbedder::new(DIM), store, 0)
            .with_keyword_mirror(keyword.clone());

        p.run(&source, 1, None, |_| {}).await;
        assert_eq!(keyword.indexed(), vec![stable_id("a")]);
    }
}
