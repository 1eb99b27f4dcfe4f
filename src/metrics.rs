//! Process-local ingestion telemetry, dumped into the run summary log.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use serde::Serialize;

// Upper bounds (ms) of the embedding round-trip buckets; one overflow bucket follows
const EMBEDDING_BOUNDS_MS: [u64; 8] = [25, 50, 100, 200, 400, 800, 1600, 3200];

#[derive(Debug, Clone, Serialize)]
pub struct LatencySnapshot {
    pub bounds_ms: Vec<u64>,
    pub counts: Vec<u64>,
    pub observed: u64,
    pub max_ms: u64,
}

#[derive(Debug)]
struct LatencyHistogram {
    counts: [u64; EMBEDDING_BOUNDS_MS.len() + 1],
    observed: u64,
    max_ms: u64,
}

impl LatencyHistogram {
    const fn new() -> Self {
        Self { counts: [0; EMBEDDING_BOUNDS_MS.len() + 1], observed: 0, max_ms: 0 }
    }

    fn observe(&mut self, ms: u64) {
        let slot = EMBEDDING_BOUNDS_MS.partition_point(|bound| *bound < ms);
        self.counts[slot] += 1;
        self.observed += 1;
        self.max_ms = self.max_ms.max(ms);
    }

    fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            bounds_ms: EMBEDDING_BOUNDS_MS.to_vec(),
            counts: self.counts.to_vec(),
            observed: self.observed,
            max_ms: self.max_ms,
        }
    }
}

#[derive(Default)]
struct IngestionCounters {
    points_upserted: AtomicU64,
    items_skipped: AtomicU64,
    batch_retries: AtomicU64,
    batches_dead_lettered: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionCountsSnapshot {
    pub points_upserted: u64,
    pub items_skipped: u64,
    pub batch_retries: u64,
    pub batches_dead_lettered: u64,
}

static EMBEDDING_LATENCY: Mutex<LatencyHistogram> = Mutex::new(LatencyHistogram::new());
static INGESTION: Lazy<IngestionCounters> = Lazy::new(IngestionCounters::default);

pub fn record_embedding_latency(ms: u64) {
    if let Ok(mut h) = EMBEDDING_LATENCY.lock() {
        h.observe(ms);
    }
}

pub fn record_points_upserted(n: usize) {
    INGESTION.points_upserted.fetch_add(n as u64, Ordering::Relaxed);
}

pub fn record_item_skipped() {
    INGESTION.items_skipped.fetch_add(1, Ordering::Relaxed);
}

pub fn record_batch_retry() {
    INGESTION.batch_retries.fetch_add(1, Ordering::Relaxed);
}

pub fn record_batch_dead_lettered() {
    INGESTION.batches_dead_lettered.fetch_add(1, Ordering::Relaxed);
}

pub fn ingestion_counts() -> IngestionCountsSnapshot {
    IngestionCountsSnapshot {
        points_upserted: INGESTION.points_upserted.load(Ordering::Relaxed),
        items_skipped: INGESTION.items_skipped.load(Ordering::Relaxed),
        batch_retries: INGESTION.batch_retries.load(Ordering::Relaxed),
        batches_dead_lettered: INGESTION.batches_dead_lettered.load(Ordering::Relaxed),
    }
}

pub fn export_metrics_json() -> serde_json::Value {
    let latency = EMBEDDING_LATENCY.lock().ok().map(|h| h.snapshot());
    serde_json::json!({
        "embedding_latency_ms": latency,
        "ingestion": ingestion_counts(),
    })
}
