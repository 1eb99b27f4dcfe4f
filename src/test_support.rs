//! In-memory doubles for the collaborator traits, shared by unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::clients::{Embedder, KeywordIndex, VectorIndex};
use crate::handlers::{ShardRecords, ShardSource};
use crate::models::*;
use crate::processing::AssetFetcher;

/// Serves a fixed map of reference -> bytes; anything else is a fetch error.
#[derive(Clone, Default)]
pub struct FakeFetcher {
    assets: Arc<HashMap<String, Vec<u8>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeFetcher {
    pub fn new(assets: &[(&str, &[u8])]) -> Self {
        let assets = assets.iter().map(|(k, v)| (k.to_string(), v.to_vec())).collect();
        Self { assets: Arc::new(assets), calls: Arc::default() }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssetFetcher for FakeFetcher {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push(reference.to_string());
        self.assets.get(reference).cloned().ok_or_else(|| RetrievalError::AssetFetch {
            reference: reference.to_string(),
            message: "HTTP 404 Not Found".into(),
        })
    }
}

/// Returns `dimension`-long vectors whose first component is the input length.
#[derive(Clone)]
pub struct FakeEmbedder {
    dimension: usize,
    failing: Arc<HashSet<Vec<u8>>>,
}

impl FakeEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension, failing: Arc::default() }
    }

    /// Inputs (image bytes or text) that make the embedder fail.
    pub fn failing_on(mut self, inputs: &[&[u8]]) -> Self {
        self.failing = Arc::new(inputs.iter().map(|i| i.to_vec()).collect());
        self
    }

    fn vector_for(&self, input: &[u8]) -> Result<Vec<f32>> {
        if self.failing.contains(input) {
            return Err(RetrievalError::Embedding("model rejected input".into()));
        }
        let mut v = vec![0.0; self.dimension];
        if let Some(first) = v.first_mut() {
            *first = input.len() as f32;
        }
        Ok(v)
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>> {
        self.vector_for(image)
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        self.vector_for(text.as_bytes())
    }
}

#[derive(Default)]
struct VectorState {
    collection: Option<(usize, Distance)>,
    points: BTreeMap<u64, Point>,
    upsert_calls: usize,
    create_calls: usize,
    upsert_batches: Vec<Vec<u64>>,
}

/// Collection-backed point store keyed by id. Upserts overwrite.
#[derive(Default)]
pub struct FakeVectorIndex {
    state: Mutex<VectorState>,
    fail_upsert_calls: HashSet<usize>,
    search_result: Option<std::result::Result<RankList, String>>,
    delay: Option<Duration>,
}

impl FakeVectorIndex {
    pub fn with_collection(dimension: usize, distance: Distance) -> Self {
        let index = Self::default();
        index.state.lock().unwrap().collection = Some((dimension, distance));
        index
    }

    /// 1-based upsert call numbers that fail with `StoreWrite`.
    pub fn failing_upserts(mut self, calls: &[usize]) -> Self {
        self.fail_upsert_calls = calls.iter().copied().collect();
        self
    }

    pub fn returning(mut self, ranks: RankList) -> Self {
        self.search_result = Some(Ok(ranks));
        self
    }

    pub fn failing_search(mut self, message: &str) -> Self {
        self.search_result = Some(Err(message.to_string()));
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn ids(&self) -> Vec<u64> {
        self.state.lock().unwrap().points.keys().copied().collect()
    }

    pub fn point(&self, id: u64) -> Option<Point> {
        self.state.lock().unwrap().points.get(&id).cloned()
    }

    pub fn upsert_calls(&self) -> usize {
        self.state.lock().unwrap().upsert_calls
    }

    /// Ids of every upsert attempt, in call order.
    pub fn upsert_batches(&self) -> Vec<Vec<u64>> {
        self.state.lock().unwrap().upsert_batches.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }
}

#[async_trait]
impl VectorIndex for FakeVectorIndex {
    async fn search(&self, _vector: &[f32], limit: usize) -> Result<RankList> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.search_result {
            Some(Ok(ranks)) => Ok(ranks.iter().copied().take(limit).collect()),
            Some(Err(msg)) => Err(RetrievalError::Store(msg.clone())),
            None => Ok(self.ids().into_iter().take(limit).collect()),
        }
    }

    async fn upsert(&self, points: &[Point]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.upsert_calls += 1;
        state.upsert_batches.push(points.iter().map(|p| p.id).collect());
        if self.fail_upsert_calls.contains(&state.upsert_calls) {
            return Err(RetrievalError::StoreWrite(format!("injected failure on call {}", state.upsert_calls)));
        }
        for p in points {
            state.points.insert(p.id, p.clone());
        }
        Ok(())
    }

    async fn collection_info(&self) -> Result<Option<CollectionInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state.collection.map(|(dimension, distance)| CollectionInfo {
            dimension,
            distance,
            points_count: state.points.len() as u64,
        }))
    }

    async fn create_collection(&self, dimension: usize, distance: Distance) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        state.collection = Some((dimension, distance));
        Ok(())
    }

    async fn delete_collection(&self) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.points.clear();
        Ok(state.collection.take().is_some())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.state.lock().unwrap().points.len() as u64)
    }
}

/// Keyword backend with a canned ranking; records mirrored documents.
#[derive(Default)]
pub struct FakeKeywordIndex {
    result: Option<std::result::Result<RankList, String>>,
    delay: Option<Duration>,
    indexed: Mutex<Vec<u64>>,
}

impl FakeKeywordIndex {
    pub fn returning(ranks: RankList) -> Self {
        Self { result: Some(Ok(ranks)), ..Self::default() }
    }

    pub fn failing(message: &str) -> Self {
        Self { result: Some(Err(message.to_string())), ..Self::default() }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn indexed(&self) -> Vec<u64> {
        self.indexed.lock().unwrap().clone()
    }
}

#[async_trait]
impl KeywordIndex for FakeKeywordIndex {
    async fn search(&self, _text: &str, _filters: Option<&Value>, limit: usize) -> Result<RankList> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.result {
            Some(Ok(ranks)) => Ok(ranks.iter().copied().take(limit).collect()),
            Some(Err(msg)) => Err(RetrievalError::KeywordIndex(msg.clone())),
            None => Ok(Vec::new()),
        }
    }

    async fn index_points(&self, points: &[Point]) -> Result<()> {
        self.indexed.lock().unwrap().extend(points.iter().map(|p| p.id));
        Ok(())
    }
}

/// Shards held in memory as raw JSON records.
#[derive(Default)]
pub struct FakeShardSource {
    shards: Vec<(String, Vec<Value>)>,
    unavailable: HashSet<String>,
}

impl FakeShardSource {
    pub fn new(shards: Vec<(&str, Vec<Value>)>) -> Self {
        Self {
            shards: shards.into_iter().map(|(n, r)| (n.to_string(), r)).collect(),
            unavailable: HashSet::new(),
        }
    }

    /// Lists `name` but fails to open it.
    pub fn with_unavailable(mut self, name: &str) -> Self {
        self.shards.push((name.to_string(), Vec::new()));
        self.unavailable.insert(name.to_string());
        self
    }
}

#[async_trait]
impl ShardSource for FakeShardSource {
    fn shard_names(&self) -> Vec<String> {
        self.shards.iter().map(|(n, _)| n.clone()).collect()
    }

    async fn open(&self, shard: &str) -> Result<ShardRecords> {
        if self.unavailable.contains(shard) {
            return Err(RetrievalError::ShardFetch { shard: shard.to_string(), message: "HTTP 503".into() });
        }
        let records = self
            .shards
            .iter()
            .find(|(n, _)| n == shard)
            .map(|(_, r)| r.clone())
            .ok_or_else(|| RetrievalError::ShardFetch { shard: shard.to_string(), message: "unknown shard".into() })?;
        Ok(Box::new(records.into_iter().map(Ok::<Value, RetrievalError>)))
    }
}
