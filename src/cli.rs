use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use retrieval_core::{
    AssetResolver, CollectionManager, Config, DeadLetterLog, Embedder, ElasticsearchClient,
    EmbeddingsServiceClient, FusionSettings, HttpAssetFetcher, HttpShardSource, HybridSearcher,
    IngestionPipeline, IngestionSettings, KeywordIndex, MetadataNormalizer, QdrantClient, VectorIndex,
};

#[derive(Parser)]
#[command(name = "retrieval-core")]
#[command(about = "Product ingestion and hybrid retrieval")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Stream source shards into the vector collection
    Ingest {
        /// Drop and recreate the collection first
        #[arg(long)]
        reset: bool,
        /// Stop once this many points are written (0 means no limit)
        #[arg(long = "max")]
        max_items: Option<usize>,
        /// Points per upsert (defaults to BATCH_SIZE)
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Create the collection if missing and check its shape
    Ensure {
        #[arg(long)]
        reset: bool,
    },
    /// Run a fused keyword + vector query
    Search {
        #[arg(long)]
        query: String,
        /// Embed this image instead of the query text
        #[arg(long)]
        image: Option<PathBuf>,
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },
}

fn vector_index(cfg: &Config) -> Result<Arc<QdrantClient>> {
    Ok(Arc::new(QdrantClient::new(
        cfg.qdrant_url.clone(),
        cfg.collection_name.clone(),
        cfg.qdrant_api_key.as_deref(),
        cfg.http_timeout_ms,
    )?))
}

fn keyword_index(cfg: &Config) -> Result<Arc<ElasticsearchClient>> {
    Ok(Arc::new(ElasticsearchClient::new(
        cfg.elasticsearch_url.clone(),
        cfg.keyword_index.clone(),
        cfg.http_timeout_ms,
    )?))
}

fn embedder(cfg: &Config) -> Result<Arc<EmbeddingsServiceClient>> {
    Ok(Arc::new(EmbeddingsServiceClient::new(
        cfg.embeddings_service_url.clone(),
        cfg.http_timeout_ms,
        cfg.embeddings_image_model.clone(),
        cfg.embeddings_text_model.clone(),
    )?))
}

pub async fn run(cli: Cli, cfg: Config) -> Result<()> {
    match cli.command {
        Command::Ensure { reset } => {
            let manager = CollectionManager::new(vector_index(&cfg)?, cfg.collection_spec(), cfg.collection_validate);
            let outcome = manager.ensure(reset).await?;
            println!("{}", serde_json::json!({ "collection": cfg.collection_name, "outcome": format!("{:?}", outcome) }));
            Ok(())
        }
        Command::Ingest { reset, max_items, batch_size } => run_ingest(&cfg, reset, max_items, batch_size).await,
        Command::Search { query, image, top_k } => run_search(&cfg, &query, image, top_k).await,
    }
}

async fn run_ingest(cfg: &Config, reset: bool, max_items: Option<usize>, batch_size: Option<usize>) -> Result<()> {
    let store = vector_index(cfg)?;
    CollectionManager::new(store.clone(), cfg.collection_spec(), cfg.collection_validate)
        .ensure(reset)
        .await?;

    let fetcher = Arc::new(HttpAssetFetcher::from_config(cfg)?);
    let mut pipeline = IngestionPipeline::new(
        embedder(cfg)?,
        store,
        AssetResolver::new(fetcher),
        MetadataNormalizer::new(cfg.preferred_language.clone()),
        IngestionSettings::from_config(cfg),
    );
    if cfg.mirror_keyword_index {
        pipeline = pipeline.with_keyword_mirror(keyword_index(cfg)?);
    }
    if let Some(path) = &cfg.dead_letter_path {
        pipeline = pipeline.with_dead_letter_log(DeadLetterLog::new(path));
    }

    let source = HttpShardSource::from_config(cfg)?;
    let summary = pipeline
        .run(&source, batch_size.unwrap_or(cfg.batch_size), max_items, |p| {
            tracing::info!(shard = %p.shard, processed = p.processed, skipped = p.skipped, failed = p.failed, "Ingestion progress");
        })
        .await;
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

async fn run_search(cfg: &Config, query: &str, image: Option<PathBuf>, top_k: usize) -> Result<()> {
    let embedder = embedder(cfg)?;
    let vector = match image {
        Some(path) => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading query image {}", path.display()))?;
            embedder.embed_image(&bytes).await?
        }
        None => embedder.embed_text(query).await?,
    };

    let keyword: Arc<dyn KeywordIndex> = keyword_index(cfg)?;
    let store: Arc<dyn VectorIndex> = vector_index(cfg)?;
    let searcher = HybridSearcher::new(keyword, store, FusionSettings::from_config(cfg));
    let hits = searcher.search(query, &vector, top_k, None).await?;
    println!("{}", serde_json::to_string(&hits)?);
    Ok(())
}
