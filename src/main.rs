use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod cli;

use retrieval_core::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Optional .env in the working directory; real env vars win
    let _ = dotenvy::dotenv();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Cli::parse();
    let cfg = Config::from_env();
    tracing::info!(
        qdrant = %cfg.qdrant_url,
        collection = %cfg.collection_name,
        dimension = cfg.embedding_dim,
        distance = %cfg.vector_distance,
        "Loaded configuration"
    );

    cli::run(args, cfg).await
}
