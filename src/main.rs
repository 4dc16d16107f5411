//! RiskWatch pipeline binary: wires the event store, stream substrate, and
//! every stage worker pool together and runs until a shutdown signal arrives.

use anyhow::{Context, Result};
use riskwatch_backend::alerting::AlertingStage;
use riskwatch_backend::config::Config;
use riskwatch_backend::connector::Connector;
use riskwatch_backend::embeddings::EmbeddingClient;
use riskwatch_backend::extraction::ExtractionStage;
use riskwatch_backend::graph::GraphCache;
use riskwatch_backend::ingestion::IngestionStage;
use riskwatch_backend::llm::OpenRouterClient;
use riskwatch_backend::models::{Company, Supplier};
use riskwatch_backend::scoring::ScoringStage;
use riskwatch_backend::store::EventStore;
use riskwatch_backend::stream::memory::InMemoryStreamSubstrate;
use riskwatch_backend::stream::redis_stream::RedisStreamSubstrate;
use riskwatch_backend::stream::StreamSubstrate;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "riskwatch_backend=info,riskwatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Seeds the company profile from `path` if the store has none yet.
fn seed_company(store: &EventStore, path: &str) -> Result<()> {
    if store.get_company()?.is_some() {
        return Ok(());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read company seed file at {path}"))?;
    let company: Company =
        serde_json::from_str(&raw).context("failed to parse company seed JSON")?;
    store.put_company(&company)?;
    info!(path, company = company.display_name, "seeded company profile");
    Ok(())
}

/// Seeds suppliers from `path` if the store has none yet.
fn seed_suppliers(store: &EventStore, path: &str) -> Result<()> {
    if !store.list_suppliers()?.is_empty() {
        return Ok(());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read supplier seed file at {path}"))?;
    let suppliers: Vec<Supplier> =
        serde_json::from_str(&raw).context("failed to parse supplier seed JSON")?;
    let count = suppliers.len();
    for supplier in &suppliers {
        store.put_supplier(supplier)?;
    }
    info!(path, count, "seeded suppliers");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = Config::from_env();

    info!(
        fetch_interval_minutes = config.fetch_interval_minutes,
        relevance_threshold = config.relevance_threshold,
        alert_threshold = config.alert_threshold,
        "riskwatch pipeline starting"
    );

    let store = Arc::new(
        EventStore::open(&config.store_db_path)
            .with_context(|| format!("failed to open event store at {}", config.store_db_path))?,
    );

    if let Some(path) = &config.company_seed_path {
        seed_company(&store, path)?;
    }
    if let Some(path) = &config.supplier_seed_path {
        seed_suppliers(&store, path)?;
    }
    if store.get_company()?.is_none() {
        warn!("no company profile configured; extraction and scoring will error until one is seeded");
    }

    let substrate: Arc<dyn StreamSubstrate> = if config.use_memory_stream {
        info!("using in-memory stream substrate");
        Arc::new(InMemoryStreamSubstrate::new())
    } else {
        Arc::new(
            RedisStreamSubstrate::connect(&config.redis_url)
                .await
                .with_context(|| format!("failed to connect to redis at {}", config.redis_url))?,
        )
    };

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .context("failed to build shared HTTP client")?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut handles = Vec::new();

    // Ingestion: no external connectors are configured by default; operators
    // register connectors by extending this list (e.g. NewsApiConnector::new(...)).
    let connectors: Vec<Arc<dyn Connector>> = Vec::new();
    let ingestion = Arc::new(IngestionStage::new(
        connectors,
        store.clone(),
        substrate.clone(),
        std::time::Duration::from_secs(config.dedup_ttl_seconds),
    ));
    handles.push(tokio::spawn(ingestion.run_forever(
        std::time::Duration::from_secs(config.fetch_interval_minutes * 60),
        shutdown_rx.clone(),
    )));

    let graph_cache = Arc::new(GraphCache::new(store.clone()));

    match build_extraction_stage(&config, &store, &substrate, &http_client) {
        Ok(extraction) => {
            let extraction = Arc::new(extraction);
            handles.push(tokio::spawn(extraction.run_forever(
                "extraction-1".to_string(),
                config.worker_block(),
                config.worker_batch_size,
                std::time::Duration::from_millis(config.claim_min_idle_ms),
                shutdown_rx.clone(),
            )));
        }
        Err(e) => warn!(error = %e, "extraction stage disabled: missing LLM/embedding credentials"),
    }

    let scoring = Arc::new(ScoringStage::new(
        store.clone(),
        substrate.clone(),
        graph_cache.clone(),
        config.propagation_threshold,
    ));
    handles.push(tokio::spawn(scoring.run_forever(
        "scoring-1".to_string(),
        config.worker_block(),
        config.worker_batch_size,
        std::time::Duration::from_millis(config.claim_min_idle_ms),
        shutdown_rx.clone(),
    )));

    match OpenRouterClient::from_env(http_client.clone()) {
        Ok(llm) => {
            let alerting = Arc::new(AlertingStage::new(
                store.clone(),
                substrate.clone(),
                llm,
                config.alert_threshold,
                config.llm_timeout(),
            ));
            handles.push(tokio::spawn(alerting.run_forever(
                "alerting-1".to_string(),
                config.worker_block(),
                config.worker_batch_size,
                std::time::Duration::from_millis(config.claim_min_idle_ms),
                shutdown_rx.clone(),
            )));
        }
        Err(e) => warn!(error = %e, "alerting stage disabled: missing LLM credentials"),
    }

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown signal received, stopping workers");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        let _ = handle.await;
    }
    info!("riskwatch pipeline stopped");
    Ok(())
}

fn build_extraction_stage(
    config: &Config,
    store: &Arc<EventStore>,
    substrate: &Arc<dyn StreamSubstrate>,
    http_client: &reqwest::Client,
) -> Result<ExtractionStage> {
    let embedding_client = EmbeddingClient::from_env(http_client.clone())?;
    let llm = OpenRouterClient::from_env(http_client.clone())?;
    Ok(ExtractionStage::new(
        store.clone(),
        substrate.clone(),
        embedding_client,
        llm,
        config.relevance_threshold,
        config.embedding_timeout(),
        config.llm_timeout(),
        config.extraction_model_fast.clone(),
        config.extraction_model_capable.clone(),
    ))
}
