//! leadflow-ls - Lead Scoring Service
//!
//! Pulls sales leads out of dealer CRM systems (VinSolutions, CDK,
//! Reynolds), reconciles them into a local store, trains a conversion
//! model on closed leads and serves live predictions over HTTP, pushing
//! scores back into the originating CRM.

use anyhow::Result;
use clap::{Parser, Subcommand};
use leadflow_common::config::Config;
use leadflow_common::db::init_database;
use leadflow_common::model::CrmSource;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use leadflow_ls::connectors::build_connectors;
use leadflow_ls::ingest::run_ingest;
use leadflow_ls::scoring::ScorerHandle;
use leadflow_ls::training::{run_training, TrainOptions};
use leadflow_ls::writeback::WritebackOrchestrator;
use leadflow_ls::AppState;

#[derive(Parser, Debug)]
#[command(name = "leadflow-ls")]
#[command(about = "Lead scoring service for dealer CRM systems")]
#[command(version)]
struct Args {
    /// Config file (falls back to LEADFLOW_CONFIG, then leadflow.toml)
    #[arg(short, long, env = "LEADFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and schema, then exit
    InitStore,
    /// Run one ingest cycle across the configured CRM sources
    Ingest {
        /// Restrict the cycle to a single source
        #[arg(short, long)]
        source: Option<CrmSource>,
    },
    /// Train the conversion model on closed leads and save the artifact
    Train,
    /// Serve the prediction API
    Serve {
        /// Port to listen on, overriding the config
        #[arg(short, long, env = "LEADFLOW_PORT")]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leadflow_ls=info,leadflow_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::resolve(args.config.as_deref())?;

    match args.command {
        Command::InitStore => init_store(&config).await,
        Command::Ingest { source } => ingest(&config, source).await,
        Command::Train => train(&config).await,
        Command::Serve { port } => serve(&config, port).await,
    }
}

async fn init_store(config: &Config) -> Result<()> {
    let pool = init_database(&config.database_path).await?;
    pool.close().await;
    info!(path = %config.database_path.display(), "Store initialized");
    Ok(())
}

async fn ingest(config: &Config, source: Option<CrmSource>) -> Result<()> {
    let pool = init_database(&config.database_path).await?;
    let connectors = build_connectors(config);
    if connectors.is_empty() {
        anyhow::bail!("No CRM connectors configured");
    }

    let report = run_ingest(&pool, &connectors, &config.ingest, source).await;
    for src in &report.sources {
        match &src.error {
            None => info!(
                source = src.source.as_str(),
                fetched = src.fetched,
                created = src.created,
                updated = src.updated,
                failed = src.failed,
                "Source complete"
            ),
            Some(e) => warn!(source = src.source.as_str(), error = %e, "Source failed"),
        }
    }

    if report.all_succeeded() {
        Ok(())
    } else {
        anyhow::bail!("One or more sources failed to ingest")
    }
}

async fn train(config: &Config) -> Result<()> {
    let pool = init_database(&config.database_path).await?;
    if let Some(parent) = config.model_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let metrics = run_training(&pool, &config.model_path, &TrainOptions::default()).await?;
    info!(
        accuracy = metrics.accuracy,
        log_loss = metrics.log_loss,
        roc_auc = ?metrics.roc_auc,
        "Training complete"
    );
    Ok(())
}

async fn serve(config: &Config, port_override: Option<u16>) -> Result<()> {
    let pool = init_database(&config.database_path).await?;
    let connectors = build_connectors(config);

    // Serving without a model is allowed; /predict answers 503 until a
    // train + reload happens
    let scorer = ScorerHandle::empty();
    match scorer.reload(&config.model_path).await {
        Ok(()) => {}
        Err(e) => warn!(
            path = %config.model_path.display(),
            error = %e,
            "No model loaded at startup, serving degraded"
        ),
    }

    let writeback = Arc::new(WritebackOrchestrator::new(
        pool.clone(),
        connectors,
        config.writeback.retry_budget,
    ));
    let state = AppState::new(pool, scorer, writeback, config.model_path.clone());
    let app = leadflow_ls::build_router(state);

    let port = port_override.unwrap_or(config.serve.port);
    let addr = format!("{}:{}", config.serve.host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
