//! cinefacts-resolver - fact resolution service and maintenance CLI
//!
//! `serve` runs the HTTP query surface. The other subcommands run one
//! pipeline operation against the same store and exit.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cinefacts_common::config::{load_or_default, RootFolderInitializer, RootFolderResolver, TomlConfig};
use cinefacts_common::logging::init_tracing;
use cinefacts_resolver::config::ResolutionPolicy;
use cinefacts_resolver::db::{FactStore, InMemoryFactStore, SqliteFactStore};
use cinefacts_resolver::sources::IngestBatch;
use cinefacts_resolver::types::FieldValue;
use cinefacts_resolver::workflow::pipeline::Curation;
use cinefacts_resolver::workflow::ResolutionPipeline;
use cinefacts_resolver::AppState;

const MODULE_NAME: &str = "cinefacts-resolver";

#[derive(Parser, Debug)]
#[command(name = "cinefacts-resolver")]
#[command(about = "Multi-source fact resolution and trust scoring for Telugu cinema data")]
#[command(version)]
struct Cli {
    /// Root folder holding the database and policy file
    #[arg(short, long, global = true, env = "CINEFACTS_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Resolution policy file (overrides the bootstrap config)
    #[arg(long, global = true, env = "CINEFACTS_POLICY")]
    policy: Option<PathBuf>,

    /// Use an in-memory store; nothing is persisted
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP query surface
    Serve {
        #[arg(short, long, env = "CINEFACTS_PORT")]
        port: Option<u16>,
    },
    /// Store a fetcher batch (JSON file)
    Ingest {
        file: PathBuf,
        /// Re-resolve the touched entities afterwards
        #[arg(long)]
        resolve: bool,
    },
    /// Resolve the listed entities
    Resolve {
        #[arg(required = true)]
        entity_ids: Vec<String>,
    },
    /// Resolve every entity with stored source records
    ResolveAll {
        #[arg(short, long)]
        concurrency: Option<usize>,
    },
    /// Record an editorial value and re-resolve the entity
    Curate {
        #[arg(long)]
        entity: String,
        #[arg(long)]
        field: String,
        /// JSON value, or plain text
        #[arg(long)]
        value: String,
        #[arg(long)]
        editor: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Print pending review items, oldest first
    ReviewQueue {
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
    /// Print an entity's trust score explanation
    Explain { entity_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_or_default(MODULE_NAME);

    init_tracing(&config.logging)?;

    info!(
        "Starting {} v{} ({} {} {})",
        MODULE_NAME,
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let pipeline = Arc::new(open_pipeline(&cli, &config).await?);

    match cli.command {
        Command::Serve { port } => serve(pipeline, &config, port.unwrap_or(config.port)).await,
        Command::Ingest { file, resolve } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let batch = IngestBatch::from_json(&content)?;
            let report = pipeline.ingest(batch, Utc::now()).await?;
            print_json(&report)?;
            if resolve && !report.entities.is_empty() {
                let batch_report = pipeline
                    .resolve_batch(
                        report.entities.clone(),
                        config.batch_concurrency,
                        &cancel_on_ctrl_c(),
                        Utc::now(),
                    )
                    .await;
                print_json(&batch_report)?;
            }
            Ok(())
        }
        Command::Resolve { entity_ids } => {
            let mut failed = 0;
            for entity_id in entity_ids {
                match pipeline.resolve_entity(&entity_id, Utc::now()).await {
                    Ok(run) => print_json(&run)?,
                    Err(e) => {
                        error!(entity_id = %entity_id, error = %e, "Resolution failed");
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                bail!("{} entities failed to resolve", failed);
            }
            Ok(())
        }
        Command::ResolveAll { concurrency } => {
            let report = pipeline
                .resolve_all(
                    concurrency.unwrap_or(config.batch_concurrency),
                    &cancel_on_ctrl_c(),
                    Utc::now(),
                )
                .await?;
            print_json(&report)
        }
        Command::Curate {
            entity,
            field,
            value,
            editor,
            note,
        } => {
            let value = serde_json::from_str::<FieldValue>(&value)
                .unwrap_or(FieldValue::Text(value));
            let run = pipeline
                .curate(
                    Curation {
                        entity_id: entity,
                        field,
                        value,
                        editor,
                        note,
                    },
                    Utc::now(),
                )
                .await?;
            print_json(&run)
        }
        Command::ReviewQueue { limit } => {
            let items = pipeline.store().review_queue(limit).await?;
            print_json(&items)
        }
        Command::Explain { entity_id } => {
            match pipeline.store().load_trust_score(&entity_id).await? {
                Some(score) => {
                    println!("{}", score.explanation);
                    Ok(())
                }
                None => bail!("No trust score for {}; resolve it first", entity_id),
            }
        }
    }
}

/// Build the store and pipeline from CLI flags and bootstrap config
async fn open_pipeline(cli: &Cli, config: &TomlConfig) -> Result<ResolutionPipeline> {
    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(cli.root_folder.clone())
        .with_toml_config(config.clone())
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);

    let policy_path = cli
        .policy
        .clone()
        .or_else(|| config.policy_file.clone())
        .unwrap_or_else(|| initializer.policy_path());
    let policy = ResolutionPolicy::load_or_builtin(Some(&policy_path))
        .with_context(|| format!("Invalid resolution policy {}", policy_path.display()))?;
    info!(version = %policy.version, "Resolution policy loaded");

    let store: Arc<dyn FactStore> = if cli.ephemeral {
        warn!("Ephemeral mode: nothing will be persisted");
        Arc::new(InMemoryFactStore::new())
    } else {
        initializer
            .ensure_directory_exists()
            .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;
        let db_path = initializer.database_path();
        info!("Database: {}", db_path.display());
        Arc::new(SqliteFactStore::open(&db_path, config.database_max_lock_wait_ms).await?)
    };

    Ok(ResolutionPipeline::new(store, Arc::new(policy)))
}

async fn serve(pipeline: Arc<ResolutionPipeline>, config: &TomlConfig, port: u16) -> Result<()> {
    let state = AppState::new(pipeline, config.batch_concurrency);
    let shutdown = state.shutdown.clone();
    let app = cinefacts_resolver::build_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Token cancelled on Ctrl+C; running batches finish in-flight entities only
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, not starting further entities");
            child.cancel();
        }
    });
    token
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
