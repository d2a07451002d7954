//! invex: command-line product identification.
//!
//! Identifies product images against the catalog, groups multi-object
//! images, reports validation accuracy and retrains thresholds. Results are
//! printed as JSON on stdout; logs go to stderr (or `LOG_FILE`).

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use invex_db::Database;
use invex_identify::{
    IdentificationConfig, IdentificationRequest, MultipleDetectionGrouper, ProductDraft,
    ProductIdentificationOrchestrator, ValidationFeedbackLoop,
};
use invex_inference::{ExtractorConfig, HttpObjectDetector, PipelineSignalExtractor};

#[derive(Parser)]
#[command(name = "invex")]
#[command(author, version, about = "Product identification from images")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify a product image, creating the product when nothing matches
    Identify {
        /// Image file
        image: PathBuf,

        /// Name for a newly created product
        #[arg(short, long)]
        name: Option<String>,

        /// Category for a newly created product
        #[arg(short, long, default_value_t = 1)]
        category_id: i64,

        /// Never create a product
        #[arg(long)]
        no_create: bool,
    },

    /// Detect and identify every product in an image
    Detect {
        /// Image file
        image: PathBuf,

        /// Report each detection separately instead of grouping by product
        #[arg(long)]
        no_group: bool,
    },

    /// Show validation accuracy
    Metrics,

    /// Retrain thresholds from validations since the last training
    Retrain,

    /// Run migrations and activate the default threshold config
    Bootstrap,
}

/// Guard for the non-blocking file writer; dropping it flushes the log.
type LogGuard = Option<tracing_appender::non_blocking::WorkerGuard>;

// Environment variables:
//   LOG_FORMAT  - "json" or "text" (default: "text")
//   LOG_FILE    - path to log file (optional, enables file logging)
//   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
//   RUST_LOG    - standard env filter (default: "invex=info,invex_identify=info")
fn init_tracing() -> LogGuard {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "invex=info,invex_identify=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(ref path) = log_file {
        let file_dir = Path::new(path).parent().unwrap_or(Path::new("."));
        let file_name = Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("invex.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Engine components wired to PostgreSQL.
struct Engine {
    orchestrator: Arc<ProductIdentificationOrchestrator>,
    feedback: ValidationFeedbackLoop,
    extractor_config: ExtractorConfig,
}

async fn connect() -> anyhow::Result<(Database, IdentificationConfig)> {
    let db = Database::connect_from_env()
        .await
        .context("failed to connect to database")?;
    let config = IdentificationConfig::from_env();
    config.validate()?;
    Ok((db, config))
}

async fn engine() -> anyhow::Result<Engine> {
    let (db, config) = connect().await?;
    let extractor_config = ExtractorConfig::from_env();
    let extractor = PipelineSignalExtractor::from_config(&extractor_config)?;

    let Database {
        products,
        threshold_configs,
        validations,
        ..
    } = db;
    let configs = Arc::new(threshold_configs);
    let orchestrator = ProductIdentificationOrchestrator::new(
        Arc::new(extractor),
        Arc::new(products),
        configs.clone(),
        config.clone(),
    );
    // A one-shot CLI must not exit before retraining finishes.
    let feedback = ValidationFeedbackLoop::new(
        Arc::new(validations),
        configs,
        config.with_retrain_in_background(false),
    );
    Ok(Engine {
        orchestrator: Arc::new(orchestrator),
        feedback,
        extractor_config,
    })
}

fn read_image(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn format_hint(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Identify {
            image,
            name,
            category_id,
            no_create,
        } => cmd_identify(&image, name, category_id, no_create).await,
        Commands::Detect { image, no_group } => cmd_detect(&image, !no_group).await,
        Commands::Metrics => cmd_metrics().await,
        Commands::Retrain => cmd_retrain().await,
        Commands::Bootstrap => cmd_bootstrap().await,
    }
}

async fn cmd_identify(
    path: &Path,
    name: Option<String>,
    category_id: i64,
    no_create: bool,
) -> anyhow::Result<()> {
    let bytes = read_image(path)?;
    let engine = engine().await?;

    let result = if no_create {
        engine
            .orchestrator
            .identify_only(&bytes, format_hint(path))
            .await?
    } else {
        let mut draft = ProductDraft::new(category_id);
        if let Some(name) = name {
            draft = draft.with_name(name);
        }
        let mut request = IdentificationRequest::new(bytes).with_fallback(draft);
        if let Some(hint) = format_hint(path) {
            request = request.with_format_hint(hint);
        }
        engine.orchestrator.identify_or_create(request).await?
    };
    print_json(&result)
}

async fn cmd_detect(path: &Path, group_by_product: bool) -> anyhow::Result<()> {
    let bytes = read_image(path)?;
    let engine = engine().await?;
    let detector = HttpObjectDetector::from_config(&engine.extractor_config)
        .context("object detection requires INVEX_DETECT_URL")?;

    let grouper = MultipleDetectionGrouper::new(Arc::new(detector), engine.orchestrator.clone());
    let result = grouper
        .detect_and_group(&bytes, format_hint(path), group_by_product)
        .await?;
    print_json(&result)
}

async fn cmd_metrics() -> anyhow::Result<()> {
    let engine = engine().await?;
    let metrics = engine.feedback.accuracy_metrics().await?;
    let thresholds = engine.orchestrator.active_thresholds().await?;
    print_json(&serde_json::json!({
        "metrics": metrics,
        "active_config": thresholds,
    }))
}

async fn cmd_retrain() -> anyhow::Result<()> {
    let engine = engine().await?;
    let config = engine.feedback.trigger_retraining().await?;
    print_json(&config)
}

async fn cmd_bootstrap() -> anyhow::Result<()> {
    let (db, config) = connect().await?;
    db.migrate().await.context("failed to run migrations")?;
    info!(subsystem = "identify", component = "cli", "Migrations applied");

    let Database {
        threshold_configs,
        validations,
        ..
    } = db;
    let feedback = ValidationFeedbackLoop::new(
        Arc::new(validations),
        Arc::new(threshold_configs),
        config,
    );
    let active = feedback.ensure_active_config().await?;
    print_json(&active)
}
