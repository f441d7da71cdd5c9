//! # Gaceta CLI (`gaceta`)
//!
//! Operator interface for the bulletin ingestion pipeline.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gaceta init` | Create the SQLite database and run schema migrations |
//! | `gaceta discover` | Scan the storage root for new bulletin PDFs |
//! | `gaceta register <file>` | Register one bulletin (copies it into the storage root) |
//! | `gaceta process --all` | Process every pending document |
//! | `gaceta process --id <N>` | Process (or retry) one document |
//! | `gaceta status` | Per-status counts and index totals |
//! | `gaceta reset --id <N>` | Reset one document to pending |
//! | `gaceta reset --all --confirm "<phrase>"` | Reset the entire corpus |
//! | `gaceta config` | Print the effective pipeline configuration |
//! | `gaceta serve` | Start the HTTP control surface |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use gaceta_pipeline::config::{self, Config};
use gaceta_pipeline::events::EventBroadcaster;
use gaceta_pipeline::models::DocumentStatus;
use gaceta_pipeline::pipeline::Pipeline;
use gaceta_pipeline::progress::{self, ProgressMode};
use gaceta_pipeline::reset::ResetController;
use gaceta_pipeline::{db, migrate, server, stats};

/// Gaceta — document ingestion pipeline for government bulletins.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/gaceta.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "gaceta",
    about = "Gaceta — document ingestion pipeline for government bulletins",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/gaceta.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (documents, chunks, chunks_fts, chunk_vectors). Idempotent.
    Init,

    /// Scan the storage root for bulletin PDFs and register new ones.
    ///
    /// Also reconciles the file-presence flag for documents whose raw
    /// file appeared or disappeared since the last pass.
    Discover,

    /// Register a single bulletin file.
    ///
    /// Copies the file into the storage root when it lives elsewhere.
    /// Registering byte-identical content twice yields one document.
    Register {
        /// Path to the bulletin PDF.
        file: PathBuf,
    },

    /// Run the pipeline: extraction, cleaning, chunking, indexing.
    Process {
        /// Process one document by id (also retries a failed document).
        #[arg(long, conflicts_with = "all")]
        id: Option<i64>,

        /// Process all pending documents, oldest first.
        #[arg(long)]
        all: bool,

        /// Extraction strategy override: high_fidelity or fast.
        #[arg(long)]
        extractor: Option<String>,

        /// Progress output: off, human, or json. Defaults by TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Show per-status document counts and index totals.
    Status,

    /// Reset pipeline state. Destructive and irreversible.
    Reset {
        /// Reset one document by id.
        #[arg(long, conflicts_with = "all")]
        id: Option<i64>,

        /// Reset every document and clear all derived data.
        #[arg(long, requires = "confirm")]
        all: bool,

        /// Confirmation phrase required by --all.
        #[arg(long)]
        confirm: Option<String>,
    },

    /// Print the effective pipeline configuration as TOML.
    Config,

    /// Start the HTTP control surface.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Discover => run_discover(&config).await,
        Commands::Register { file } => run_register(&config, &file).await,
        Commands::Process {
            id,
            all,
            extractor,
            progress,
        } => run_process(&config, id, all, extractor, progress).await,
        Commands::Status => stats::run_status(&config).await,
        Commands::Reset { id, all, confirm } => run_reset(&config, id, all, confirm).await,
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config.pipeline)?);
            Ok(())
        }
        Commands::Serve => server::run_server(&config).await,
    }
}

async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    std::fs::create_dir_all(&config.storage.root)?;
    pool.close().await;
    println!("initialized {}", config.db.path.display());
    Ok(())
}

async fn build_pipeline(config: &Config) -> Result<Arc<Pipeline>> {
    let pool = db::connect(config).await?;
    Ok(Arc::new(Pipeline::new(
        pool,
        config.storage.root.clone(),
        EventBroadcaster::new(),
    )))
}

async fn run_discover(config: &Config) -> Result<()> {
    let pipeline = build_pipeline(config).await?;
    let summary = pipeline.registry().discover(&config.storage.root).await?;
    println!("discover {}", config.storage.root.display());
    println!("  registered: {}", summary.registered);
    println!("  already known: {}", summary.already_known);
    println!("  marked missing: {}", summary.marked_missing);
    println!("ok");
    Ok(())
}

async fn run_register(config: &Config, file: &PathBuf) -> Result<()> {
    let bytes = std::fs::read(file)?;
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("not a usable filename: {}", file.display()))?
        .to_string();

    // Keep the raw file under the storage root so processing can find it.
    std::fs::create_dir_all(&config.storage.root)?;
    let dest = config.storage.root.join(&filename);
    if !dest.exists() {
        std::fs::write(&dest, &bytes)?;
    }

    let pipeline = build_pipeline(config).await?;
    let outcome = pipeline.registry().register(&filename, &bytes).await?;

    println!("register {}", filename);
    if outcome.created {
        println!("  document id: {}", outcome.document.id);
        println!("  content hash: {}", outcome.document.content_hash);
    } else {
        println!(
            "  duplicate of document {} ({})",
            outcome.document.id, outcome.document.filename
        );
    }
    println!("ok");
    Ok(())
}

async fn run_process(
    config: &Config,
    id: Option<i64>,
    all: bool,
    extractor: Option<String>,
    progress_mode: Option<String>,
) -> Result<()> {
    let mut pipeline_config = config.pipeline.clone();
    if let Some(extractor) = extractor {
        pipeline_config.extraction.extractor = extractor;
    }

    let mode = match progress_mode.as_deref() {
        Some(s) => ProgressMode::parse(s)
            .ok_or_else(|| anyhow::anyhow!("unknown progress mode: '{}'", s))?,
        None => ProgressMode::default_for_tty(),
    };

    let pipeline = build_pipeline(config).await?;
    let printer = progress::spawn_printer(pipeline.events().subscribe(), mode);

    let result = match (id, all) {
        (Some(id), _) => {
            let status = pipeline.process_document(id, &pipeline_config).await;
            match status {
                Ok(status) => {
                    println!("process document {}", id);
                    println!("  status: {}", status);
                    if status == DocumentStatus::Failed {
                        if let Some(doc) = pipeline.registry().get(id).await? {
                            println!("  error: {}", doc.last_error.unwrap_or_default());
                        }
                    }
                    println!("ok");
                    Ok(())
                }
                Err(e) => Err(anyhow::Error::new(e)),
            }
        }
        (None, true) => {
            let summary = pipeline.process_all_pending(&pipeline_config).await;
            match summary {
                Ok(summary) => {
                    println!("process all");
                    println!("  total: {}", summary.total);
                    println!("  completed: {}", summary.completed);
                    println!("  failed: {}", summary.failed);
                    if summary.cancelled {
                        println!("  cancelled: yes");
                    }
                    println!("ok");
                    Ok(())
                }
                Err(e) => Err(anyhow::Error::new(e)),
            }
        }
        (None, false) => Err(anyhow::anyhow!("process needs --id <N> or --all")),
    };

    // Dropping the pipeline closes the event channel; the printer drains
    // whatever is buffered and exits.
    drop(pipeline);
    let _ = printer.await;
    result
}

async fn run_reset(
    config: &Config,
    id: Option<i64>,
    all: bool,
    confirm: Option<String>,
) -> Result<()> {
    let pipeline = build_pipeline(config).await?;
    let controller = ResetController::new(Arc::clone(&pipeline));

    match (id, all) {
        (Some(id), _) => {
            controller
                .reset_one(id)
                .await
                .map_err(anyhow::Error::new)?;
            println!("reset document {}", id);
            println!("ok");
            Ok(())
        }
        (None, true) => {
            let total = controller
                .reset_all(confirm.as_deref().unwrap_or(""))
                .await
                .map_err(anyhow::Error::new)?;
            println!("reset all");
            println!("  documents: {}", total);
            println!("ok");
            Ok(())
        }
        (None, false) => Err(anyhow::anyhow!("reset needs --id <N> or --all --confirm")),
    }
}
