//! EcoTally - sustainability metrics extracted from documents
//!
//! A CLI tool that sends uploaded documents to a hosted language model,
//! unpacks the monthly and annual environmental metrics it returns, and
//! keeps them in a local SQLite database alongside a generated report.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime or validation error

mod analysis;
mod cli;
mod config;
mod document;
mod error;
mod export;
mod extraction;
mod llm;
mod models;
mod pipeline;
mod report;
mod store;

use anyhow::{Context, Result};
use cli::{AnalysisCommand, Args, Command, OutputFormat};
use config::Config;
use error::ValidationError;
use export::ExportKind;
use indicatif::{ProgressBar, ProgressStyle};
use models::{Upload, UpsertOutcome};
use pipeline::WorkerQueue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use store::Store;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if matches!(args.command, Command::InitConfig) {
        return handle_init_config();
    }

    init_logging(&args);

    info!("EcoTally v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    if let Err(e) = run(args).await {
        error!("Command failed: {:#}", e);
        eprintln!("\n❌ Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle init-config: generate a default .ecotally.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(config::CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            config::CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", config::CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", config::CONFIG_FILE);
    println!("   Edit it to customize the model, data directory, upload limits, and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Warning: a tracing subscriber was already installed");
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", config::CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

/// Dispatch a parsed command.
async fn run(args: Args) -> Result<()> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let store = Store::open(&config.database_path()).await?;
    let format = args.format;

    match args.command {
        Command::InitConfig => Ok(()),
        Command::Upload {
            paths,
            user,
            show_report,
        } => handle_upload(&store, &config, &user, &paths, show_report, args.quiet).await,
        Command::Status { upload_id, user } => {
            let upload = find_upload(&store, &user, &upload_id).await?;
            if format == OutputFormat::Json {
                println!("{}", report::generate_json_report(&upload)?);
            } else {
                print_upload_status(&upload);
            }
            Ok(())
        }
        Command::Uploads { user, limit } => {
            let uploads = store.list_uploads(&user, limit).await?;
            if format == OutputFormat::Json {
                println!("{}", report::generate_json_report(&uploads)?);
            } else if uploads.is_empty() {
                println!("No uploads yet.");
            } else {
                println!("📁 {} upload(s):\n", uploads.len());
                for upload in &uploads {
                    println!(
                        "   {} {}  {}  {} ({} bytes, {})",
                        upload.status.emoji(),
                        upload.id,
                        upload.uploaded_at.format("%Y-%m-%d %H:%M"),
                        upload.file_name,
                        upload.file_size,
                        upload.status
                    );
                }
            }
            Ok(())
        }
        Command::Delete { upload_id, user } => {
            let removed = pipeline::remove(&store, &user, &upload_id).await?;
            println!("🗑️  Deleted {} ({})", removed.file_name, removed.id);
            Ok(())
        }
        Command::Extractions { user, limit } => {
            let extractions = store.list_extractions(&user, limit).await?;
            if format == OutputFormat::Json {
                println!("{}", report::generate_json_report(&extractions)?);
            } else if extractions.is_empty() {
                println!("No extractions yet.");
            } else {
                println!("📊 {} extraction(s):\n", extractions.len());
                for e in &extractions {
                    let years = e
                        .years
                        .iter()
                        .map(|y| y.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    println!(
                        "   {}  {}  {}: {} monthly, {} annual [{}]",
                        e.upload_id,
                        e.extracted_at.format("%Y-%m-%d %H:%M"),
                        e.file_name.as_deref().unwrap_or("(deleted)"),
                        e.monthly_record_count,
                        e.annual_record_count,
                        years
                    );
                }
            }
            Ok(())
        }
        Command::Report { upload_id, user } => {
            find_upload(&store, &user, &upload_id).await?;
            let extraction = store
                .get_extraction(&upload_id)
                .await?
                .ok_or(ValidationError::NotFound("Extraction"))?;
            if format == OutputFormat::Json {
                println!("{}", report::generate_json_report(&extraction)?);
            } else {
                println!("{}", extraction.analysis_report);
            }
            Ok(())
        }
        Command::Export {
            upload_id,
            kind,
            user,
            output,
        } => handle_export(&store, &user, &upload_id, &kind, output).await,
        Command::Analysis { action } => handle_analysis(&store, &config, action, format).await,
    }
}

async fn find_upload(store: &Store, user: &str, upload_id: &str) -> Result<Upload> {
    Ok(store
        .get_upload(user, upload_id)
        .await?
        .ok_or(ValidationError::NotFound("Upload"))?)
}

fn print_upload_status(upload: &Upload) {
    println!("{} {} ({})", upload.status.emoji(), upload.file_name, upload.id);
    println!("   Status: {}", upload.status);
    println!("   Type: {} ({} bytes)", upload.file_type, upload.file_size);
    println!("   Uploaded: {}", upload.uploaded_at.to_rfc3339());
    if let Some(processed_at) = upload.processed_at {
        println!("   Processed: {}", processed_at.to_rfc3339());
    }
    if let Some(ref message) = upload.error_message {
        println!("   Error: {}", message);
    }
    if !upload.status.is_terminal() {
        println!("   Still in progress; check again later.");
    }
}

/// Queue the files, wait for the worker to drain, then show the results.
async fn handle_upload(
    store: &Store,
    config: &Config,
    user: &str,
    paths: &[PathBuf],
    show_report: bool,
    quiet: bool,
) -> Result<()> {
    let model: Arc<dyn llm::ExtractionModel> = Arc::from(llm::build_model(&config.model)?);

    println!("🤖 Extraction model: {}", model.model_name());
    println!("   Timeout: {}s", config.model.timeout_seconds);

    let queue = WorkerQueue::start(
        store.clone(),
        model,
        config.general.concurrency,
        Duration::from_secs(config.model.timeout_seconds),
    );

    let accepted = match pipeline::submit(store, &queue, config, user, paths).await {
        Ok(accepted) => accepted,
        Err(e) => {
            queue.finish().await?;
            return Err(e);
        }
    };

    println!("\n📤 Queued {} file(s):", accepted.len());
    for upload in &accepted {
        println!("   {} ({})", upload.file_name, upload.id);
    }

    let spinner = if quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message("Extracting sustainability data...");
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    };

    queue.finish().await?;
    spinner.finish_and_clear();

    println!("\n📊 Results:");
    let mut failed = 0;
    for upload in &accepted {
        let current = find_upload(store, user, &upload.id).await?;
        match current.error_message {
            Some(ref message) => {
                failed += 1;
                println!("   {} {}: {}", current.status.emoji(), current.file_name, message);
            }
            None => println!("   {} {}: {}", current.status.emoji(), current.file_name, current.status),
        }

        if show_report {
            if let Some(extraction) = store.get_extraction(&upload.id).await? {
                println!("\n{}\n", extraction.analysis_report);
            }
        }
    }

    println!(
        "\n✅ Done: {} processed, {} failed.",
        accepted.len() - failed,
        failed
    );
    Ok(())
}

async fn handle_export(
    store: &Store,
    user: &str,
    upload_id: &str,
    kind: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let kind = ExportKind::parse(kind)?;
    find_upload(store, user, upload_id).await?;
    let extraction = store
        .get_extraction(upload_id)
        .await?
        .ok_or(ValidationError::NotFound("Extraction"))?;

    let (csv, count) = match kind {
        ExportKind::Monthly => (
            export::monthly_to_csv(&extraction.monthly_data)?,
            extraction.monthly_data.len(),
        ),
        ExportKind::Annual => (
            export::annual_to_csv(&extraction.annual_data)?,
            extraction.annual_data.len(),
        ),
    };

    let path = output.unwrap_or_else(|| PathBuf::from(kind.file_name(upload_id)));
    std::fs::write(&path, csv)
        .with_context(|| format!("Failed to write export to {}", path.display()))?;

    println!("✅ Exported {} {} record(s) to {}", count, kind, path.display());
    Ok(())
}

async fn handle_analysis(
    store: &Store,
    config: &Config,
    action: AnalysisCommand,
    format: OutputFormat,
) -> Result<()> {
    match action {
        AnalysisCommand::Set(set) => {
            let input = set.to_input()?;
            let (analysis, outcome) = store
                .upsert_analysis(&set.user, &input, &config.analysis)
                .await?;
            if format == OutputFormat::Json {
                println!("{}", report::generate_json_report(&analysis)?);
            } else {
                let verb = match outcome {
                    UpsertOutcome::Created => "created",
                    UpsertOutcome::Updated => "updated",
                };
                println!(
                    "✅ Analysis {} for period {} ({}% coverage)",
                    verb, analysis.period, analysis.data_coverage
                );
            }
        }
        AnalysisCommand::Get { user, period } => {
            let analysis = store
                .get_analysis(&user, period.as_deref())
                .await?
                .ok_or(ValidationError::NotFound("Analysis"))?;
            if format == OutputFormat::Json {
                println!("{}", report::generate_json_report(&analysis)?);
            } else {
                println!("📋 Analysis for {}", analysis.period);
                println!("   Coverage: {}%", analysis.data_coverage);
                if let Some(total) = analysis.total_emissions {
                    println!(
                        "   Total emissions: {} {}",
                        report::format_grouped(total),
                        analysis.emissions_unit
                    );
                }
                println!("   Framework: {}", analysis.framework);
                if let Some(ref summary) = analysis.summary {
                    println!("   Summary: {}", summary);
                }
                for category in &analysis.emissions_by_category {
                    println!(
                        "   - {}: {} ({}%)",
                        category.category,
                        report::format_grouped(category.value),
                        category.percentage
                    );
                }
                if !analysis.missing_fields.is_empty() {
                    println!("   Missing: {}", analysis.missing_fields.join(", "));
                }
                for insight in &analysis.insights {
                    println!("   💡 {}", insight);
                }
            }
        }
        AnalysisCommand::Periods { user } => {
            let periods = store.list_periods(&user).await?;
            if format == OutputFormat::Json {
                let listed: Vec<_> = periods
                    .iter()
                    .map(|(period, created_at)| {
                        serde_json::json!({ "period": period, "created_at": created_at })
                    })
                    .collect();
                println!("{}", report::generate_json_report(&listed)?);
            } else if periods.is_empty() {
                println!("No analyses yet.");
            } else {
                for (period, created_at) in &periods {
                    println!("   {}  ({})", period, created_at.format("%Y-%m-%d"));
                }
            }
        }
        AnalysisCommand::Dashboard { user } => {
            let dashboard = store.dashboard(&user, &config.analysis.framework).await?;
            if format == OutputFormat::Json {
                println!("{}", report::generate_json_report(&dashboard)?);
            } else {
                println!("📈 Dashboard");
                println!("   Data coverage: {}%", dashboard.data_coverage);
                match dashboard.last_analysis_date {
                    Some(date) => println!("   Last analysis: {}", date.format("%Y-%m-%d")),
                    None => println!("   Last analysis: never"),
                }
                println!("   Framework: {}", dashboard.framework);
                println!("   Total analyses: {}", dashboard.total_analyses);
                for entry in &dashboard.analysis_history {
                    println!(
                        "   - {} ({}%, {})",
                        entry.period,
                        entry.coverage,
                        entry.date.format("%Y-%m-%d")
                    );
                }
            }
        }
    }

    Ok(())
}
