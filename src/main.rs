use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use silverize::app::ports::{BatchSourcePort, PublishedTablePort, TableSinkPort};
use silverize::app::{CaptureUseCase, ReportUseCase, SilverSettings, SilverUseCase};
use silverize::config::{Config, TableConfig};
use silverize::infra::{FileTableSink, FsBatchSource, SilverOutputReader};
use silverize::observability::{self, logging::DEFAULT_LOG_DIR};
use silverize::pipeline::ingestion::BronzeCapture;

#[derive(Parser)]
#[command(name = "silverize")]
#[command(about = "Heuristic schema normalization and quality gating for bronze batches")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to $SILVERIZE_CONFIG or ./silverize.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Tables to process (comma-separated); all configured tables by default
    #[arg(long, global = true, value_delimiter = ',')]
    tables: Option<Vec<String>>,

    /// Write the Prometheus text exposition here before exiting
    #[arg(long, global = true)]
    metrics_file: Option<PathBuf>,

    /// Directory for the rolling JSON log
    #[arg(long, global = true, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy landing CSV files into date-partitioned bronze batches
    Capture,
    /// Build the canonical and quarantine tables from bronze
    Silver,
    /// Print quality counts for published silver tables
    Report {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Capture, then silver
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = observability::init_logging(&cli.log_dir);
    if let Err(e) = observability::init_metrics() {
        warn!("Metrics disabled: {}", e);
    }

    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    let tables = config.select_tables(cli.tables.as_deref())?;
    info!(
        tables = ?tables.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
        "Starting silverize"
    );

    let failures = match cli.command {
        Commands::Capture => run_capture(&config, &tables).await,
        Commands::Silver => run_silver(&config, &tables).await,
        Commands::Report { json } => run_report(&config, &tables, json).await?,
        Commands::Run => {
            let capture_failures = run_capture(&config, &tables).await;
            capture_failures + run_silver(&config, &tables).await
        }
    };

    if let Some(path) = &cli.metrics_file {
        if !observability::write_textfile(path)
            .with_context(|| format!("writing metrics to {}", path.display()))?
        {
            warn!("No metrics recorder installed; {} not written", path.display());
        }
    }

    if failures > 0 {
        bail!("{} table run(s) failed", failures);
    }
    Ok(())
}

async fn run_capture(config: &Config, tables: &[TableConfig]) -> usize {
    let use_case = CaptureUseCase::new(BronzeCapture::new(
        &config.paths.landing_root,
        &config.paths.bronze_root,
    ));
    let mut failures = 0;
    for table in tables {
        match use_case.run(table).await {
            Ok(summary) => println!(
                "[OK] captured {} file(s), {} row(s) for {} ({} skipped)",
                summary.captured.len(),
                summary.rows(),
                table.name,
                summary.skipped.len()
            ),
            Err(e) => {
                error!("Capture failed: {}", e);
                eprintln!("[FAIL] {}", e);
                failures += 1;
            }
        }
    }
    failures
}

/// One tokio task per table; a failing table does not stop the others.
async fn run_silver(config: &Config, tables: &[TableConfig]) -> usize {
    let source: Arc<dyn BatchSourcePort> = Arc::new(FsBatchSource::new(&config.paths.bronze_root));
    let sink: Arc<dyn TableSinkPort> = Arc::new(FileTableSink::new(&config.paths.silver_root));
    let settings = SilverSettings::from(config);

    let handles: Vec<_> = tables
        .iter()
        .map(|table| {
            let use_case = SilverUseCase::with_default_quality_gate(
                table.clone(),
                settings.clone(),
                source.clone(),
                sink.clone(),
            );
            let name = table.name.clone();
            (name, tokio::spawn(async move { use_case.run().await }))
        })
        .collect();

    let mut failures = 0;
    for (name, handle) in handles {
        match handle.await {
            Ok(Ok(manifest)) => println!(
                "[OK] {}: {} accepted, {} quarantined, {} duplicates removed",
                name,
                manifest.counts.rows_accepted,
                manifest.counts.rows_quarantined,
                manifest.counts.duplicates_removed + manifest.counts.quarantine_duplicates_removed
            ),
            Ok(Err(e)) => {
                eprintln!("[FAIL] {}", e);
                failures += 1;
            }
            Err(e) => {
                error!(table = %name, "Silver task panicked: {}", e);
                eprintln!("[FAIL] {}: task aborted", name);
                failures += 1;
            }
        }
    }
    failures
}

async fn run_report(config: &Config, tables: &[TableConfig], json: bool) -> anyhow::Result<usize> {
    let reader: Arc<dyn PublishedTablePort> =
        Arc::new(SilverOutputReader::new(&config.paths.silver_root));
    let use_case = ReportUseCase::new(reader);
    let mut failures = 0;
    for table in tables {
        match use_case.report(table).await {
            Ok(report) if json => println!("{}", serde_json::to_string_pretty(&report)?),
            Ok(report) => print!("{}", report),
            Err(e) => {
                eprintln!("[FAIL] {}", e);
                failures += 1;
            }
        }
    }
    Ok(failures)
}
