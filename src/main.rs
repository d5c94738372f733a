use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use callreport_pipeline::audit::{summary_table, GapReport};
use callreport_pipeline::config::Config;
use callreport_pipeline::logging;
use callreport_pipeline::period::CanonicalPeriod;
use callreport_pipeline::pipeline::{IngestSummary, Pipeline, RunOptions};
use callreport_pipeline::types::{FilingSource, SourceTag};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "callreport_pipeline")]
#[command(about = "Call Report reconciliation pipeline for Chicago Fed and FFIEC CDR data")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the run configuration
    #[arg(long, default_value = "config.toml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve, classify and reconcile decoded filings into coverage cells
    Ingest {
        /// Specific sources to ingest (comma-separated). Available: ffiec_cdr, chicago_fed
        #[arg(long)]
        sources: Option<String>,
        /// Earliest period to process, e.g. 1985Q1
        #[arg(long)]
        start_period: Option<CanonicalPeriod>,
        /// Latest period to process, e.g. 2024Q4
        #[arg(long)]
        end_period: Option<CanonicalPeriod>,
        /// Rewrite cells even when unchanged on disk
        #[arg(long)]
        force: bool,
    },
    /// Report coverage gaps and per-quarter counts from the cell index
    Audit,
    /// Run ingest and audit sequentially
    Run {
        /// Specific sources to ingest (comma-separated)
        #[arg(long)]
        sources: Option<String>,
        /// Earliest period to process, e.g. 1985Q1
        #[arg(long)]
        start_period: Option<CanonicalPeriod>,
        /// Latest period to process, e.g. 2024Q4
        #[arg(long)]
        end_period: Option<CanonicalPeriod>,
        /// Rewrite cells even when unchanged on disk
        #[arg(long)]
        force: bool,
    },
}

fn select_sources(pipeline: &Pipeline, filter: Option<String>) -> Vec<Arc<dyn FilingSource>> {
    let configured = pipeline.configured_sources();
    let Some(filter) = filter else { return configured };

    let mut wanted = Vec::new();
    for name in filter.split(',').map(str::trim) {
        match name.parse::<SourceTag>() {
            Ok(tag) => wanted.push(tag),
            Err(_) => {
                warn!("Unknown source specified");
                println!("⚠️  Unknown source: {name}");
            }
        }
    }
    configured.into_iter().filter(|s| wanted.contains(&s.source_id())).collect()
}

async fn run_ingest(
    pipeline: &Pipeline,
    sources: Option<String>,
    opts: RunOptions,
) -> Result<IngestSummary, Box<dyn std::error::Error>> {
    let adapters = select_sources(pipeline, sources);
    if adapters.is_empty() {
        return Err("no sources selected".into());
    }
    info!("Starting ingest pass");
    let summary = pipeline.ingest(adapters, &opts).await?;
    print_ingest_summary(&summary);
    Ok(summary)
}

fn print_ingest_summary(summary: &IngestSummary) {
    println!("\n📊 Ingest results:");
    println!("   Files seen: {}", summary.files_seen);
    println!("   Skipped (period filter): {}", summary.files_skipped);
    println!("   Candidate batches: {}", summary.candidates);
    println!(
        "   Cells populated: {} ({} written, {} unchanged)",
        summary.cells_populated, summary.cells_written, summary.cells_unchanged
    );
    println!("   Cells absent: {}", summary.cells_absent);
    println!("   Records excluded by classification: {}", summary.excluded_records);

    if summary.has_failures() {
        warn!("{} inputs failed during ingest", summary.failures.len());
        println!("\n⚠️  Failed inputs:");
        for failure in &summary.failures {
            println!("   - [{}] {}: {}", failure.source, failure.identifier, failure.error);
        }
    }
}

fn print_gap_report(report: &GapReport) {
    println!("\n📈 Coverage by quarter:");
    print!("{}", summary_table(&report.populated));

    if !report.has_gaps() {
        println!("\n✅ No interior coverage gaps detected");
        return;
    }
    println!();
    for (category, missing) in &report.missing {
        if missing.is_empty() {
            continue;
        }
        let shown: Vec<String> = missing.iter().take(10).map(|p| p.to_string()).collect();
        println!("⚠️  {}: missing quarters: {}", category, shown.join(", "));
        if missing.len() > 10 {
            println!("       ... and {} more", missing.len() - 10);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    logging::init_logging();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            println!("❌ Failed to load configuration: {e}");
            std::process::exit(2);
        }
    };
    let pipeline = Pipeline::from_config(config)?;

    match cli.command {
        Commands::Ingest { sources, start_period, end_period, force } => {
            println!("🔄 Running ingest...");
            let opts = RunOptions { start_period, end_period, force };
            let summary = run_ingest(&pipeline, sources, opts).await?;
            if summary.has_failures() {
                std::process::exit(1);
            }
        }
        Commands::Audit => {
            println!("🔍 Auditing coverage...");
            let report = pipeline.audit()?;
            print_gap_report(&report);
        }
        Commands::Run { sources, start_period, end_period, force } => {
            println!("🚀 Running full pipeline (ingest + audit)...");
            let opts = RunOptions { start_period, end_period, force };
            let summary = run_ingest(&pipeline, sources, opts).await?;

            let report = pipeline.audit()?;
            print_gap_report(&report);

            if summary.has_failures() {
                std::process::exit(1);
            }
            println!("\n✅ Full pipeline completed successfully");
        }
    }
    Ok(())
}
