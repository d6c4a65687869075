//! Command-line entry point for the symbol-catalog harvest.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::LevelFilter;
use tokio_util::sync::CancellationToken;

use harvest_engine::{
    ensure_output_dir, partition_by_exchange_and_type, CsvBatchSink, HarvestEngine, HarvestOutcome,
    HarvestSettings, HarvestSummary, PageRequest, ReqwestTransport, RetrySettings, SymbolRecord,
    Transport, TransportSettings, DEFAULT_PAGE_LIMIT,
};

/// Resumable downloader for the DTN symbol catalog.
#[derive(Parser, Debug)]
#[command(name = "harvest", version, about)]
struct Cli {
    /// Directory receiving batches, resume state and the merged output.
    #[arg(long, default_value = "dtn_symbols")]
    output_dir: PathBuf,

    /// Resume from a specific batch number.
    #[arg(long)]
    resume: Option<u64>,

    /// Delay between batches in seconds.
    #[arg(long, default_value_t = 2)]
    delay: u64,

    /// Attempts per page before the page counts as failed.
    #[arg(long, default_value_t = 3)]
    retry_count: usize,

    /// Base retry delay in seconds.
    #[arg(long, default_value_t = 5)]
    retry_delay: u64,

    /// Page size requested from the backend.
    #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
    limit: u32,

    /// Search text filter; empty fetches the full catalog.
    #[arg(long, default_value = "")]
    search: String,

    /// Skip the per-exchange/per-type split after a completed run.
    #[arg(long)]
    no_split: bool,

    /// Keep the intermediate batch files after a completed run.
    #[arg(long)]
    keep_batches: bool,

    /// Also write logs to harvest.log inside the output directory.
    #[arg(long)]
    log_file: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

/// Exit code telling the operator the run can be resumed.
const EXIT_INCOMPLETE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if ensure_output_dir(&cli.output_dir).is_err() {
        eprintln!("error: cannot use output directory {}", cli.output_dir.display());
        return ExitCode::FAILURE;
    }
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let log_path = cli.log_file.then(|| cli.output_dir.join("harvest.log"));
    harvest_logging::initialize(level, log_path.as_deref());

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            // Persistence failures and wiring errors land here; on-disk state
            // is still consistent, the checkpoint was not removed.
            log::error!("unexpected error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let transport =
        Arc::new(ReqwestTransport::new(TransportSettings::default()).context("http client")?);
    let resume_from = cli.resume.unwrap_or(1);

    if resume_from <= 1 {
        match transport.get_categories().await {
            Ok(categories) => {
                log::info!("available exchanges: {}", categories.exchange.len());
                log::info!("available security types: {}", categories.security_type.len());
            }
            Err(err) => log::warn!("could not fetch category listing: {err}"),
        }
    }

    let request = PageRequest {
        search_text: cli.search.clone(),
        limit: cli.limit,
        ..PageRequest::default()
    };
    let settings = HarvestSettings {
        page_delay: Duration::from_secs(cli.delay),
        resume_from,
        retry: RetrySettings {
            retry_count: cli.retry_count,
            retry_delay: Duration::from_secs(cli.retry_delay),
        },
        ..HarvestSettings::default()
    };

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupt received, stopping after the current write");
            watcher.cancel();
        }
    });

    let engine = HarvestEngine::new(
        transport,
        request,
        CsvBatchSink::new(&cli.output_dir),
        &cli.output_dir,
        settings,
        cancel,
    );

    match engine.run().await? {
        HarvestOutcome::Completed(summary) => {
            report_summary(&summary);
            if summary.unique_records > 0 && !cli.no_split {
                partition_by_exchange_and_type(&cli.output_dir, &summary.records)?;
            }
            if !cli.keep_batches && summary.batches > 0 {
                let removed = CsvBatchSink::new(&cli.output_dir).remove_batches(summary.batches)?;
                log::info!("cleaned up {removed} batch files");
            }
            Ok(ExitCode::SUCCESS)
        }
        HarvestOutcome::Aborted(info) => {
            log::error!("download incomplete: {}", info.last_error);
            log::info!("symbols downloaded so far: {}", info.total_records);
            log::info!("to resume, run: harvest --resume {}", info.resume_from);
            Ok(ExitCode::from(EXIT_INCOMPLETE))
        }
    }
}

fn report_summary(summary: &HarvestSummary) {
    log::info!("total batches downloaded: {}", summary.batches);
    log::info!("total symbols downloaded: {}", summary.total_records);
    log::info!("unique symbols: {}", summary.unique_records);
    if summary.total_reported > 0 {
        let completion = summary.total_records as f64 / summary.total_reported as f64 * 100.0;
        log::info!("download completion: {completion:.1}%");
    }

    log_breakdown("security type", &summary.records, "securityType", usize::MAX);
    log_breakdown("exchange", &summary.records, "exchange", 20);
}

fn log_breakdown(label: &str, records: &[SymbolRecord], attr: &str, top: usize) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for record in records {
        if let Some(serde_json::Value::String(value)) = record.attributes.get(attr) {
            *counts.entry(value.clone()).or_default() += 1;
        }
    }
    if counts.is_empty() {
        return;
    }
    let mut sorted: Vec<(String, usize)> = counts.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    log::info!("breakdown by {label}:");
    for (value, count) in sorted.iter().take(top) {
        let share = *count as f64 / records.len() as f64 * 100.0;
        log::info!("  {value:<30} {count:>8} ({share:>5.1}%)");
    }
    if sorted.len() > top {
        log::info!("  ... and {} more", sorted.len() - top);
    }
}
