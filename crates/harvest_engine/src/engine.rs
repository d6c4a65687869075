//! The page-by-page harvest loop.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
use crate::fetch::{sleep_cancellable, PageFetcher, RetrySettings};
use crate::merge;
use crate::persist::{AtomicFileWriter, PersistError};
use crate::sink::{BatchSink, SinkError};
use crate::transport::{PageRequest, Transport};
use crate::types::{
    AbortInfo, FailureKind, HarvestOutcome, HarvestSummary, PageResult, SymbolRecord,
};

#[derive(Debug, Clone)]
pub struct HarvestSettings {
    /// Inter-page delay, applied before every fetch except the very first.
    pub page_delay: Duration,
    /// First batch number to fetch; > 1 resumes a previous run.
    pub resume_from: u64,
    pub retry: RetrySettings,
    /// Whole-page failures in a row that trigger a controlled abort.
    pub max_consecutive_failures: u32,
    /// Base wait, scaled by the consecutive-failure count.
    pub failure_backoff: Duration,
    /// Hard ceiling on batch numbers; guards against a cursor that never ends.
    pub max_batches: u64,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            page_delay: Duration::from_secs(2),
            resume_from: 1,
            retry: RetrySettings::default(),
            max_consecutive_failures: 3,
            failure_backoff: Duration::from_secs(30),
            max_batches: 1000,
        }
    }
}

/// Failure that must stop the run: the checkpoint may never advance past an
/// unwritten batch, so persistence problems are not retried.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("batch sink failure: {0}")]
    Sink(#[from] SinkError),
    #[error("checkpoint failure: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("output failure: {0}")]
    Persist(#[from] PersistError),
}

/// Sequential harvest driver: fetch, persist, checkpoint, repeat.
///
/// One engine instance per output directory; running two against the same
/// directory is undefined behaviour and the caller's responsibility to avoid.
pub struct HarvestEngine<S: BatchSink> {
    fetcher: PageFetcher,
    sink: S,
    checkpoints: CheckpointStore,
    output: AtomicFileWriter,
    settings: HarvestSettings,
    cancel: CancellationToken,
}

impl<S: BatchSink> HarvestEngine<S> {
    pub fn new(
        transport: Arc<dyn Transport>,
        request: PageRequest,
        sink: S,
        output_dir: &Path,
        settings: HarvestSettings,
        cancel: CancellationToken,
    ) -> Self {
        let fetcher = PageFetcher::new(transport, request, settings.retry.clone(), cancel.clone());
        Self {
            fetcher,
            sink,
            checkpoints: CheckpointStore::new(output_dir),
            output: AtomicFileWriter::new(output_dir.to_path_buf()),
            settings,
            cancel,
        }
    }

    /// Run the harvest to a terminal state. `Err` means a persistence failure;
    /// everything else, cancellation included, is a typed outcome.
    pub async fn run(&self) -> Result<HarvestOutcome, EngineError> {
        let started = Instant::now();
        let mut batches: Vec<Vec<SymbolRecord>> = Vec::new();
        let mut batch = self.settings.resume_from.max(1);
        let mut next_key: Option<String> = None;
        let mut total_records: u64 = 0;
        let mut total_reported: u64 = 0;
        let mut consecutive_failures: u32 = 0;

        if batch > 1 {
            log::info!("resuming from batch {batch}");
            for prior in 1..batch {
                match self.sink.load(prior)? {
                    Some(records) => {
                        total_records += records.len() as u64;
                        log::info!("loaded batch {prior} with {} symbols", records.len());
                        batches.push(records);
                    }
                    None => log::warn!("batch {prior} not found on disk, continuing without it"),
                }
            }
            match self.checkpoints.load() {
                Some(checkpoint) => {
                    next_key = checkpoint.next_key;
                    total_reported = checkpoint.total_reported;
                    log::info!(
                        "restored state: next_key={next_key:?}, total_reported={total_reported}"
                    );
                }
                None => log::warn!("no usable checkpoint, starting the page sequence fresh"),
            }
        }

        let aborted: Option<AbortInfo> = loop {
            if self.cancel.is_cancelled() {
                break Some(abort_info(batch, total_records, "cancelled"));
            }
            if batch > 1 && sleep_cancellable(&self.cancel, self.settings.page_delay).await {
                break Some(abort_info(batch, total_records, "cancelled"));
            }

            log::info!("batch {batch}: downloading...");
            let page = match self.fetcher.fetch_page(next_key.clone()).await {
                Ok(page) => page,
                Err(failure) if failure.kind == FailureKind::Cancelled => {
                    break Some(abort_info(batch, total_records, "cancelled"));
                }
                Err(failure) => {
                    consecutive_failures += 1;
                    log::error!(
                        "batch {batch} failed ({consecutive_failures} consecutive): {failure}"
                    );
                    if consecutive_failures >= self.settings.max_consecutive_failures {
                        log::error!(
                            "too many consecutive failures, stopping; resume later from batch {batch}"
                        );
                        break Some(abort_info(batch, total_records, failure.to_string()));
                    }
                    let wait = self.settings.failure_backoff * consecutive_failures;
                    log::info!("waiting {wait:?} before retrying batch {batch}");
                    if sleep_cancellable(&self.cancel, wait).await {
                        break Some(abort_info(batch, total_records, "cancelled"));
                    }
                    continue;
                }
            };
            consecutive_failures = 0;

            if page.records.is_empty() {
                log::info!("no symbols returned, reached end of data");
                break None;
            }

            let persisted = self.sink.persist(batch, &page.records)?;
            total_records += persisted as u64;
            if batch == 1 && page.total_available > 0 {
                total_reported = page.total_available;
                log::info!("total symbols available: {total_reported}");
            }
            log_progress(batch, persisted, total_records, total_reported, started);

            next_key = page.next_key.clone();
            let done = reached_end(&page);
            batches.push(page.records);

            self.checkpoints.save(&Checkpoint {
                next_batch: batch + 1,
                next_key: next_key.clone(),
                total_records,
                total_reported,
            })?;

            if done {
                log::info!("reached end of data (no more symbols available)");
                break None;
            }
            batch += 1;
            if batch > self.settings.max_batches {
                log::warn!(
                    "reached safety limit of {} batches, stopping early",
                    self.settings.max_batches
                );
                break None;
            }
        };

        if let Some(info) = aborted {
            log::info!(
                "harvest stopped after {} batches; resume with batch {}",
                info.completed_batches,
                info.resume_from
            );
            return Ok(HarvestOutcome::Aborted(info));
        }

        self.finish(batches, total_records, total_reported)
            .map(HarvestOutcome::Completed)
    }

    fn finish(
        &self,
        batches: Vec<Vec<SymbolRecord>>,
        total_records: u64,
        total_reported: u64,
    ) -> Result<HarvestSummary, EngineError> {
        let batch_count = batches.len() as u64;
        if batches.is_empty() {
            log::warn!("no data was collected");
            self.checkpoints.clear()?;
            return Ok(HarvestSummary {
                batches: 0,
                total_records: 0,
                total_reported,
                unique_records: 0,
                duplicates_removed: 0,
                records: Vec::new(),
            });
        }

        log::info!("combining {batch_count} batches...");
        let (records, duplicates_removed) = merge::dedup_in_order(batches);
        if duplicates_removed > 0 {
            log::info!("removed {duplicates_removed} duplicate symbols");
        }
        log::info!("final unique symbol count: {}", records.len());

        let path = merge::write_merged(&self.output, &records)?;
        log::info!("saved merged output to {}", path.display());
        self.checkpoints.clear()?;

        Ok(HarvestSummary {
            batches: batch_count,
            total_records,
            total_reported,
            unique_records: records.len() as u64,
            duplicates_removed: duplicates_removed as u64,
            records,
        })
    }
}

fn abort_info(batch: u64, total_records: u64, last_error: impl Into<String>) -> AbortInfo {
    AbortInfo {
        resume_from: batch,
        completed_batches: batch.saturating_sub(1),
        total_records,
        last_error: last_error.into(),
    }
}

fn reached_end(page: &PageResult) -> bool {
    !page.has_more || page.next_key.is_none()
}

fn log_progress(
    batch: u64,
    persisted: usize,
    total_records: u64,
    total_reported: u64,
    started: Instant,
) {
    log::info!("batch {batch}: {persisted} symbols ({total_records} so far)");
    if total_reported > 0 {
        let progress = total_records as f64 / total_reported as f64 * 100.0;
        log::info!("progress: {progress:.1}%");
        if progress > 0.0 {
            let elapsed = started.elapsed().as_secs_f64();
            let remaining = elapsed / (progress / 100.0) - elapsed;
            log::info!("estimated time remaining: {:.1} minutes", remaining / 60.0);
        }
    }
}
