//! Durable persistence of fetched batches.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::persist::{AtomicFileWriter, PersistError};
use crate::table::{self, TableError};
use crate::types::SymbolRecord;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("record {index} in batch {batch} has an empty symbol key")]
    EmptyKey { batch: u64, index: usize },
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
    #[error("batch file {path}: {source}")]
    Corrupt { path: PathBuf, source: TableError },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Deterministic file name for one batch.
pub fn batch_filename(batch: u64) -> String {
    format!("batch_{batch}.csv")
}

/// Persists one page of records as one durable, never-mutated unit.
pub trait BatchSink: Send + Sync {
    /// Persist `records` as batch `batch`; returns the persisted count.
    fn persist(&self, batch: u64, records: &[SymbolRecord]) -> Result<usize, SinkError>;

    /// Read back a previously written batch; `None` if it was never written.
    fn load(&self, batch: u64) -> Result<Option<Vec<SymbolRecord>>, SinkError>;
}

/// One `batch_{n}.csv` per batch inside the output directory, written
/// atomically.
pub struct CsvBatchSink {
    writer: AtomicFileWriter,
}

impl CsvBatchSink {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            writer: AtomicFileWriter::new(output_dir.to_path_buf()),
        }
    }

    /// Delete batch files `1..=through`. Returns how many were removed.
    pub fn remove_batches(&self, through: u64) -> Result<usize, SinkError> {
        let mut removed = 0;
        for batch in 1..=through {
            if self.writer.remove(&batch_filename(batch))? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl BatchSink for CsvBatchSink {
    fn persist(&self, batch: u64, records: &[SymbolRecord]) -> Result<usize, SinkError> {
        // Record shape is validated here, at the persistence boundary.
        if let Some(index) = records.iter().position(|r| r.symbol.is_empty()) {
            return Err(SinkError::EmptyKey { batch, index });
        }
        let path = self
            .writer
            .write(&batch_filename(batch), &table::render_table(records))?;
        log::info!(
            "saved batch {batch} with {} symbols to {}",
            records.len(),
            path.display()
        );
        Ok(records.len())
    }

    fn load(&self, batch: u64) -> Result<Option<Vec<SymbolRecord>>, SinkError> {
        let path = self.writer.dir().join(batch_filename(batch));
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        match table::parse_records(&text) {
            Ok(records) => Ok(Some(records)),
            Err(source) => Err(SinkError::Corrupt { path, source }),
        }
    }
}
