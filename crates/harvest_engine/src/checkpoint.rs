//! Durable record of harvest progress.
//!
//! The checkpoint is the single source of truth for a restart; batch files on
//! disk are the secondary source for the running totals. Its presence after a
//! run means "resume available", so it is deleted only on full completion.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persist::{AtomicFileWriter, PersistError};

/// Fixed file name inside the output directory.
pub const CHECKPOINT_FILENAME: &str = "harvest_state.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The batch number the next run should start at.
    pub next_batch: u64,
    /// Cursor for that batch; `None` means the sequence was exhausted.
    pub next_key: Option<String>,
    pub total_records: u64,
    pub total_reported: u64,
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Loads, overwrites and deletes the single checkpoint file.
pub struct CheckpointStore {
    writer: AtomicFileWriter,
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            writer: AtomicFileWriter::new(output_dir.to_path_buf()),
            path: output_dir.join(CHECKPOINT_FILENAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when the file is absent or unreadable. A bad checkpoint is
    /// downgraded to "no resume state" with a warning, never an error.
    pub fn load(&self) -> Option<Checkpoint> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&text) {
            Ok(checkpoint) => Some(checkpoint),
            Err(err) => {
                log::warn!(
                    "ignoring unreadable checkpoint {}: {err}",
                    self.path.display()
                );
                None
            }
        }
    }

    /// Atomically overwrite the checkpoint.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let text = serde_json::to_string(checkpoint)?;
        self.writer.write(CHECKPOINT_FILENAME, &text)?;
        Ok(())
    }

    /// Delete the checkpoint; a missing file is fine.
    pub fn clear(&self) -> Result<(), CheckpointError> {
        self.writer.remove(CHECKPOINT_FILENAME)?;
        Ok(())
    }
}
