//! Merging batches into the canonical deduplicated output.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::persist::{AtomicFileWriter, PersistError};
use crate::table;
use crate::types::SymbolRecord;

/// Well-known name of the merged output file.
pub const MERGED_FILENAME: &str = "all_symbols_latest.csv";

/// Concatenate batches in batch order and drop records whose key was already
/// seen. First occurrence wins and relative order is preserved, so running
/// this twice over the same input yields the same output.
pub fn dedup_in_order(batches: Vec<Vec<SymbolRecord>>) -> (Vec<SymbolRecord>, usize) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::new();
    let mut duplicates = 0usize;
    for batch in batches {
        for record in batch {
            if seen.insert(record.symbol.clone()) {
                merged.push(record);
            } else {
                duplicates += 1;
            }
        }
    }
    (merged, duplicates)
}

/// Write the merged record set to the canonical output file.
pub fn write_merged(
    writer: &AtomicFileWriter,
    records: &[SymbolRecord],
) -> Result<PathBuf, PersistError> {
    writer.write(MERGED_FILENAME, &table::render_table(records))
}
