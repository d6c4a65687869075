//! Splitting the merged set into per-exchange, per-security-type files.

use std::collections::BTreeMap;
use std::path::Path;

use crate::persist::{AtomicFileWriter, PersistError};
use crate::table;
use crate::types::SymbolRecord;

/// Directory under the output root receiving the partitioned tree.
pub const PARTITION_DIR: &str = "by_exchange";

const EXCHANGE_ATTR: &str = "exchange";
const SEC_TYPE_ATTR: &str = "securityType";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartitionSummary {
    pub groups_written: usize,
    pub records_written: usize,
    /// Records lacking one of the grouping attributes.
    pub records_skipped: usize,
}

/// Write one file per (exchange, security type) pair under
/// `<output>/by_exchange/<exchange>/<securityType>.csv`.
///
/// Warns and does nothing when the grouping attributes are absent from every
/// record. Idempotent and order-independent: each output file contains only
/// records matching its path.
pub fn partition_by_exchange_and_type(
    output_dir: &Path,
    records: &[SymbolRecord],
) -> Result<PartitionSummary, PersistError> {
    let has_exchange = records
        .iter()
        .any(|r| r.attributes.contains_key(EXCHANGE_ATTR));
    let has_sec_type = records
        .iter()
        .any(|r| r.attributes.contains_key(SEC_TYPE_ATTR));
    if records.is_empty() || !has_exchange || !has_sec_type {
        log::warn!(
            "records are missing '{EXCHANGE_ATTR}' or '{SEC_TYPE_ATTR}' attributes, skipping split"
        );
        return Ok(PartitionSummary::default());
    }

    let mut groups: BTreeMap<(String, String), Vec<&SymbolRecord>> = BTreeMap::new();
    let mut skipped = 0usize;
    for record in records {
        match (grouping_value(record, EXCHANGE_ATTR), grouping_value(record, SEC_TYPE_ATTR)) {
            (Some(exchange), Some(sec_type)) => {
                groups.entry((exchange, sec_type)).or_default().push(record);
            }
            _ => skipped += 1,
        }
    }

    let root = output_dir.join(PARTITION_DIR);
    log::info!("splitting symbols into {}", root.display());

    let mut summary = PartitionSummary {
        records_skipped: skipped,
        ..PartitionSummary::default()
    };
    for ((exchange, sec_type), group) in &groups {
        let writer = AtomicFileWriter::new(root.join(safe_component(exchange)));
        let filename = format!("{}.csv", safe_component(sec_type));
        let path = writer.write(&filename, &table::render_ref_table(group))?;
        log::info!("saved {} symbols to {}", group.len(), path.display());
        summary.groups_written += 1;
        summary.records_written += group.len();
    }
    if skipped > 0 {
        log::warn!("{skipped} records lacked a grouping value and were not split");
    }
    Ok(summary)
}

fn grouping_value(record: &SymbolRecord, attr: &str) -> Option<String> {
    let value = record.attributes.get(attr).map(table::value_to_cell)?;
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

// Grouping values come from backend data and may not be filesystem-safe.
fn safe_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    let trimmed = cleaned.trim_matches(&['_', ' ', '.'][..]);
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}'
    )
}
