//! Tabular serialization of symbol records.
//!
//! Batch files, the merged output and the partition files share one plain
//! comma-separated layout: a header row with `symbol` first and the remaining
//! attribute names in sorted order, then one row per record. Cells containing
//! commas, quotes or line breaks are quoted; an empty cell means the record
//! does not carry that attribute.

use std::collections::BTreeSet;

use serde_json::Value;
use thiserror::Error;

use crate::types::SymbolRecord;

/// Name of the key column, always first in the header.
pub const KEY_COLUMN: &str = "symbol";

#[derive(Debug, Error)]
pub enum TableError {
    #[error("missing header row")]
    MissingHeader,
    #[error("header has no `{KEY_COLUMN}` column")]
    MissingKeyColumn,
    #[error("unterminated quoted cell")]
    UnterminatedQuote,
    #[error("row {row} has an empty `{KEY_COLUMN}` cell")]
    EmptyKey { row: usize },
}

/// Column layout for a record set: the key first, remaining attribute names
/// in sorted order.
pub fn column_layout(records: &[SymbolRecord]) -> Vec<String> {
    let mut names: BTreeSet<&str> = BTreeSet::new();
    for record in records {
        for name in record.attributes.keys() {
            names.insert(name);
        }
    }
    let mut columns = vec![KEY_COLUMN.to_string()];
    columns.extend(names.into_iter().map(str::to_string));
    columns
}

/// Render the records as table text, header included.
pub fn render_table(records: &[SymbolRecord]) -> String {
    let refs: Vec<&SymbolRecord> = records.iter().collect();
    render_ref_table(&refs)
}

pub(crate) fn render_ref_table(records: &[&SymbolRecord]) -> String {
    let mut names: BTreeSet<&str> = BTreeSet::new();
    for record in records {
        for name in record.attributes.keys() {
            names.insert(name);
        }
    }

    let mut out = String::new();
    out.push_str(&encode_cell(KEY_COLUMN));
    for name in &names {
        out.push(',');
        out.push_str(&encode_cell(name));
    }
    out.push('\n');

    for record in records {
        out.push_str(&encode_cell(&record.symbol));
        for name in &names {
            out.push(',');
            let cell = record
                .attributes
                .get(*name)
                .map(value_to_cell)
                .unwrap_or_default();
            out.push_str(&encode_cell(&cell));
        }
        out.push('\n');
    }
    out
}

/// Parse table text back into records. Empty cells become absent attributes;
/// parsed attribute values are always strings.
pub fn parse_records(text: &str) -> Result<Vec<SymbolRecord>, TableError> {
    let mut rows = split_rows(text)?.into_iter();
    let header = rows.next().ok_or(TableError::MissingHeader)?;
    let key_index = header
        .iter()
        .position(|name| name == KEY_COLUMN)
        .ok_or(TableError::MissingKeyColumn)?;

    let mut records = Vec::new();
    for (index, cells) in rows.enumerate() {
        // Blank lines are skipped.
        if cells.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        let symbol = cells
            .get(key_index)
            .filter(|cell| !cell.is_empty())
            .ok_or(TableError::EmptyKey { row: index + 2 })?;
        let mut record = SymbolRecord::new(symbol.clone());
        for (column, cell) in header.iter().zip(cells.iter()) {
            if column == KEY_COLUMN || cell.is_empty() {
                continue;
            }
            record
                .attributes
                .insert(column.clone(), Value::String(cell.clone()));
        }
        records.push(record);
    }
    Ok(records)
}

/// Render an attribute value the way it lands in a table cell.
pub(crate) fn value_to_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn encode_cell(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') || cell.contains('\r') {
        let mut quoted = String::with_capacity(cell.len() + 2);
        quoted.push('"');
        for c in cell.chars() {
            if c == '"' {
                quoted.push('"');
            }
            quoted.push(c);
        }
        quoted.push('"');
        quoted
    } else {
        cell.to_string()
    }
}

// Quote-aware row splitting; line breaks inside quoted cells stay in the cell.
fn split_rows(text: &str) -> Result<Vec<Vec<String>>, TableError> {
    let mut rows = Vec::new();
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut chars = text.chars().peekable();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        cell.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => cell.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => cells.push(std::mem::take(&mut cell)),
            '\r' => {}
            '\n' => {
                cells.push(std::mem::take(&mut cell));
                rows.push(std::mem::take(&mut cells));
            }
            _ => cell.push(c),
        }
    }
    if in_quotes {
        return Err(TableError::UnterminatedQuote);
    }
    if !cell.is_empty() || !cells.is_empty() {
        cells.push(cell);
        rows.push(cells);
    }
    Ok(rows)
}
