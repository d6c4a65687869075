use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One catalog entry. The engine only interprets the `symbol` key; every
/// other attribute rides along in the open map and is first examined at the
/// sink and partition boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRecord {
    /// Unique key used for deduplication.
    pub symbol: String,
    /// Remaining attributes (description, exchange, securityType, ...).
    #[serde(flatten)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl SymbolRecord {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// One decoded page of the paginated listing.
///
/// `has_more == false` or `next_key == None` is the authoritative termination
/// signal, independent of whether `records` is empty.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageResult {
    pub records: Vec<SymbolRecord>,
    /// Catalog size reported by the backend; authoritative on the first page only.
    pub total_available: u64,
    pub has_more: bool,
    pub next_key: Option<String>,
}

/// A whole-page failure returned by the retrying fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchFailure {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Backend-reported error message that is not worth retrying.
    Backend,
    /// Non-retryable HTTP status.
    HttpStatus(u16),
    /// Response body was not a recognized envelope.
    Malformed,
    /// All attempts used; the message carries the last observed error.
    Exhausted,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Backend => write!(f, "backend error"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Malformed => write!(f, "malformed response"),
            FailureKind::Exhausted => write!(f, "retries exhausted"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal result of one engine run.
#[derive(Debug, Clone, PartialEq)]
pub enum HarvestOutcome {
    /// The catalog was fully harvested, merged and deduplicated.
    Completed(HarvestSummary),
    /// Controlled stop; checkpoint and batches stay on disk for a resume.
    Aborted(AbortInfo),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HarvestSummary {
    /// Batches contributing to the merged output, resumed ones included.
    pub batches: u64,
    /// Records persisted across all batches, duplicates included.
    pub total_records: u64,
    /// Catalog size the backend reported on the first page, 0 if unknown.
    pub total_reported: u64,
    pub unique_records: u64,
    pub duplicates_removed: u64,
    /// The merged, deduplicated record set, first occurrence of each key.
    pub records: Vec<SymbolRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortInfo {
    /// Batch number to pass on the next invocation.
    pub resume_from: u64,
    pub completed_batches: u64,
    pub total_records: u64,
    pub last_error: String,
}
