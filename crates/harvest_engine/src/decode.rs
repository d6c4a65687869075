//! Decoding of the paginated search response envelope.

use serde::Deserialize;

use crate::types::{PageResult, SymbolRecord};

/// A structurally valid 200-response body.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedBody {
    /// The `data` payload: one page of results.
    Page(PageResult),
    /// The `errors` payload: backend-reported error messages.
    Errors(Vec<String>),
}

#[derive(Deserialize)]
struct Envelope {
    data: Option<PageData>,
    errors: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct PageData {
    #[serde(default, rename = "symbolList")]
    symbol_list: Vec<SymbolRecord>,
    #[serde(default, rename = "totalFound")]
    total_found: u64,
    #[serde(default, rename = "hasMore")]
    has_more: bool,
    #[serde(default, rename = "nextKey")]
    next_key: Option<String>,
}

/// Decode a 200-status body. `None` means the body is not a recognized
/// envelope (not JSON, or JSON without `data`/`errors`).
pub fn decode_page_body(body: &[u8]) -> Option<DecodedBody> {
    let envelope: Envelope = serde_json::from_slice(body).ok()?;
    if let Some(data) = envelope.data {
        return Some(DecodedBody::Page(PageResult {
            records: data.symbol_list,
            total_available: data.total_found,
            has_more: data.has_more,
            next_key: data.next_key,
        }));
    }
    envelope.errors.map(DecodedBody::Errors)
}
