//! Harvest engine: resumable download of a paginated symbol catalog.
//!
//! The engine walks a cursor-paginated listing page by page, persisting each
//! page as a durable batch and checkpointing after every write, so a
//! multi-hour download survives crashes and transient backend failures and
//! can be resumed without losing or duplicating work.
mod checkpoint;
mod decode;
mod engine;
mod fetch;
mod merge;
mod partition;
mod persist;
mod sink;
mod table;
mod transport;
mod types;

pub use checkpoint::{Checkpoint, CheckpointError, CheckpointStore, CHECKPOINT_FILENAME};
pub use decode::{decode_page_body, DecodedBody};
pub use engine::{EngineError, HarvestEngine, HarvestSettings};
pub use fetch::{classify_attempt, AttemptOutcome, PageFetcher, RetrySettings};
pub use merge::{dedup_in_order, write_merged, MERGED_FILENAME};
pub use partition::{partition_by_exchange_and_type, PartitionSummary, PARTITION_DIR};
pub use persist::{ensure_output_dir, AtomicFileWriter, PersistError};
pub use sink::{batch_filename, BatchSink, CsvBatchSink, SinkError};
pub use table::{column_layout, parse_records, render_table, TableError, KEY_COLUMN};
pub use transport::{
    CategoryListing, PageRequest, ReqwestTransport, Transport, TransportError, TransportResponse,
    TransportSettings, DEFAULT_PAGE_LIMIT,
};
pub use types::{
    AbortInfo, FailureKind, FetchFailure, HarvestOutcome, HarvestSummary, PageResult, SymbolRecord,
};
