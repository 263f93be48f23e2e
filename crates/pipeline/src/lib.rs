//! The extraction-and-deduplication ingestion pipeline: search unread
//! candidates, extract structured events, fingerprint them, skip known
//! duplicates, append the rest to the ledger, and mark every consumed
//! message read.

mod fingerprint;
mod lock;
mod run;
mod sink;

pub use fingerprint::{FingerprintIndex, fingerprint, is_calendar_date, normalize_day};
pub use lock::RunLock;
pub use run::{IngestionPipeline, PipelineError, PipelineOptions, RunReport};
pub use sink::{CalendarEventOptions, CalendarSink, IcsFileSink};
