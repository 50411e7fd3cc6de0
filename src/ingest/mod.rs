//! Block scanning and ingestion.

mod batch_size;
mod scanner;
mod timestamp_cache;

pub use batch_size::BatchSizeConfig;
pub use scanner::{Scanner, ScannerConfig};
pub use timestamp_cache::{BlockTimestampCache, DEFAULT_TIMESTAMP_TTL};
