pub mod decode;
pub mod entry;
pub mod reader;
pub mod scanner;
pub mod store;

pub use decode::{decode_answer, DecodedAnswer};
pub use entry::{anonymize_ip, LogEntry, LogResult};
pub use store::QueryLog;

/// Current log file name, in the working directory.
pub const LOG_FILE: &str = "querylog.json";
/// The single retained historical generation.
pub const LOG_FILE_OLD: &str = "querylog.json.1";

/// Hard cap on lines examined per search request.
pub const MAX_SEARCH_ENTRIES: usize = 50_000;
