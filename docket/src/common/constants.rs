// doc constants
pub const DOC_ID: &str = "_id";

// index type tags
pub const BTREE_INDEX: &str = "btree";
pub const TEXT_INDEX: &str = "text";

// catalog constants
pub const ID_INDEX_NAME: &str = "_id_";
pub const INDEX_NAME_SEPARATOR: &str = "_";

// limits
/// Longest computed index key accepted by a write, in encoded bytes.
pub const DEFAULT_MAX_INDEX_KEY_BYTES: usize = 1024;
/// Longest regex pattern accepted by query validation.
pub const DEFAULT_MAX_REGEX_PATTERN_LEN: usize = 16384;
/// Number of records a scan examines between deadline checks.
pub const DEFAULT_YIELD_INTERVAL: u32 = 128;
/// Default number of documents returned per cursor batch.
pub const DEFAULT_BATCH_SIZE: usize = 101;
/// Default idle time after which an open server cursor is reaped.
pub const DEFAULT_CURSOR_TIMEOUT_MILLIS: u64 = 600_000;

pub const DOCKET_VERSION: &str = env!("CARGO_PKG_VERSION");
