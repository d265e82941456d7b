use crate::common::{
    DEFAULT_BATCH_SIZE, DEFAULT_CURSOR_TIMEOUT_MILLIS, DEFAULT_MAX_INDEX_KEY_BYTES,
    DEFAULT_MAX_REGEX_PATTERN_LEN, DEFAULT_YIELD_INTERVAL,
};
use crate::database::Docket;
use crate::errors::DocketResult;
use std::time::Duration;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct DocketConfig {
    /// Longest computed index key accepted by a write, in encoded bytes.
    pub max_index_key_bytes: usize,
    /// Longest regex pattern accepted by query validation.
    pub max_regex_pattern_len: usize,
    /// Documents returned per cursor batch when the client does not ask
    /// for a specific size.
    pub default_batch_size: usize,
    /// Idle time after which an open server cursor is reaped.
    pub cursor_timeout: Duration,
    /// Records a scan examines between deadline checks.
    pub yield_interval: u32,
}

impl Default for DocketConfig {
    fn default() -> Self {
        DocketConfig {
            max_index_key_bytes: DEFAULT_MAX_INDEX_KEY_BYTES,
            max_regex_pattern_len: DEFAULT_MAX_REGEX_PATTERN_LEN,
            default_batch_size: DEFAULT_BATCH_SIZE,
            cursor_timeout: Duration::from_millis(DEFAULT_CURSOR_TIMEOUT_MILLIS),
            yield_interval: DEFAULT_YIELD_INTERVAL,
        }
    }
}

/// Builder for [Docket] instances.
///
/// ```ignore
/// let db = Docket::builder()
///     .default_batch_size(50)
///     .open()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct DocketBuilder {
    config: DocketConfig,
}

impl DocketBuilder {
    pub fn new() -> Self {
        DocketBuilder {
            config: DocketConfig::default(),
        }
    }

    pub fn max_index_key_bytes(mut self, bytes: usize) -> Self {
        self.config.max_index_key_bytes = bytes;
        self
    }

    pub fn max_regex_pattern_len(mut self, len: usize) -> Self {
        self.config.max_regex_pattern_len = len;
        self
    }

    pub fn default_batch_size(mut self, batch_size: usize) -> Self {
        self.config.default_batch_size = batch_size.max(1);
        self
    }

    pub fn cursor_timeout(mut self, timeout: Duration) -> Self {
        self.config.cursor_timeout = timeout;
        self
    }

    pub fn yield_interval(mut self, interval: u32) -> Self {
        self.config.yield_interval = interval.max(1);
        self
    }

    /// Opens an in-memory database with this configuration.
    pub fn open(self) -> DocketResult<Docket> {
        Docket::open_with_config(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DocketConfig::default();
        assert_eq!(config.max_index_key_bytes, DEFAULT_MAX_INDEX_KEY_BYTES);
        assert_eq!(config.default_batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_builder_overrides() {
        let builder = DocketBuilder::new()
            .default_batch_size(7)
            .yield_interval(16);
        assert_eq!(builder.config.default_batch_size, 7);
        assert_eq!(builder.config.yield_interval, 16);
    }

    #[test]
    fn test_batch_size_floor() {
        let builder = DocketBuilder::new().default_batch_size(0);
        assert_eq!(builder.config.default_batch_size, 1);
    }
}
