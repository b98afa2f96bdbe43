/// Intents a session buffers before a manual flush is required.
pub const DEFAULT_MUTATION_BUFFER_SPACE: usize = 1000;
/// Interval between background flushes.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1000;
/// Default deadline applied to table operations.
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 30_000;
/// Rows returned per scanner batch.
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 1000;
/// Rows a tablet cursor fetches under a single read lock.
pub const TABLET_FETCH_SIZE: usize = 256;
