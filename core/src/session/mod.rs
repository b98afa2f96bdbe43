//! Client sessions that buffer mutation intents before applying them.
//!
//! A session moves through `open -> (apply* -> flush)* -> closed`. How and
//! when the buffer is applied depends on the flush mode:
//! - `AutoFlushSync`: every `apply` is applied immediately and its response
//!   returned to the caller.
//! - `ManualFlush`: intents accumulate until `flush`; `apply` fails with
//!   `BufferFull` once `mutation_buffer_space` intents are pending.
//! - `AutoFlushBackground`: a flusher thread applies the buffer when the
//!   flush interval elapses or the buffer reaches `mutation_buffer_space`,
//!   whichever comes first. Responses are queued for `take_responses`.
//!
//! A flush applies intents in submission order and reports each one
//! separately; a failing intent does not stop the rest of the batch.

mod flusher;
mod operation;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::constants::{DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_MUTATION_BUFFER_SPACE};
use crate::error::{Error, Result};

use flusher::BackgroundFlusher;

pub use operation::{MutationIntent, OperationKind, OperationResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    AutoFlushSync,
    AutoFlushBackground,
    ManualFlush,
}

/// Configuration for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub flush_mode: FlushMode,
    /// Pending intents allowed in manual mode; flush threshold in background mode.
    pub mutation_buffer_space: usize,
    /// Maximum time an intent waits in a background session's buffer.
    pub flush_interval: Duration,
    /// Per-intent deadline. Falls back to the table's default timeout.
    pub timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            flush_mode: FlushMode::AutoFlushSync,
            mutation_buffer_space: DEFAULT_MUTATION_BUFFER_SPACE,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            timeout: None,
        }
    }
}

impl SessionConfig {
    pub fn with_flush_mode(flush_mode: FlushMode) -> Self {
        Self {
            flush_mode,
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.mutation_buffer_space == 0 {
            return Err(Error::Config("mutation_buffer_space must be at least 1".into()));
        }
        if self.flush_mode == FlushMode::AutoFlushBackground && self.flush_interval.is_zero() {
            return Err(Error::Config("flush_interval must be non-zero in background mode".into()));
        }
        Ok(())
    }
}

/// State shared between a session and its background flusher.
pub(crate) struct SessionShared {
    config: SessionConfig,
    buffer: Mutex<Vec<MutationIntent>>,
    /// Held for the duration of a flush so batches apply in submission order.
    flush_lock: Mutex<()>,
    closed: AtomicBool,
    responses_tx: mpsc::Sender<OperationResponse>,
}

impl SessionShared {
    fn pending_count(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Apply every pending intent in submission order.
    fn flush(&self) -> Vec<OperationResponse> {
        let _ordering = self.flush_lock.lock();
        let batch = std::mem::take(&mut *self.buffer.lock());
        batch.into_iter().map(|intent| self.apply_one(intent)).collect()
    }

    fn apply_one(&self, intent: MutationIntent) -> OperationResponse {
        let deadline = intent.table().deadline_after(self.config.timeout);
        let result = intent.apply(deadline);
        OperationResponse::new(intent, result)
    }

    /// Flush and hand the responses to the session's response queue.
    fn flush_to_queue(&self) {
        let responses = self.flush();
        if responses.is_empty() {
            return;
        }
        let failed = responses.iter().filter(|r| r.is_error()).count();
        debug!(applied = responses.len(), failed, "background flush");
        self.deliver(responses);
    }

    fn deliver(&self, responses: Vec<OperationResponse>) {
        for response in responses {
            // The receiver lives as long as the session; a send only fails
            // while the session is being dropped.
            let _ = self.responses_tx.send(response);
        }
    }
}

/// A buffering write context over one or more tables.
pub struct Session {
    shared: Arc<SessionShared>,
    flusher: Mutex<Option<BackgroundFlusher>>,
    responses: Mutex<mpsc::Receiver<OperationResponse>>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let (responses_tx, responses_rx) = mpsc::channel();
        let background = config.flush_mode == FlushMode::AutoFlushBackground;
        let shared = Arc::new(SessionShared {
            config,
            buffer: Mutex::new(Vec::new()),
            flush_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            responses_tx,
        });

        let flusher = if background {
            Some(BackgroundFlusher::spawn(Arc::clone(&shared))?)
        } else {
            None
        };

        Ok(Self {
            shared,
            flusher: Mutex::new(flusher),
            responses: Mutex::new(responses_rx),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn flush_mode(&self) -> FlushMode {
        self.shared.config.flush_mode
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Number of buffered intents not yet applied.
    pub fn pending_count(&self) -> usize {
        self.shared.pending_count()
    }

    pub fn has_pending_operations(&self) -> bool {
        self.pending_count() > 0
    }

    /// Submit an intent.
    ///
    /// Returns the response in `AutoFlushSync` mode and None otherwise.
    pub fn apply(&self, intent: MutationIntent) -> Result<Option<OperationResponse>> {
        match self.shared.config.flush_mode {
            FlushMode::AutoFlushSync => {
                let _ordering = self.shared.flush_lock.lock();
                if self.is_closed() {
                    return Err(Error::SessionClosed);
                }
                Ok(Some(self.shared.apply_one(intent)))
            }
            FlushMode::ManualFlush => {
                let mut buffer = self.shared.buffer.lock();
                if self.is_closed() {
                    return Err(Error::SessionClosed);
                }
                let capacity = self.shared.config.mutation_buffer_space;
                if buffer.len() >= capacity {
                    return Err(Error::BufferFull { capacity });
                }
                buffer.push(intent);
                Ok(None)
            }
            FlushMode::AutoFlushBackground => {
                let pending = {
                    let mut buffer = self.shared.buffer.lock();
                    if self.is_closed() {
                        return Err(Error::SessionClosed);
                    }
                    buffer.push(intent);
                    buffer.len()
                };
                if pending >= self.shared.config.mutation_buffer_space {
                    if let Some(flusher) = self.flusher.lock().as_ref() {
                        flusher.wake();
                    }
                }
                Ok(None)
            }
        }
    }

    /// Apply all buffered intents now, one response per intent, in
    /// submission order.
    pub fn flush(&self) -> Vec<OperationResponse> {
        let responses = self.shared.flush();
        if !responses.is_empty() {
            debug!(
                applied = responses.len(),
                failed = responses.iter().filter(|r| r.is_error()).count(),
                "session flush"
            );
        }
        responses
    }

    /// Responses produced by background flushes and by `close`, oldest first.
    pub fn take_responses(&self) -> Vec<OperationResponse> {
        self.responses.lock().try_iter().collect()
    }

    /// Drain every pending intent and refuse further `apply` calls.
    ///
    /// All intents are attempted even when some fail; the first failure is
    /// returned and every drained response is queued for `take_responses`.
    pub fn close(&self) -> Result<()> {
        {
            let _buffer = self.shared.buffer.lock();
            if self.shared.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
        }

        let flusher = self.flusher.lock().take();
        if let Some(flusher) = flusher {
            flusher.stop();
        }

        let responses = self.shared.flush();
        let first_error = responses.iter().find_map(|r| r.error().cloned());
        debug!(
            drained = responses.len(),
            failed = responses.iter().filter(|r| r.is_error()).count(),
            "session closed"
        );
        self.shared.deliver(responses);

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "dropped session failed to drain pending intents");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;
    use crate::partition::PartitionConfig;
    use crate::schema::{ColumnType, Schema, Value};
    use crate::table::Table;

    fn table() -> Arc<Table> {
        let schema = Schema::builder()
            .add_key_column("id", ColumnType::Int32)
            .add_column("name", ColumnType::String)
            .build()
            .unwrap();
        let partitions = PartitionConfig {
            num_hash_buckets: 4,
            ..Default::default()
        };
        Arc::new(Table::new("t", schema, &partitions, None).unwrap())
    }

    fn insert(table: &Arc<Table>, id: i32) -> MutationIntent {
        let mut intent = table.new_insert();
        intent.row_mut().set("id", id).unwrap().set("name", format!("n{}", id)).unwrap();
        intent
    }

    fn live_rows(table: &Table) -> usize {
        table.stats().live_rows
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_sync_mode_applies_immediately() {
        let table = table();
        let session = Session::new(SessionConfig::default()).unwrap();

        let response = session.apply(insert(&table, 1)).unwrap().unwrap();
        assert!(!response.is_error());
        assert_eq!(live_rows(&table), 1);

        let duplicate = session.apply(insert(&table, 1)).unwrap().unwrap();
        assert!(duplicate.error().unwrap().is_duplicate_key());
        assert!(!session.has_pending_operations());
    }

    #[test]
    fn test_manual_mode_waits_for_flush() {
        let table = table();
        let session = Session::new(SessionConfig::with_flush_mode(FlushMode::ManualFlush)).unwrap();

        for id in 0..5 {
            assert!(session.apply(insert(&table, id)).unwrap().is_none());
        }
        assert_eq!(session.pending_count(), 5);
        assert_eq!(live_rows(&table), 0);

        let responses = session.flush();
        assert_eq!(responses.len(), 5);
        assert!(responses.iter().all(|r| !r.is_error()));
        assert_eq!(live_rows(&table), 5);
    }

    #[test]
    fn test_manual_mode_buffer_full() {
        let table = table();
        let config = SessionConfig {
            flush_mode: FlushMode::ManualFlush,
            mutation_buffer_space: 2,
            ..Default::default()
        };
        let session = Session::new(config).unwrap();

        session.apply(insert(&table, 1)).unwrap();
        session.apply(insert(&table, 2)).unwrap();
        let err = session.apply(insert(&table, 3)).unwrap_err();
        assert_eq!(err, Error::BufferFull { capacity: 2 });

        session.flush();
        assert!(session.apply(insert(&table, 3)).is_ok());
    }

    #[test]
    fn test_flush_reports_partial_failures_in_order() {
        let table = table();
        let session = Session::new(SessionConfig::with_flush_mode(FlushMode::ManualFlush)).unwrap();

        let mut update_missing = table.new_update();
        update_missing.row_mut().set("id", 99).unwrap();

        session.apply(insert(&table, 1)).unwrap();
        session.apply(insert(&table, 1)).unwrap();
        session.apply(update_missing).unwrap();
        session.apply(insert(&table, 2)).unwrap();

        let responses = session.flush();
        let outcomes: Vec<bool> = responses.iter().map(|r| r.is_error()).collect();
        assert_eq!(outcomes, vec![false, true, true, false]);
        assert!(responses[1].error().unwrap().is_duplicate_key());
        assert!(responses[2].error().unwrap().is_not_found());
        assert_eq!(live_rows(&table), 2);

        // Retry just the failed subset after fixing the conflict.
        let mut delete = table.new_delete();
        delete.row_mut().set("id", 1).unwrap();
        table.delete(delete.row()).unwrap();
        let retry = responses.into_iter().filter(|r| r.is_error()).map(|r| r.into_intent());
        for intent in retry {
            session.apply(intent).unwrap();
        }
        let retried = session.flush();
        assert!(!retried[0].is_error());
        assert!(retried[1].is_error());
    }

    #[test]
    fn test_background_flush_on_interval() {
        let table = table();
        let config = SessionConfig {
            flush_mode: FlushMode::AutoFlushBackground,
            mutation_buffer_space: 1000,
            flush_interval: Duration::from_millis(20),
            ..Default::default()
        };
        let session = Session::new(config).unwrap();

        for id in 0..10 {
            assert!(session.apply(insert(&table, id)).unwrap().is_none());
        }
        assert!(wait_for(|| live_rows(&table) == 10));
        assert!(wait_for(|| !session.has_pending_operations()));

        let responses = session.take_responses();
        assert_eq!(responses.len(), 10);
        assert!(responses.iter().all(|r| !r.is_error()));
    }

    #[test]
    fn test_background_flush_on_threshold() {
        let table = table();
        let config = SessionConfig {
            flush_mode: FlushMode::AutoFlushBackground,
            mutation_buffer_space: 4,
            flush_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let session = Session::new(config).unwrap();

        for id in 0..4 {
            session.apply(insert(&table, id)).unwrap();
        }
        assert!(wait_for(|| live_rows(&table) == 4));
    }

    #[test]
    fn test_close_drains_pending() {
        let table = table();
        let config = SessionConfig {
            flush_mode: FlushMode::AutoFlushBackground,
            flush_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let session = Session::new(config).unwrap();
        for id in 0..25 {
            session.apply(insert(&table, id)).unwrap();
        }

        session.close().unwrap();
        assert_eq!(live_rows(&table), 25);
        assert!(session.is_closed());
        assert_eq!(session.apply(insert(&table, 100)).unwrap_err(), Error::SessionClosed);
        assert!(session.close().is_ok());
    }

    #[test]
    fn test_close_returns_first_error_and_drains_rest() {
        let table = table();
        let session = Session::new(SessionConfig::with_flush_mode(FlushMode::ManualFlush)).unwrap();
        let mut delete_missing = table.new_delete();
        delete_missing.row_mut().set("id", 7).unwrap();

        session.apply(insert(&table, 1)).unwrap();
        session.apply(delete_missing).unwrap();
        session.apply(insert(&table, 1)).unwrap();
        session.apply(insert(&table, 2)).unwrap();

        let err = session.close().unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(live_rows(&table), 2);
        assert_eq!(session.take_responses().len(), 4);
    }

    #[test]
    fn test_drop_drains_pending() {
        let table = table();
        {
            let session =
                Session::new(SessionConfig::with_flush_mode(FlushMode::ManualFlush)).unwrap();
            session.apply(insert(&table, 1)).unwrap();
        }
        let mut key = table.new_row();
        key.set("id", 1).unwrap();
        let row = table.get(&key).unwrap().unwrap();
        assert_eq!(row.get("name"), Some(&Value::from("n1")));
    }

    #[test]
    fn test_invalid_config() {
        let zero_space = SessionConfig {
            mutation_buffer_space: 0,
            ..Default::default()
        };
        assert!(matches!(Session::new(zero_space), Err(Error::Config(_))));

        let zero_interval = SessionConfig {
            flush_mode: FlushMode::AutoFlushBackground,
            flush_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(Session::new(zero_interval), Err(Error::Config(_))));
    }

    #[test]
    fn test_concurrent_sessions() {
        let table = table();
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    let session =
                        Session::new(SessionConfig::with_flush_mode(FlushMode::ManualFlush))
                            .unwrap();
                    for i in 0..100 {
                        session.apply(insert(&table, worker * 1000 + i)).unwrap();
                    }
                    session.close().unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(live_rows(&table), 400);
    }
}
