//! Background flusher for `FlushMode::AutoFlushBackground` sessions.
//!
//! The flusher thread sleeps until either the flush interval elapses or
//! `apply` signals that the buffer reached its size threshold, then applies
//! the whole buffer and queues the responses on the session.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::SessionShared;

pub(crate) enum FlushSignal {
    /// The buffer reached its size threshold.
    Flush,
    Shutdown,
}

pub(crate) struct BackgroundFlusher {
    signal_tx: mpsc::Sender<FlushSignal>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundFlusher {
    pub(crate) fn spawn(shared: Arc<SessionShared>) -> Result<Self> {
        let (signal_tx, signal_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("session-flusher".to_string())
            .spawn(move || flusher_loop(&shared, signal_rx))
            .map_err(|e| Error::Config(format!("failed to start background flusher: {}", e)))?;
        Ok(Self {
            signal_tx,
            handle: Some(handle),
        })
    }

    pub(crate) fn wake(&self) {
        let _ = self.signal_tx.send(FlushSignal::Flush);
    }

    /// Stop the thread and wait for any in-progress flush to finish.
    pub(crate) fn stop(mut self) {
        let _ = self.signal_tx.send(FlushSignal::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("background flusher panicked");
            }
        }
    }
}

fn flusher_loop(shared: &SessionShared, signals: mpsc::Receiver<FlushSignal>) {
    let interval = shared.config.flush_interval;
    let threshold = shared.config.mutation_buffer_space;
    let mut deadline = Instant::now() + interval;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match signals.recv_timeout(remaining) {
            Ok(FlushSignal::Flush) => {
                // A flush may already have drained the buffer since the signal was sent.
                if shared.pending_count() < threshold {
                    continue;
                }
                debug!(threshold, "buffer threshold reached");
            }
            Err(RecvTimeoutError::Timeout) => {}
            Ok(FlushSignal::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
        }

        shared.flush_to_queue();
        deadline = Instant::now() + interval;
    }
    debug!("background flusher stopped");
}
