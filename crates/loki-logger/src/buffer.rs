// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared FIFO between producers and the flush controller.
//!
//! Producers push from any thread and never wait on a send; the flush
//! controller drains everything at once. The running byte total and the
//! force-flush flag live under the same lock as the queue, so a drain and its
//! counter reset are a single atomic step. The same holds for closing: once the
//! final drain has closed the buffer, every later push is rejected.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::trace;

use crate::entry::LogEntry;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct BufferState {
    entries: VecDeque<LogEntry>,
    /// Bytes pushed since the last drain
    pending_bytes: usize,
    force_flush: bool,
    closed: bool,
}

#[derive(Debug)]
pub struct BatchBuffer {
    state: Mutex<BufferState>,
    /// Byte threshold that forces a flush, 0 disables it
    max_stream_size: usize,
    flush_signal: Notify,
}

impl BatchBuffer {
    #[must_use]
    pub fn new(max_stream_size: usize) -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
            max_stream_size,
            flush_signal: Notify::new(),
        }
    }

    /// Appends an entry. Never blocks beyond the critical section.
    ///
    /// Once the pending bytes reach the threshold the force-flush flag is set
    /// and the flush controller is woken. Fails with [`Error::ShutDown`] once
    /// the buffer is closed.
    pub fn push(&self, entry: LogEntry) -> Result<()> {
        let size = entry.size();
        let mut state = self.lock();
        if state.closed {
            return Err(Error::ShutDown);
        }
        state.entries.push_back(entry);
        state.pending_bytes = state.pending_bytes.saturating_add(size);

        if self.max_stream_size > 0
            && state.pending_bytes >= self.max_stream_size
            && !state.force_flush
        {
            state.force_flush = true;
            drop(state);
            trace!("LOKI | Stream size threshold reached, requesting flush");
            self.flush_signal.notify_one();
        }
        Ok(())
    }

    /// Removes and returns every queued entry in insertion order, resetting
    /// the byte total and the force-flush flag.
    pub fn drain_all(&self) -> Vec<LogEntry> {
        let mut state = self.lock();
        state.pending_bytes = 0;
        state.force_flush = false;
        Vec::from(std::mem::take(&mut state.entries))
    }

    /// Same as [`BatchBuffer::drain_all`], and closes the buffer in the same
    /// critical section: nothing pushed afterwards can be left behind.
    pub fn drain_all_and_close(&self) -> Vec<LogEntry> {
        let mut state = self.lock();
        state.closed = true;
        state.pending_bytes = 0;
        state.force_flush = false;
        Vec::from(std::mem::take(&mut state.entries))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.lock().pending_bytes
    }

    #[must_use]
    pub fn force_flush_requested(&self) -> bool {
        self.lock().force_flush
    }

    /// Resolves once a push crosses the size threshold.
    ///
    /// A request made while nobody is waiting is remembered, so it is never
    /// missed by a controller that starts waiting afterwards.
    pub async fn flush_requested(&self) {
        self.flush_signal.notified().await;
    }

    // A panic while holding the lock can't leave the queue half-updated, so a
    // poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
