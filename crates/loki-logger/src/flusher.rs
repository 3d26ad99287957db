// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background flushing of buffered entries.
//!
//! Before every pass the controller waits up to the flush timeout. A push
//! crossing the size threshold or a shutdown request cuts the wait short; a
//! stale wake whose force-flush flag was already cleared by an earlier pass
//! does not. Each pass then drains, groups, serializes and sends.
//!
//! One pass drains the whole buffer, so at most one send is in flight.
//! Failed sends are logged and dropped; the loop carries on with its schedule.
//! On shutdown one last pass runs before the task ends.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::buffer::BatchBuffer;
use crate::entry::LogEntry;
use crate::error::Result;
use crate::stream::Streams;
use crate::transport::Transport;

pub struct FlushController {
    buffer: Arc<BatchBuffer>,
    transport: Arc<dyn Transport>,
    flush_timeout: Duration,
    cancel_token: CancellationToken,
}

impl FlushController {
    #[must_use]
    pub fn new(
        buffer: Arc<BatchBuffer>,
        transport: Arc<dyn Transport>,
        flush_timeout: Duration,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            buffer,
            transport,
            flush_timeout,
            cancel_token,
        }
    }

    /// Runs until the cancellation token fires, then flushes one last time.
    pub async fn run(self) {
        debug!("LOKI | Flush controller started");

        while self.wait().await {
            self.flush().await;
        }

        debug!("LOKI | Flush controller shutting down, flushing remaining entries");
        let entries = self.buffer.drain_all_and_close();
        report(self.send(entries).await);
    }

    /// Waits for the timeout or a forced flush. Returns `false` on shutdown.
    async fn wait(&self) -> bool {
        let deadline = Instant::now() + self.flush_timeout;
        loop {
            if self.buffer.force_flush_requested() {
                return true;
            }
            tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => return false,
                () = self.buffer.flush_requested() => {}
                () = sleep_until(deadline) => return true,
            }
        }
    }

    /// One flush pass. Errors are logged and the batch is dropped.
    pub async fn flush(&self) {
        report(self.try_flush().await);
    }

    /// Drains the buffer and sends the grouped batch.
    ///
    /// Returns the number of lines sent; an empty buffer sends nothing.
    pub async fn try_flush(&self) -> Result<usize> {
        let entries = self.buffer.drain_all();
        self.send(entries).await
    }

    async fn send(&self, entries: Vec<LogEntry>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let streams = Streams::from_entries(entries)?;
        let lines = streams.line_count();
        debug!(
            "LOKI | Sending {} lines in {} streams",
            lines,
            streams.len()
        );

        let payload = streams.serialize()?;
        self.transport.send(payload).await?;
        Ok(lines)
    }

}

fn report(result: Result<usize>) {
    match result {
        Ok(0) => {}
        Ok(lines) => debug!("LOKI | Flushed {} lines", lines),
        Err(e) => error!("LOKI | Dropping batch: {}", e),
    }
}
