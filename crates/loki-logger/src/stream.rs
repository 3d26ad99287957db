// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Grouping of drained entries into Loki streams.
//!
//! Every flush pass turns the drained entries into a [`Streams`] batch: one
//! [`StreamAccumulator`] per [`StreamKey`], each holding its lines in arrival
//! order. The batch serializes to the Loki push format:
//!
//! ```json
//! {"streams":[{"stream":{"app":"x"},"values":[["1700000000000000000","line"]]}]}
//! ```

use serde::Serialize;
use std::collections::HashMap;

use crate::entry::LogEntry;
use crate::error::Result;
use crate::labels::{LabelSet, StreamKey};

/// Lines of one stream, collected during a single flush pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamAccumulator {
    stream: LabelSet,
    /// `[timestamp in nanoseconds, line]` pairs, in arrival order
    values: Vec<[String; 2]>,
}

impl StreamAccumulator {
    #[must_use]
    pub fn new(labels: LabelSet) -> Self {
        Self {
            stream: labels,
            values: Vec::new(),
        }
    }

    pub fn append(&mut self, timestamp_ns: u128, line: String) {
        self.values.push([timestamp_ns.to_string(), line]);
    }

    #[must_use]
    pub fn labels(&self) -> &LabelSet {
        &self.stream
    }

    /// Lines without their timestamps.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|[_, line]| line.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The batch produced by one flush pass.
#[derive(Debug, Default, Serialize)]
pub struct Streams {
    streams: Vec<StreamAccumulator>,
}

impl Streams {
    /// Groups entries by stream key.
    ///
    /// Streams are ordered by first appearance and every stream is seeded with
    /// the labels of its first entry. Fails if a payload can't be encoded, in
    /// which case the whole batch is dropped by the caller.
    pub fn from_entries(entries: impl IntoIterator<Item = LogEntry>) -> Result<Self> {
        let mut index: HashMap<StreamKey, usize> = HashMap::new();
        let mut streams: Vec<StreamAccumulator> = Vec::new();

        for entry in entries {
            let line = entry.payload().to_line()?;
            let position = match index.get(entry.key()) {
                Some(position) => *position,
                None => {
                    streams.push(StreamAccumulator::new(entry.labels().clone()));
                    index.insert(entry.key().clone(), streams.len() - 1);
                    streams.len() - 1
                }
            };
            streams[position].append(entry.timestamp_ns(), line);
        }

        Ok(Self { streams })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    #[must_use]
    pub fn streams(&self) -> &[StreamAccumulator] {
        &self.streams
    }

    /// Total number of lines across all streams.
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.streams.iter().map(StreamAccumulator::len).sum()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
