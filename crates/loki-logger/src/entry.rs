// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;
use crate::formatter::{render_text, Fields};
use crate::labels::{LabelSet, StreamKey};

/// Field holding the event time, in seconds since the Unix epoch.
///
/// Fractional seconds are kept to the precision of an `f64`, roughly a
/// microsecond for current dates.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Latest accepted timestamp, in nanoseconds. Anything later falls back to the
/// clock instead of being clamped.
const MAX_TIMESTAMP_NS: f64 = u64::MAX as f64;

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Structured(Fields),
}

impl Payload {
    /// The line as sent to Loki.
    pub fn to_line(&self) -> Result<String> {
        match self {
            Payload::Text(text) => Ok(text.clone()),
            Payload::Structured(fields) => Ok(serde_json::to_string(fields)?),
        }
    }
}

/// One buffered record. Immutable once built.
#[derive(Debug, Clone)]
pub struct LogEntry {
    labels: LabelSet,
    key: StreamKey,
    payload: Payload,
    timestamp_ns: u128,
    size: usize,
}

impl LogEntry {
    /// Builds an entry from promoted labels and the record's fields.
    ///
    /// With `structured` the payload keeps the mapping, otherwise it holds the
    /// `key: value` text rendering of it.
    pub fn new(labels: LabelSet, fields: Fields, structured: bool) -> Result<Self> {
        let timestamp_ns = timestamp_from_fields(&fields).unwrap_or_else(now_ns);
        let payload = if structured {
            Payload::Structured(fields)
        } else {
            Payload::Text(render_text(&fields))
        };

        let labels_size = serde_json::to_string(&labels)?.len();
        let payload_size = match &payload {
            Payload::Text(text) => text.len(),
            Payload::Structured(fields) => serde_json::to_string(fields)?.len(),
        };

        Ok(Self {
            key: labels.stream_key(),
            labels,
            payload,
            timestamp_ns,
            size: labels_size + payload_size,
        })
    }

    #[must_use]
    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    #[must_use]
    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    #[must_use]
    pub fn timestamp_ns(&self) -> u128 {
        self.timestamp_ns
    }

    /// Estimated size in bytes: JSON-encoded labels plus the encoded payload.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn timestamp_from_fields(fields: &Fields) -> Option<u128> {
    let seconds = fields.get(TIMESTAMP_FIELD).and_then(Value::as_f64)?;
    let nanos = seconds * 1e9;
    if !nanos.is_finite() || nanos < 0.0 || nanos >= MAX_TIMESTAMP_NS {
        return None;
    }
    Some(nanos as u128)
}

fn now_ns() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}
