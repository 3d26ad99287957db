// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mapping of application events to flat field mappings.
//!
//! The handler only consumes [`Fields`]; anything that can turn an event into
//! a mapping implements [`Formatter`]. [`EventFormatter`] is the default for
//! `tracing` events and is what [`crate::layer::LokiLayer`] uses.

use serde_json::{json, Map, Value};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::field::{Field, Visit};
use tracing_core::Event;

use crate::error::FormatError;

/// Flat mapping of string keys to values representing one log event.
pub type Fields = Map<String, Value>;

pub trait Formatter<E: ?Sized>: Send + Sync {
    fn format(&self, event: &E) -> Result<Fields, FormatError>;
}

impl<E, F> Formatter<E> for F
where
    E: ?Sized,
    F: Fn(&E) -> Result<Fields, FormatError> + Send + Sync,
{
    fn format(&self, event: &E) -> Result<Fields, FormatError> {
        self(event)
    }
}

/// Renders fields as `key: value` pairs joined by `, `, in mapping order.
///
/// Strings are written without quotes, every other value as its JSON text.
#[must_use]
pub fn render_text(fields: &Fields) -> String {
    let mut line = String::new();
    for (i, (key, value)) in fields.iter().enumerate() {
        if i > 0 {
            line.push_str(", ");
        }
        line.push_str(key);
        line.push_str(": ");
        match value {
            Value::String(s) => line.push_str(s),
            other => line.push_str(&other.to_string()),
        }
    }
    line
}

/// Formats `tracing` events.
///
/// Produces `message`, `timestamp` (fractional seconds since the Unix epoch),
/// `level`, `target`, `module`, `file`, `line` and `thread`, followed by the
/// event's own fields. Event fields never replace the metadata keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventFormatter;

impl<'a> Formatter<Event<'a>> for EventFormatter {
    fn format(&self, event: &Event<'a>) -> Result<Fields, FormatError> {
        let metadata = event.metadata();

        let mut event_fields = Fields::new();
        event.record(&mut FieldVisitor(&mut event_fields));

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| FormatError(format!("system clock before Unix epoch: {e}")))?;

        let mut fields = Fields::new();
        fields.insert(
            "message".to_string(),
            event_fields
                .remove("message")
                .unwrap_or_else(|| Value::String(String::new())),
        );
        fields.insert("timestamp".to_string(), json!(timestamp.as_secs_f64()));
        fields.insert("level".to_string(), json!(metadata.level().to_string()));
        fields.insert("target".to_string(), json!(metadata.target()));
        if let Some(module) = metadata.module_path() {
            fields.insert("module".to_string(), json!(module));
        }
        if let Some(file) = metadata.file() {
            fields.insert("file".to_string(), json!(file));
        }
        if let Some(line) = metadata.line() {
            fields.insert("line".to_string(), json!(line));
        }
        fields.insert(
            "thread".to_string(),
            json!(std::thread::current().name().unwrap_or("unnamed")),
        );

        for (key, value) in event_fields {
            fields.entry(key).or_insert(value);
        }
        Ok(fields)
    }
}

struct FieldVisitor<'a>(&'a mut Fields);

impl Visit for FieldVisitor<'_> {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.0.insert(field.name().to_string(), json!(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().to_string(), json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().to_string(), json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.0.insert(field.name().to_string(), json!(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), json!(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.0
            .insert(field.name().to_string(), json!(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0
            .insert(field.name().to_string(), json!(format!("{value:?}")));
    }
}
