// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Producer-facing handle.
//!
//! A [`LokiHandler`] owns the shared buffer and the background flush task.
//! Recording never waits on the network: it formats the record, builds a
//! [`LogEntry`] and pushes it. Failures are logged and the record is dropped.
//!
//! The final flush is explicit: call [`LokiHandler::shutdown`] before the
//! runtime goes away. Dropping the handler only requests it.

use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::buffer::BatchBuffer;
use crate::config::Config;
use crate::entry::LogEntry;
use crate::error::{Error, Result};
use crate::flusher::FlushController;
use crate::formatter::{Fields, Formatter};
use crate::labels::LabelSet;
use crate::transport::{HttpTransport, Transport};

pub struct LokiHandler {
    buffer: Arc<BatchBuffer>,
    labels: LabelSet,
    label_keys: Vec<String>,
    message_in_json_format: bool,
    cancel_token: CancellationToken,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl LokiHandler {
    /// Creates a handler pushing to `config.url` over HTTP.
    ///
    /// Must be called within a tokio runtime, the flush task is spawned on it.
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(config)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Same as [`LokiHandler::new`] with a custom transport.
    pub fn with_transport(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()?;

        let buffer = Arc::new(BatchBuffer::new(config.max_stream_size));
        let cancel_token = CancellationToken::new();
        let controller = FlushController::new(
            Arc::clone(&buffer),
            transport,
            config.flush_timeout,
            cancel_token.clone(),
        );
        let flush_task = runtime.spawn(controller.run());

        debug!(
            "LOKI | Handler started, flush timeout {:?}, max stream size {}",
            config.flush_timeout, config.max_stream_size
        );

        Ok(Self {
            buffer,
            labels: config.labels.clone(),
            label_keys: config.label_keys.clone(),
            message_in_json_format: config.message_in_json_format,
            cancel_token,
            flush_task: Mutex::new(Some(flush_task)),
        })
    }

    /// Buffers one record. Never fails; errors drop the record.
    pub fn record(&self, fields: Fields) {
        if let Err(e) = self.try_record(fields) {
            debug!("LOKI | Dropping record: {}", e);
        }
    }

    pub fn try_record(&self, fields: Fields) -> Result<()> {
        if self.cancel_token.is_cancelled() {
            return Err(Error::ShutDown);
        }
        let labels = self.labels.with_promoted(&self.label_keys, &fields);
        let entry = LogEntry::new(labels, fields, self.message_in_json_format)?;
        // the buffer is the authority: the final pass closes it as it drains
        self.buffer.push(entry)
    }

    /// Formats `event` and buffers the result. Never fails.
    pub fn emit<E, F>(&self, formatter: &F, event: &E)
    where
        E: ?Sized,
        F: Formatter<E> + ?Sized,
    {
        if let Err(e) = self.try_emit(formatter, event) {
            debug!("LOKI | Dropping event: {}", e);
        }
    }

    pub fn try_emit<E, F>(&self, formatter: &F, event: &E) -> Result<()>
    where
        E: ?Sized,
        F: Formatter<E> + ?Sized,
    {
        let fields = formatter.format(event)?;
        self.try_record(fields)
    }

    /// Number of entries waiting for the next flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Stops the flush task after one final flush and waits for it.
    ///
    /// Later calls return immediately. A record accepted before the final
    /// drain is shipped by it; any record after that is rejected.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();

        let flush_task = self
            .flush_task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();

        if let Some(flush_task) = flush_task {
            if let Err(e) = flush_task.await {
                debug!("LOKI | Flush task ended abnormally: {}", e);
            }
            debug!("LOKI | Handler shut down");
        }
    }
}

impl Drop for LokiHandler {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FormatError, TransportError};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::time::sleep;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingTransport {
        payloads: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
            let value = serde_json::from_slice(&payload).unwrap();
            self.payloads.lock().unwrap().push(value);
            Ok(())
        }
    }

    fn config(message_in_json_format: bool) -> Config {
        Config {
            label_keys: vec!["level".to_string()],
            message_in_json_format,
            flush_timeout: Duration::from_secs(3600),
            ..Config::new("http://localhost:3100/loki/api/v1/push", LabelSet::from_iter([("app", "x")]))
        }
    }

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_new_requires_runtime() {
        let transport = Arc::new(RecordingTransport::default());
        let result = LokiHandler::with_transport(&config(true), transport);

        assert!(matches!(result, Err(Error::NoRuntime(_))));
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let config = Config::new("loki:3100", LabelSet::new());

        assert!(matches!(
            LokiHandler::new(&config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_record_promotes_label_keys_structured() {
        let transport = Arc::new(RecordingTransport::default());
        let handler =
            LokiHandler::with_transport(&config(true), Arc::clone(&transport) as Arc<dyn Transport>)
                .unwrap();

        handler.record(fields(json!({"level": "error", "msg": "boom"})));
        assert_eq!(handler.pending(), 1);
        handler.shutdown().await;

        let payloads = transport.payloads.lock().unwrap();
        assert_eq!(payloads.len(), 1);
        let stream = &payloads[0]["streams"][0];
        assert_eq!(stream["stream"], json!({"app": "x", "level": "error"}));
        let line = stream["values"][0][1].as_str().unwrap();
        assert!(line.contains(r#""msg":"boom""#));
    }

    #[tokio::test]
    async fn test_record_text_mode() {
        let transport = Arc::new(RecordingTransport::default());
        let handler = LokiHandler::with_transport(
            &config(false),
            Arc::clone(&transport) as Arc<dyn Transport>,
        )
        .unwrap();

        handler.record(fields(json!({"level": "error", "msg": "boom"})));
        handler.shutdown().await;

        let payloads = transport.payloads.lock().unwrap();
        let line = payloads[0]["streams"][0]["values"][0][1].as_str().unwrap();
        assert!(line.contains("msg: boom"));
    }

    #[tokio::test]
    async fn test_emit_with_closure_formatter() {
        let transport = Arc::new(RecordingTransport::default());
        let handler =
            LokiHandler::with_transport(&config(true), Arc::clone(&transport) as Arc<dyn Transport>)
                .unwrap();
        let formatter = |event: &str| -> Result<Fields, FormatError> {
            Ok(fields(json!({"msg": event})))
        };

        handler.emit(&formatter, "hello");
        handler.shutdown().await;

        let payloads = transport.payloads.lock().unwrap();
        assert_eq!(payloads[0]["streams"][0]["values"][0][1], r#"{"msg":"hello"}"#);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_emit_format_failure_drops_record() {
        let transport = Arc::new(RecordingTransport::default());
        let handler =
            LokiHandler::with_transport(&config(true), Arc::clone(&transport) as Arc<dyn Transport>)
                .unwrap();
        let formatter =
            |_: &str| -> Result<Fields, FormatError> { Err(FormatError("unsupported".to_string())) };

        handler.emit(&formatter, "hello");

        assert_eq!(handler.pending(), 0);
        assert!(logs_contain("Dropping event"));
        handler.shutdown().await;
        assert!(transport.payloads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let transport = Arc::new(RecordingTransport::default());
        let handler =
            LokiHandler::with_transport(&config(true), Arc::clone(&transport) as Arc<dyn Transport>)
                .unwrap();

        handler.record(fields(json!({"msg": "once"})));
        handler.shutdown().await;
        handler.shutdown().await;

        assert!(handler.is_shut_down());
        assert_eq!(transport.payloads.lock().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_records_racing_shutdown_are_shipped_or_rejected() {
        for _ in 0..20 {
            let transport = Arc::new(RecordingTransport::default());
            let handler = Arc::new(
                LokiHandler::with_transport(
                    &config(true),
                    Arc::clone(&transport) as Arc<dyn Transport>,
                )
                .unwrap(),
            );

            let producer = std::thread::spawn({
                let handler = Arc::clone(&handler);
                move || {
                    let mut accepted = 0;
                    while handler.try_record(fields(json!({"msg": "x"}))).is_ok() {
                        accepted += 1;
                    }
                    accepted
                }
            });
            sleep(Duration::from_millis(5)).await;
            handler.shutdown().await;
            let accepted: usize = producer.join().unwrap();

            let shipped: usize = transport
                .payloads
                .lock()
                .unwrap()
                .iter()
                .flat_map(|p| p["streams"].as_array().cloned().unwrap_or_default())
                .map(|s| s["values"].as_array().map_or(0, Vec::len))
                .sum();
            assert_eq!(accepted, shipped);
        }
    }

    #[tokio::test]
    async fn test_record_after_shutdown_is_dropped() {
        let transport = Arc::new(RecordingTransport::default());
        let handler =
            LokiHandler::with_transport(&config(true), Arc::clone(&transport) as Arc<dyn Transport>)
                .unwrap();
        handler.shutdown().await;

        assert!(matches!(
            handler.try_record(fields(json!({"msg": "late"}))),
            Err(Error::ShutDown)
        ));
        handler.record(fields(json!({"msg": "late"})));
        assert_eq!(handler.pending(), 0);
    }
}
