// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use async_trait::async_trait;
use loki_logger::{Fields, TransportError, Transport};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::{sleep, timeout, Duration};

/// Keeps every decoded payload; the first `fail_first` sends fail.
#[derive(Default)]
pub struct MockTransport {
    payloads: Mutex<Vec<Value>>,
    attempts: AtomicUsize,
    fail_first: usize,
}

impl MockTransport {
    pub fn failing(fail_first: usize) -> Self {
        Self {
            fail_first,
            ..Default::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.payloads.lock().unwrap().clone()
    }

    /// All shipped lines across every payload and stream.
    pub fn lines(&self) -> Vec<String> {
        self.payloads()
            .iter()
            .flat_map(|payload| payload["streams"].as_array().cloned().unwrap_or_default())
            .flat_map(|stream| stream["values"].as_array().cloned().unwrap_or_default())
            .map(|value| value[1].as_str().unwrap().to_string())
            .collect()
    }

    pub async fn wait_for_attempts(&self, attempts: usize) {
        let wait = async {
            while self.attempts() < attempts {
                sleep(Duration::from_millis(10)).await;
            }
        };
        timeout(Duration::from_secs(5), wait)
            .await
            .expect("timed out waiting for send attempts");
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(TransportError::Other("connection reset".to_string()));
        }
        let value = serde_json::from_slice(&payload).expect("payload is JSON");
        self.payloads.lock().unwrap().push(value);
        Ok(())
    }
}

pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}
