// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of serialized batches to Loki.
//!
//! The flush controller only knows the [`Transport`] trait. [`HttpTransport`]
//! is the default: one POST per batch, optionally gzip-compressed, with the
//! configured extra headers. No retries are attempted here; a failed batch is
//! reported back and dropped by the caller.

use async_trait::async_trait;
use flate2::{write::GzEncoder, Compression};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use std::io::Write;
use std::time::Instant;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result, TransportError};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Delivers one serialized batch.
    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    compressed: bool,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(TransportError::from)?;

        Ok(Self {
            client,
            url: config.url.trim().to_string(),
            headers: build_headers(config)?,
            compressed: config.compressed,
        })
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn encode(&self, payload: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        if !self.compressed {
            return Ok(payload);
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload)?;
        Ok(encoder.finish()?)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        let body = self.encode(payload)?;
        let time = Instant::now();

        let resp = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            debug!(
                "LOKI | Pushed batch in {} ms with status {}",
                time.elapsed().as_millis(),
                status
            );
            return Ok(());
        }

        Err(TransportError::UnexpectedStatus {
            status,
            body: resp.text().await.unwrap_or_default(),
        })
    }
}

fn build_headers(config: &Config) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if config.compressed {
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    }

    for (name, value) in &config.additional_headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::InvalidConfig(format!("Invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::InvalidConfig(format!("Invalid value for header '{name}': {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
