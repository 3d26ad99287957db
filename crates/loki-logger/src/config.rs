// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use regex::Regex;
use reqwest::header::{HeaderName, HeaderValue};
use std::env;
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};
use crate::labels::LabelSet;

pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const LABEL_NAME_PATTERN: &str = "^[a-zA-Z_][a-zA-Z0-9_]*$";

/// Configuration of a [`crate::handler::LokiHandler`] and its HTTP transport
#[derive(Debug, Clone)]
pub struct Config {
    /// Loki push endpoint, e.g. `http://loki:3100/loki/api/v1/push`
    pub url: String,
    /// Labels attached to every stream
    pub labels: LabelSet,
    /// Record fields promoted to labels when present
    pub label_keys: Vec<String>,
    /// Ship each record as a JSON object instead of a `key: value` text line
    pub message_in_json_format: bool,
    /// Longest time a record waits in the buffer while under the size threshold
    pub flush_timeout: Duration,
    /// Gzip request bodies
    pub compressed: bool,
    /// Extra headers on every push request (tenant id, auth, ...)
    pub additional_headers: Vec<(String, String)>,
    /// Buffered bytes that force a flush before the timeout, 0 disables
    pub max_stream_size: usize,
    /// Timeout of a single push request
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: String::new(),
            labels: LabelSet::new(),
            label_keys: Vec::new(),
            message_in_json_format: true,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            compressed: true,
            additional_headers: Vec::new(),
            max_stream_size: 0,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl Config {
    #[must_use]
    pub fn new(url: impl Into<String>, labels: LabelSet) -> Self {
        Self {
            url: url.into(),
            labels,
            ..Default::default()
        }
    }

    /// Create configuration from `LOKI_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`Config::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let url = lookup("LOKI_URL").unwrap_or_default();
        let labels: LabelSet = lookup("LOKI_LABELS")
            .map(|val| parse_pairs("LOKI_LABELS", &val).into_iter().collect())
            .unwrap_or_default();
        let label_keys = lookup("LOKI_LABEL_KEYS")
            .map(|val| parse_list(&val))
            .unwrap_or_default();
        let message_in_json_format = lookup("LOKI_MESSAGE_IN_JSON_FORMAT")
            .map(|val| val.to_lowercase() != "false")
            .unwrap_or(defaults.message_in_json_format);
        let flush_timeout = lookup("LOKI_FLUSH_TIMEOUT")
            .and_then(|val| parse_number::<u64>("LOKI_FLUSH_TIMEOUT", &val))
            .map_or(defaults.flush_timeout, Duration::from_secs);
        let compressed = lookup("LOKI_COMPRESSED")
            .map(|val| val.to_lowercase() != "false")
            .unwrap_or(defaults.compressed);
        let additional_headers = lookup("LOKI_ADDITIONAL_HEADERS")
            .map(|val| parse_pairs("LOKI_ADDITIONAL_HEADERS", &val))
            .unwrap_or_default();
        let max_stream_size = lookup("LOKI_MAX_STREAM_SIZE")
            .and_then(|val| parse_number::<usize>("LOKI_MAX_STREAM_SIZE", &val))
            .unwrap_or(defaults.max_stream_size);
        let request_timeout = lookup("LOKI_REQUEST_TIMEOUT")
            .and_then(|val| parse_number::<u64>("LOKI_REQUEST_TIMEOUT", &val))
            .map_or(defaults.request_timeout, Duration::from_secs);

        let config = Self {
            url,
            labels,
            label_keys,
            message_in_json_format,
            flush_timeout,
            compressed,
            additional_headers,
            max_stream_size,
            request_timeout,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(Error::InvalidConfig("Loki URL cannot be empty".to_string()));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(Error::InvalidConfig(format!(
                "Loki URL '{url}' must start with http:// or https://"
            )));
        }

        if self.flush_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "Flush timeout must be greater than 0".to_string(),
            ));
        }

        let label_name = Regex::new(LABEL_NAME_PATTERN)
            .map_err(|e| Error::InvalidConfig(format!("Invalid label name pattern: {e}")))?;
        let names = self
            .labels
            .iter()
            .map(|(name, _)| name)
            .chain(self.label_keys.iter().map(String::as_str));
        for name in names {
            if !label_name.is_match(name) {
                return Err(Error::InvalidConfig(format!(
                    "Invalid label name '{name}'. Must match {LABEL_NAME_PATTERN}"
                )));
            }
        }

        for (name, value) in &self.additional_headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::InvalidConfig(format!("Invalid header name '{name}': {e}")))?;
            HeaderValue::from_str(value).map_err(|e| {
                Error::InvalidConfig(format!("Invalid value for header '{name}': {e}"))
            })?;
        }

        Ok(())
    }
}

/// Parses `k=v,k2=v2`, skipping malformed items.
fn parse_pairs(variable: &str, raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter_map(|item| match item.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Some((key.trim().to_string(), value.trim().to_string()))
            }
            _ => {
                warn!("LOKI | Ignoring malformed entry '{item}' in {variable}");
                None
            }
        })
        .collect()
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_number<T: std::str::FromStr>(variable: &str, raw: &str) -> Option<T> {
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("LOKI | Ignoring invalid {variable} '{raw}', using default");
            None
        }
    }
}
