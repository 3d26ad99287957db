// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while configuring the handler or building a batch
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to format record: {0}")]
    Format(#[from] FormatError),

    #[error("Failed to send batch: {0}")]
    Transport(#[from] TransportError),

    #[error("No tokio runtime to run the flush task: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("Handler is shut down")]
    ShutDown,
}

/// Raised by a [`crate::formatter::Formatter`] when an event can't be mapped to fields
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct FormatError(pub String);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to compress payload: {0}")]
    Compression(#[from] std::io::Error),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },

    #[error("{0}")]
    Other(String),
}
