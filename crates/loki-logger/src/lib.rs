// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Loki Logger
//!
//! Buffered, batching log shipper for Grafana Loki.
//!
//! Records are accepted from any thread without waiting on the network. A
//! background task drains the buffer when the flush timeout elapses or when the
//! buffered bytes reach a threshold, groups entries into streams by their
//! labels and pushes one JSON batch per pass.
//!
//! - [`handler`]: producer-facing [`LokiHandler`] and shutdown
//! - [`buffer`]: shared queue and size accounting
//! - [`flusher`]: background flush loop
//! - [`stream`]: grouping and the push payload
//! - [`transport`]: HTTP delivery
//! - [`layer`]: `tracing_subscriber` integration

#![deny(clippy::all)]
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]
#![deny(unused_extern_crates)]

pub mod buffer;
pub mod config;
pub mod entry;
pub mod error;
pub mod flusher;
pub mod formatter;
pub mod handler;
pub mod labels;
pub mod layer;
pub mod stream;
pub mod transport;

pub use config::Config;
pub use error::{Error, FormatError, Result, TransportError};
pub use formatter::{EventFormatter, Fields, Formatter};
pub use handler::LokiHandler;
pub use labels::LabelSet;
pub use layer::LokiLayer;
pub use transport::{HttpTransport, Transport};
