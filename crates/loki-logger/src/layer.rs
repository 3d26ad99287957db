// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `tracing` integration.
//!
//! ```no_run
//! # async fn run() -> loki_logger::error::Result<()> {
//! use std::sync::Arc;
//! use loki_logger::{config::Config, handler::LokiHandler, layer::LokiLayer};
//! use tracing_subscriber::layer::SubscriberExt;
//!
//! let handler = Arc::new(LokiHandler::new(&Config::from_env()?)?);
//! let subscriber = tracing_subscriber::registry().with(LokiLayer::new(Arc::clone(&handler)));
//! tracing::subscriber::set_global_default(subscriber).ok();
//!
//! tracing::info!(user = "jane", "logged in");
//! handler.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::formatter::{EventFormatter, Formatter};
use crate::handler::LokiHandler;

/// Targets whose events are never shipped. Shipping them would log the
/// shipping itself.
const IGNORED_TARGETS: &[&str] = &[
    "loki_logger",
    "h2",
    "hyper",
    "hyper_util",
    "reqwest",
    "rustls",
];

/// Forwards every `tracing` event to a [`LokiHandler`].
pub struct LokiLayer<F = EventFormatter> {
    handler: Arc<LokiHandler>,
    formatter: F,
}

impl LokiLayer {
    #[must_use]
    pub fn new(handler: Arc<LokiHandler>) -> Self {
        Self::with_formatter(handler, EventFormatter)
    }
}

impl<F> LokiLayer<F> {
    #[must_use]
    pub fn with_formatter(handler: Arc<LokiHandler>, formatter: F) -> Self {
        Self { handler, formatter }
    }
}

impl<S, F> Layer<S> for LokiLayer<F>
where
    S: Subscriber,
    F: for<'a> Formatter<Event<'a>> + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if is_ignored(event.metadata().target()) {
            return;
        }
        self.handler.emit(&self.formatter, event);
    }
}

fn is_ignored(target: &str) -> bool {
    IGNORED_TARGETS.iter().any(|ignored| {
        target
            .strip_prefix(ignored)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
    })
}
