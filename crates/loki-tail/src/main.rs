// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use serde_json::Value;
use std::{env, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

use loki_logger::{Config, Fields, LokiHandler, LokiLayer};

enum Exit {
    Eof,
    Interrupted,
}

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOKI_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let handler = Config::from_env()
        .and_then(|config| LokiHandler::new(&config))
        .map(Arc::new);

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"))
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_thread_names(false)
                .with_thread_ids(false)
                .with_line_number(false)
                .with_file(false)
                .with_target(true)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(handler.as_ref().ok().map(|h| LokiLayer::new(Arc::clone(h))));

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let handler = match handler {
        Ok(handler) => handler,
        Err(e) => {
            error!("Error creating Loki handler: {e}");
            return;
        }
    };

    info!("Shipping stdin to Loki");
    let exit = tail_stdin(&handler).await;

    handler.shutdown().await;
    info!("Shut down");

    if let Exit::Interrupted = exit {
        // the pending stdin read sits on a blocking thread the runtime would wait for
        std::process::exit(0);
    }
}

async fn tail_stdin(handler: &LokiHandler) -> Exit {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => handler.record(message(line)),
                Ok(None) => {
                    debug!("Reached end of stdin");
                    return Exit::Eof;
                }
                Err(e) => {
                    error!("Failed to read stdin: {e}");
                    return Exit::Eof;
                }
            },
            _ = &mut ctrl_c => {
                debug!("Interrupted, shutting down");
                return Exit::Interrupted;
            }
        }
    }
}

fn message(line: String) -> Fields {
    let mut fields = Fields::new();
    fields.insert("message".to_string(), Value::String(line));
    fields
}
