// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::process::ExitCode;
use std::str::FromStr;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use logs_pipeline::logger::Formatter;
use logs_pipeline::record::Metadata;
use logs_pipeline::{Config, Context, Error, Level, LogsPipeline};

/// Structured input line: `{"level": "...", "message": "...", "metadata": {...}}`.
#[derive(Debug, Deserialize)]
struct InputLine {
    #[serde(default)]
    level: Option<String>,
    message: String,
    #[serde(default)]
    metadata: Option<Metadata>,
}

/// Splits a stdin line into the parts of a record. Lines that are not a JSON
/// object with a `message` are forwarded verbatim at `default_level`.
fn parse_line(line: &str, default_level: Level) -> (Level, String, Option<Metadata>) {
    match serde_json::from_str::<InputLine>(line) {
        Ok(input) => {
            let level = input
                .level
                .as_deref()
                .and_then(|raw| Level::from_str(raw).ok())
                .unwrap_or(default_level);
            (level, input.message, input.metadata)
        }
        Err(_) => (default_level, line.to_string(), None),
    }
}

fn forward(pipeline: &LogsPipeline, ctx: &Context, line: &str, default_level: Level) {
    if line.trim().is_empty() {
        return;
    }
    let (level, message, metadata) = parse_line(line, default_level);
    match pipeline.submit(ctx, level, message, metadata) {
        Ok(()) => {}
        Err(Error::ValidationRejected(e)) => warn!("Skipping line: {e}"),
        Err(e) => error!("Failed to submit line: {e}"),
    }
}

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("DD_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,reqwest=off,rustls=off,{log_level}");

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_writer(std::io::stderr)
        .event_format(Formatter)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let default_level = match env::var("DD_LOGS_DEFAULT_LEVEL") {
        Ok(raw) => Level::from_str(&raw).unwrap_or_else(|e| {
            warn!("{e}, using info");
            Level::Info
        }),
        Err(_) => Level::Info,
    };

    let pipeline = match LogsPipeline::from_config(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Error starting logs pipeline: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Forwarding stdin as service {} at default level {default_level}",
        pipeline.source()
    );

    let ctx = Context::background();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            _ = &mut interrupt => {
                info!("Interrupted, shutting down");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => forward(&pipeline, &ctx, &line, default_level),
                Ok(None) => {
                    debug!("Reached end of input");
                    break;
                }
                Err(e) => {
                    error!("Failed to read stdin: {e}");
                    break;
                }
            },
        }
    }

    match pipeline.close(&ctx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Logs left undelivered at shutdown: {e}");
            ExitCode::FAILURE
        }
    }
}
