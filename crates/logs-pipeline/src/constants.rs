// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Default limits and tuning values for the logs pipeline.
//!
//! Every value here is only a default: [`crate::config::Config`] carries the
//! effective settings and is passed explicitly at construction.

use std::time::Duration;

/// Default number of records that seals a batch and triggers a flush.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default period of the background flush timer.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of retries after the first delivery attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base wait before the first retry.
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_secs(1);

/// Default cap for the exponential part of the retry wait.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Default consecutive failures that open the circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time the circuit stays open before allowing a trial delivery.
pub const DEFAULT_OPEN_DURATION: Duration = Duration::from_secs(30);

/// Default HTTP request timeout of the intake client.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default intake base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.logward.dev";

/// Intake path appended to the base URL.
pub(crate) const INGEST_PATH: &str = "/api/v1/ingest";

/// Default zstd level used when compression is enabled.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Maximum number of records the intake accepts in a single batch.
///
/// Enforced when a batch is validated before delivery, and as an upper bound
/// on the configured batch size so sealed batches always fit.
pub const MAX_BATCH_ENTRIES_SIZE: usize = 1000;

/// Maximum length of the source (service) label of a record.
pub const MAX_SOURCE_LENGTH: usize = 100;

/// Deadline of the final drain performed when the pipeline stops.
pub const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// `User-Agent` sent by the HTTP deliverer.
pub(crate) const USER_AGENT: &str = concat!("logs-pipeline/", env!("CARGO_PKG_VERSION"));
