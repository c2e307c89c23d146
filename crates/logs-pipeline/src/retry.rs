// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Retrying delivery executor.
//!
//! Runs a delivery function until it produces a non-transient outcome or the
//! attempt budget is spent, sleeping an exponential backoff between attempts.
//! The caller's [`Context`] is checked before every attempt and raced against
//! every backoff wait.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::backoff;
use crate::constants::{DEFAULT_MAX_BACKOFF, DEFAULT_MAX_RETRIES, DEFAULT_MIN_BACKOFF};
use crate::context::Context;
use crate::errors::{Error, TransportError};
use crate::flusher::DeliveryResponse;

/// Statuses worth another attempt: rate limiting and transient server errors.
const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt; `0` means a single attempt.
    pub max_retries: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            min_backoff: DEFAULT_MIN_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

/// Invokes `deliver` up to `max_retries + 1` times.
///
/// Returns the first response whose status is not retryable, 2xx or not. When
/// the budget runs out on a retryable status that last response is returned
/// as-is; when it runs out on a transport failure the failure is wrapped in
/// [`Error::RetriesExhausted`]. A finished context yields [`Error::Cancelled`]
/// and no further invocations.
pub async fn run<F, Fut>(
    ctx: &Context,
    config: &RetryConfig,
    mut deliver: F,
) -> Result<DeliveryResponse, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<DeliveryResponse, TransportError>>,
{
    let max_attempts = config.max_retries.saturating_add(1);
    let mut attempts: u32 = 0;

    loop {
        if ctx.is_done() {
            debug!("LOGS | Context finished before attempt {}", attempts + 1);
            return Err(Error::Cancelled);
        }

        attempts += 1;
        let last = attempts >= max_attempts;

        match deliver().await {
            Ok(response) if !is_retryable_status(response.status) => return Ok(response),
            Ok(response) if last => {
                warn!(
                    "LOGS | Giving up after {attempts} attempts, last status {}",
                    response.status
                );
                return Ok(response);
            }
            Ok(response) => {
                debug!(
                    "LOGS | Attempt {attempts} got retryable status {}",
                    response.status
                );
                drop(response);
            }
            Err(e) if e.is_cancelled() => return Err(Error::Cancelled),
            Err(e) if last => {
                warn!("LOGS | Giving up after {attempts} attempts: {e}");
                return Err(Error::RetriesExhausted {
                    attempts,
                    source: e,
                });
            }
            Err(e) => debug!("LOGS | Attempt {attempts} failed: {e}"),
        }

        let wait = backoff::compute(attempts - 1, config.min_backoff, config.max_backoff);
        debug!("LOGS | Retrying in {} ms", wait.as_millis());
        tokio::select! {
            () = ctx.done() => {
                debug!("LOGS | Context finished during backoff");
                return Err(Error::Cancelled);
            }
            () = tokio::time::sleep(wait) => {}
        }
    }
}
