// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Dual-trigger batch accumulator.
//!
//! Producers append records synchronously; a single background task turns
//! them into batches and hands each batch to a [`FlushHandler`].
//!
//! ```text
//!   submit() ──append──> live buffer ──(len == max_size)──> sealed queue
//!                              │                                 │
//!                              │ tick / flush() / stop()         │ notify
//!                              v                                 v
//!                        ┌──────────────────────────────────────────┐
//!                        │ background task (one delivery at a time) │
//!                        └────────────────────┬─────────────────────┘
//!                                             v
//!                                    FlushHandler::flush
//! ```
//!
//! A full buffer is sealed under the same lock that appended the record that
//! filled it, so every threshold crossing yields exactly one batch even when
//! several wake-ups coalesce into one. The buffer lock is never held across
//! a delivery.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::constants::{DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL, SHUTDOWN_FLUSH_TIMEOUT};
use crate::context::Context;
use crate::errors::Error;
use crate::record::Record;

/// Receives every batch the accumulator produces.
#[async_trait]
pub trait FlushHandler: Send + Sync {
    /// Delivers one batch.
    ///
    /// Return [`Error::Cancelled`] only when the batch never reached the
    /// destination: the accumulator keeps it and delivers it again later. Any
    /// other error, [`Error::Interrupted`] included, drops the batch.
    async fn flush(&self, ctx: &Context, records: &[Record]) -> Result<(), Error>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AggregatorConfig {
    pub max_size: usize,
    pub flush_interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

#[derive(Debug, Default)]
struct Buffers {
    live: Vec<Record>,
    sealed: VecDeque<Vec<Record>>,
    closed: bool,
}

struct Shared {
    config: AggregatorConfig,
    buffers: Mutex<Buffers>,
    handler: Arc<dyn FlushHandler>,
    /// Serializes deliveries so batches leave in trigger order.
    delivery: tokio::sync::Mutex<()>,
    notify: Notify,
}

pub struct Aggregator {
    shared: Arc<Shared>,
    /// Ends the background loop between deliveries.
    shutdown: CancellationToken,
    /// Interrupts a background delivery still running when `stop` runs out of time.
    abort: CancellationToken,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Aggregator {
    /// Creates the accumulator and spawns its background task on the current
    /// tokio runtime.
    ///
    /// A `max_size` of zero is treated as one and a zero `flush_interval` as
    /// [`DEFAULT_FLUSH_INTERVAL`].
    #[must_use]
    pub fn new(config: AggregatorConfig, handler: Arc<dyn FlushHandler>) -> Self {
        let flush_interval = if config.flush_interval.is_zero() {
            warn!(
                "LOGS | Flush interval must be positive, using {:?}",
                DEFAULT_FLUSH_INTERVAL
            );
            DEFAULT_FLUSH_INTERVAL
        } else {
            config.flush_interval
        };
        let config = AggregatorConfig {
            max_size: config.max_size.max(1),
            flush_interval,
        };
        let shared = Arc::new(Shared {
            config,
            buffers: Mutex::new(Buffers {
                live: Vec::with_capacity(config.max_size),
                ..Buffers::default()
            }),
            handler,
            delivery: tokio::sync::Mutex::new(()),
            notify: Notify::new(),
        });
        let shutdown = CancellationToken::new();
        let abort = CancellationToken::new();
        let task = tokio::spawn(run(Arc::clone(&shared), shutdown.clone(), abort.clone()));

        Self {
            shared,
            shutdown,
            abort,
            task: tokio::sync::Mutex::new(Some(task)),
        }
    }

    /// Appends a record. Never waits on delivery.
    pub fn submit(&self, record: Record) -> Result<(), Error> {
        let mut buffers = self.shared.lock();
        if buffers.closed {
            return Err(Error::Closed);
        }
        buffers.live.push(record);
        if buffers.live.len() >= self.shared.config.max_size {
            let batch = std::mem::replace(
                &mut buffers.live,
                Vec::with_capacity(self.shared.config.max_size),
            );
            buffers.sealed.push_back(batch);
            drop(buffers);
            self.shared.notify.notify_one();
        }
        Ok(())
    }

    /// Delivers everything buffered so far, sealed batches first.
    ///
    /// Returns the first delivery error; later batches are still attempted.
    pub async fn flush(&self, ctx: &Context) -> Result<(), Error> {
        self.shared.flush(ctx, true).await
    }

    /// Records waiting for delivery. Advisory under concurrency.
    #[must_use]
    pub fn size(&self) -> usize {
        let buffers = self.shared.lock();
        buffers.live.len() + buffers.sealed.iter().map(Vec::len).sum::<usize>()
    }

    #[must_use]
    pub fn config(&self) -> AggregatorConfig {
        self.shared.config
    }

    /// Stops accepting records, lets an in-flight background delivery finish
    /// and drains what is left. Both steps share one deadline of
    /// [`SHUTDOWN_FLUSH_TIMEOUT`], further bounded by `ctx`. Later calls
    /// return `Ok(())`.
    pub async fn stop(&self, ctx: &Context) -> Result<(), Error> {
        let Some(mut task) = self.task.lock().await.take() else {
            return Ok(());
        };

        self.shared.lock().closed = true;
        self.shutdown.cancel();

        let ctx = ctx.clone().with_timeout(SHUTDOWN_FLUSH_TIMEOUT);
        let finished = tokio::select! {
            biased;
            joined = &mut task => Some(joined),
            () = ctx.done() => None,
        };
        let joined = match finished {
            Some(joined) => joined,
            None => {
                warn!("LOGS | Background delivery still running at shutdown deadline, interrupting it");
                self.abort.cancel();
                task.await
            }
        };
        if let Err(e) = joined {
            error!("LOGS | Aggregator task failed: {}", e);
        }

        let result = self.shared.flush(&ctx, true).await;
        if let Err(e) = &result {
            warn!(
                "LOGS | Final flush failed, {} records undelivered: {}",
                self.size(),
                e
            );
        }
        result
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.abort.cancel();
    }
}

impl Shared {
    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, Buffers> {
        self.buffers.lock().expect("lock poisoned")
    }

    /// Takes the sealed batches and, when `include_live` is set, the live
    /// buffer, then delivers them one by one.
    async fn flush(&self, ctx: &Context, include_live: bool) -> Result<(), Error> {
        let _delivery = self.delivery.lock().await;

        let batches: Vec<Vec<Record>> = {
            let mut buffers = self.lock();
            let mut batches: Vec<_> = buffers.sealed.drain(..).collect();
            if include_live && !buffers.live.is_empty() {
                batches.push(std::mem::take(&mut buffers.live));
            }
            batches
        };
        if batches.is_empty() {
            return Ok(());
        }

        let mut first_error = None;
        let mut pending = batches.into_iter();
        while let Some(batch) = pending.next() {
            match self.handler.flush(ctx, &batch).await {
                Ok(()) => debug!("LOGS | Flushed batch of {} records", batch.len()),
                Err(Error::Cancelled) => {
                    let requeue: Vec<_> = std::iter::once(batch).chain(pending).collect();
                    debug!("LOGS | Flush cancelled, keeping {} batches", requeue.len());
                    let mut buffers = self.lock();
                    for batch in requeue.into_iter().rev() {
                        buffers.sealed.push_front(batch);
                    }
                    return Err(first_error.unwrap_or(Error::Cancelled));
                }
                Err(e) => {
                    warn!("LOGS | Dropping batch of {} records: {}", batch.len(), e);
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Background loop: a tick flushes everything, a size signal flushes the
/// sealed batches. `shutdown` is only observed between deliveries; a running
/// delivery ends early only through `abort`.
async fn run(shared: Arc<Shared>, shutdown: CancellationToken, abort: CancellationToken) {
    let ctx = Context::background().with_cancellation(abort);
    let mut interval = tokio::time::interval(shared.config.flush_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        let result = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            () = shared.notify.notified() => shared.flush(&ctx, false).await,
            _ = interval.tick() => shared.flush(&ctx, true).await,
        };
        match result {
            Ok(()) | Err(Error::Cancelled) => {}
            Err(e) => error!("LOGS | Background flush failed: {}", e),
        }
    }
    debug!("LOGS | Aggregator task stopped");
}
