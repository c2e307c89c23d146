// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The logs pipeline: accumulator, breaker and retrying executor wired around
//! the delivery, validation and enrichment collaborators.
//!
//! # Delivery path
//!
//! ```text
//!   batch ─> validate_batch ─> breaker.allow ─> retry::run(deliver) ─> classify
//! ```
//!
//! | outcome                                   | breaker          | result        |
//! |-------------------------------------------|------------------|---------------|
//! | 2xx                                       | success          | `Ok`          |
//! | 5xx (after retries)                       | failure          | `Err(Http)`   |
//! | other non-2xx (4xx, 429 after retries)    | success          | `Err(Http)`   |
//! | transport failure after retries           | failure          | `Err(RetriesExhausted)` |
//! | cancelled before the first attempt        | untouched        | `Err(Cancelled)` |
//! | cancelled after an attempt started        | failure          | `Err(Interrupted)` |

use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::aggregator::{Aggregator, AggregatorConfig, FlushHandler};
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::config::Config;
use crate::context::{Context, DefaultEnricher, Enricher};
use crate::errors::Error;
use crate::flusher::{Deliverer, HttpDeliverer};
use crate::record::{Level, Metadata, Record};
use crate::retry::{self, RetryConfig};
use crate::validation::{DefaultValidator, Validator};

/// Lifecycle of a [`LogsPipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Accepting records.
    Running,
    /// `close` in progress; new records are refused.
    Stopping,
    /// Fully drained.
    Stopped,
}

/// Delivery path invoked by the accumulator for every batch.
struct DeliveryPath {
    deliverer: Arc<dyn Deliverer>,
    validator: Arc<dyn Validator>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
}

#[async_trait]
impl FlushHandler for DeliveryPath {
    async fn flush(&self, ctx: &Context, records: &[Record]) -> Result<(), Error> {
        self.validator.validate_batch(records)?;
        // A finished context must not admit a half-open trial it cannot run.
        if ctx.is_done() {
            return Err(Error::Cancelled);
        }
        self.breaker.allow()?;

        let mut attempts: u32 = 0;
        let outcome = retry::run(ctx, &self.retry, || {
            attempts += 1;
            self.deliverer.deliver(ctx, records)
        })
        .await;

        match outcome {
            Ok(response) if response.is_success() => {
                self.breaker.record_success();
                debug!(
                    "LOGS | Delivered {} records (status {})",
                    records.len(),
                    response.status
                );
                Ok(())
            }
            Ok(response) => {
                if response.status >= 500 {
                    self.breaker.record_failure();
                } else {
                    // The intake answered; the request itself was at fault.
                    self.breaker.record_success();
                }
                Err(Error::Http {
                    status: response.status,
                    body: response.body,
                })
            }
            Err(Error::Cancelled) if attempts == 0 => Err(Error::Cancelled),
            Err(Error::Cancelled) => {
                // The intake may already hold the batch; it must not be resent.
                self.breaker.record_failure();
                warn!(
                    "LOGS | Delivery of {} records interrupted after {} attempts",
                    records.len(),
                    attempts
                );
                Err(Error::Interrupted { attempts })
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(e)
            }
        }
    }
}

/// Client-side log delivery pipeline.
///
/// Must be created inside a tokio runtime: construction spawns the
/// accumulator's background task.
pub struct LogsPipeline {
    source: String,
    lifecycle: RwLock<Lifecycle>,
    aggregator: Aggregator,
    breaker: Arc<CircuitBreaker>,
    validator: Arc<dyn Validator>,
    enricher: Arc<dyn Enricher>,
}

impl fmt::Debug for LogsPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogsPipeline")
            .field("source", &self.source)
            .field("lifecycle", &self.lifecycle())
            .field("buffered", &self.buffered())
            .field("breaker_state", &self.breaker_state())
            .finish_non_exhaustive()
    }
}

#[allow(clippy::expect_used)]
impl LogsPipeline {
    /// Builds a pipeline around the given collaborators.
    pub fn new(
        config: Config,
        deliverer: Arc<dyn Deliverer>,
        validator: Arc<dyn Validator>,
        enricher: Arc<dyn Enricher>,
    ) -> Result<Self, Error> {
        config.validate()?;

        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker));
        let delivery = Arc::new(DeliveryPath {
            deliverer,
            validator: Arc::clone(&validator),
            breaker: Arc::clone(&breaker),
            retry: config.retry,
        });
        let aggregator = Aggregator::new(
            AggregatorConfig {
                max_size: config.batch_size,
                flush_interval: config.flush_interval,
            },
            delivery,
        );

        debug!(
            "LOGS | Pipeline started for service {} (batch size {}, flush interval {:?})",
            config.service, config.batch_size, config.flush_interval
        );

        Ok(Self {
            source: config.service,
            lifecycle: RwLock::new(Lifecycle::Running),
            aggregator,
            breaker,
            validator,
            enricher,
        })
    }

    /// Builds a pipeline delivering over HTTP with the default validator and
    /// enricher.
    pub fn from_config(config: Config) -> Result<Self, Error> {
        config.validate()?;
        let deliverer = Arc::new(HttpDeliverer::new(&config));
        Self::new(
            config,
            deliverer,
            Arc::new(DefaultValidator),
            Arc::new(DefaultEnricher),
        )
    }

    /// Accepts one record for delivery.
    ///
    /// The record is stamped with the current time and the configured source,
    /// enriched from `ctx` and validated. Cancellation of `ctx` does not stop
    /// the record from being buffered.
    pub fn submit(
        &self,
        ctx: &Context,
        level: Level,
        message: impl Into<String>,
        metadata: Option<Metadata>,
    ) -> Result<(), Error> {
        if self.lifecycle() != Lifecycle::Running {
            return Err(Error::Closed);
        }

        let mut record = Record::new(self.source.as_str(), level, message).with_metadata(metadata);
        self.enricher.enrich(&mut record, ctx);
        self.validator.validate(&record)?;
        self.aggregator.submit(record)
    }

    pub fn debug(
        &self,
        ctx: &Context,
        message: impl Into<String>,
        metadata: Option<Metadata>,
    ) -> Result<(), Error> {
        self.submit(ctx, Level::Debug, message, metadata)
    }

    pub fn info(
        &self,
        ctx: &Context,
        message: impl Into<String>,
        metadata: Option<Metadata>,
    ) -> Result<(), Error> {
        self.submit(ctx, Level::Info, message, metadata)
    }

    pub fn warn(
        &self,
        ctx: &Context,
        message: impl Into<String>,
        metadata: Option<Metadata>,
    ) -> Result<(), Error> {
        self.submit(ctx, Level::Warn, message, metadata)
    }

    pub fn error(
        &self,
        ctx: &Context,
        message: impl Into<String>,
        metadata: Option<Metadata>,
    ) -> Result<(), Error> {
        self.submit(ctx, Level::Error, message, metadata)
    }

    pub fn critical(
        &self,
        ctx: &Context,
        message: impl Into<String>,
        metadata: Option<Metadata>,
    ) -> Result<(), Error> {
        self.submit(ctx, Level::Critical, message, metadata)
    }

    /// Delivers everything buffered now instead of waiting for a trigger.
    pub async fn flush(&self, ctx: &Context) -> Result<(), Error> {
        if self.lifecycle() != Lifecycle::Running {
            return Err(Error::Closed);
        }
        self.aggregator.flush(ctx).await
    }

    /// Stops accepting records and drains the buffer. Only the first call
    /// does any work; later calls return `Ok(())`.
    pub async fn close(&self, ctx: &Context) -> Result<(), Error> {
        {
            let mut lifecycle = self.lifecycle.write().expect("lock poisoned");
            if *lifecycle != Lifecycle::Running {
                return Ok(());
            }
            *lifecycle = Lifecycle::Stopping;
        }

        info!("LOGS | Closing pipeline, {} records buffered", self.buffered());
        let result = self.aggregator.stop(ctx).await;
        if let Err(e) = &result {
            warn!("LOGS | Pipeline closed with error: {}", e);
        }

        *self.lifecycle.write().expect("lock poisoned") = Lifecycle::Stopped;
        result
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.aggregator.size()
    }

    #[must_use]
    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    #[must_use]
    pub fn breaker_failures(&self) -> u32 {
        self.breaker.failures()
    }

    /// Forces the circuit closed, e.g. after the operator fixed the endpoint.
    pub fn reset_breaker(&self) {
        self.breaker.reset();
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.read().expect("lock poisoned")
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::errors::TransportError;
    use crate::flusher::DeliveryResponse;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tracing_test::traced_test;

    /// Answers from a script of outcomes, then with `fallback`.
    struct ScriptedDeliverer {
        script: Mutex<VecDeque<Result<u16, &'static str>>>,
        fallback: u16,
        calls: AtomicUsize,
        delivered: Mutex<Vec<Record>>,
    }

    impl ScriptedDeliverer {
        fn new(script: Vec<Result<u16, &'static str>>, fallback: u16) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: AtomicUsize::new(0),
                delivered: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Deliverer for ScriptedDeliverer {
        async fn deliver(
            &self,
            _ctx: &Context,
            records: &[Record],
        ) -> Result<DeliveryResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(self.fallback));
            match next {
                Ok(status) => {
                    if (200..300).contains(&status) {
                        self.delivered.lock().unwrap().extend_from_slice(records);
                    }
                    Ok(DeliveryResponse {
                        status,
                        body: format!("status {status}"),
                    })
                }
                Err("cancelled") => Err(TransportError::cancelled()),
                Err(message) => Err(TransportError::new(message)),
            }
        }
    }

    fn config() -> Config {
        Config::default()
            .with_api_key("test-api-key")
            .with_service("checkout")
            .with_batch_size(100)
            .with_flush_interval(Duration::from_secs(60))
            .with_retry(RetryConfig {
                max_retries: 0,
                min_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
            })
            .with_circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 3,
                open_duration: Duration::from_secs(30),
            })
    }

    fn pipeline(config: Config, deliverer: Arc<ScriptedDeliverer>) -> LogsPipeline {
        LogsPipeline::new(
            config,
            deliverer,
            Arc::new(DefaultValidator),
            Arc::new(DefaultEnricher),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_records_breaker_success() {
        let deliverer = ScriptedDeliverer::new(vec![], 202);
        let pipeline = pipeline(config(), deliverer.clone());
        let ctx = Context::background();

        pipeline.info(&ctx, "order placed", None).unwrap();
        pipeline.flush(&ctx).await.unwrap();

        assert_eq!(deliverer.calls(), 1);
        let delivered = deliverer.delivered.lock().unwrap().clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].source, "checkout");
        assert_eq!(delivered[0].level, Level::Info);
        assert_eq!(pipeline.breaker_state(), CircuitState::Closed);
        assert_eq!(pipeline.buffered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_counts_as_failure() {
        let deliverer = ScriptedDeliverer::new(vec![], 503);
        let pipeline = pipeline(config(), deliverer.clone());
        let ctx = Context::background();

        pipeline.error(&ctx, "boom", None).unwrap();
        let err = pipeline.flush(&ctx).await.unwrap_err();

        assert!(matches!(err, Error::Http { status: 503, ref body } if body == "status 503"));
        assert_eq!(pipeline.breaker_failures(), 1);
        // The failed batch is not kept.
        assert_eq!(pipeline.buffered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_breaker_success() {
        let deliverer = ScriptedDeliverer::new(vec![], 400);
        let pipeline = pipeline(config(), deliverer.clone());
        let ctx = Context::background();

        for _ in 0..5 {
            pipeline.warn(&ctx, "bad payload", None).unwrap();
            let err = pipeline.flush(&ctx).await.unwrap_err();
            assert!(matches!(err, Error::Http { status: 400, .. }));
        }
        assert_eq!(pipeline.breaker_state(), CircuitState::Closed);
        assert_eq!(pipeline.breaker_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_exhaustion_counts_as_failure() {
        let deliverer = ScriptedDeliverer::new(vec![Err("refused"), Err("refused")], 200);
        let config = config().with_retry(RetryConfig {
            max_retries: 1,
            min_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        });
        let pipeline = pipeline(config, deliverer.clone());
        let ctx = Context::background();

        pipeline.info(&ctx, "hello", None).unwrap();
        let err = pipeline.flush(&ctx).await.unwrap_err();

        assert!(matches!(err, Error::RetriesExhausted { attempts: 2, .. }));
        assert_eq!(deliverer.calls(), 2);
        assert_eq!(pipeline.breaker_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_flush_leaves_breaker_and_buffer() {
        let deliverer = ScriptedDeliverer::new(vec![], 200);
        let pipeline = pipeline(config(), deliverer.clone());

        pipeline.info(&Context::background(), "hello", None).unwrap();
        let ctx = Context::background();
        ctx.cancel();
        let err = pipeline.flush(&ctx).await.unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(deliverer.calls(), 0);
        assert_eq!(pipeline.breaker_failures(), 0);
        assert_eq!(pipeline.buffered(), 1);

        pipeline.flush(&Context::background()).await.unwrap();
        assert_eq!(deliverer.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_request_drops_batch() {
        let deliverer = ScriptedDeliverer::new(vec![Err("cancelled")], 200);
        let pipeline = pipeline(config(), deliverer.clone());
        let ctx = Context::background();

        pipeline.info(&ctx, "maybe sent", None).unwrap();
        let err = pipeline.flush(&ctx).await.unwrap_err();

        assert!(matches!(err, Error::Interrupted { attempts: 1 }));
        assert_eq!(pipeline.buffered(), 0);
        assert_eq!(pipeline.breaker_failures(), 1);

        // Nothing is resent on the next flush.
        pipeline.flush(&ctx).await.unwrap();
        assert_eq!(deliverer.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_context_does_not_admit_trial() {
        let deliverer = ScriptedDeliverer::new(vec![], 500);
        let pipeline = pipeline(config(), deliverer.clone());
        let ctx = Context::background();

        for _ in 0..3 {
            pipeline.info(&ctx, "hello", None).unwrap();
            assert!(pipeline.flush(&ctx).await.is_err());
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        pipeline.info(&ctx, "trial", None).unwrap();
        let done = Context::background();
        done.cancel();
        let err = pipeline.flush(&done).await.unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(pipeline.breaker_state(), CircuitState::Open);
        assert_eq!(deliverer.calls(), 3);
        assert_eq!(pipeline.buffered(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_skips_delivery() {
        let deliverer = ScriptedDeliverer::new(vec![], 500);
        let pipeline = pipeline(config(), deliverer.clone());
        let ctx = Context::background();

        for _ in 0..3 {
            pipeline.info(&ctx, "hello", None).unwrap();
            assert!(pipeline.flush(&ctx).await.is_err());
        }
        assert_eq!(pipeline.breaker_state(), CircuitState::Open);
        assert_eq!(deliverer.calls(), 3);

        pipeline.info(&ctx, "hello", None).unwrap();
        let err = pipeline.flush(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::CircuitOpen));
        assert_eq!(deliverer.calls(), 3);

        pipeline.reset_breaker();
        assert_eq!(pipeline.breaker_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_record_rejected_not_buffered() {
        let deliverer = ScriptedDeliverer::new(vec![], 200);
        let pipeline = pipeline(config(), deliverer.clone());

        let err = pipeline
            .info(&Context::background(), "", None)
            .unwrap_err();

        assert!(matches!(err, Error::ValidationRejected(ref e) if e.field == "message"));
        assert_eq!(pipeline.buffered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_enriches_from_context() {
        let deliverer = ScriptedDeliverer::new(vec![], 200);
        let pipeline = pipeline(config(), deliverer.clone());
        let ctx = Context::background()
            .with_traceparent("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01");

        let mut metadata = Metadata::new();
        metadata.insert("user_id".to_string(), serde_json::json!(7));
        pipeline.critical(&ctx, "disk full", Some(metadata)).unwrap();
        pipeline.flush(&ctx).await.unwrap();

        let delivered = deliverer.delivered.lock().unwrap().clone();
        assert_eq!(
            delivered[0].trace_id.as_deref(),
            Some("4bf92f3577b34da6a3ce929d0e0e4736")
        );
        assert_eq!(delivered[0].span_id.as_deref(), Some("00f067aa0ba902b7"));
        assert_eq!(delivered[0].metadata.as_ref().unwrap()["user_id"], 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_context_still_buffers() {
        let deliverer = ScriptedDeliverer::new(vec![], 200);
        let pipeline = pipeline(config(), deliverer.clone());
        let ctx = Context::background();
        ctx.cancel();

        pipeline.debug(&ctx, "still accepted", None).unwrap();
        assert_eq!(pipeline.buffered(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_lifecycle() {
        let deliverer = ScriptedDeliverer::new(vec![], 200);
        let pipeline = pipeline(config(), deliverer.clone());
        let ctx = Context::background();
        assert_eq!(pipeline.lifecycle(), Lifecycle::Running);

        pipeline.info(&ctx, "last words", None).unwrap();
        pipeline.close(&ctx).await.unwrap();

        assert_eq!(pipeline.lifecycle(), Lifecycle::Stopped);
        assert_eq!(deliverer.calls(), 1);
        assert!(matches!(pipeline.info(&ctx, "late", None), Err(Error::Closed)));
        assert!(matches!(pipeline.flush(&ctx).await, Err(Error::Closed)));

        pipeline.close(&ctx).await.unwrap();
        assert_eq!(deliverer.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let deliverer = ScriptedDeliverer::new(vec![], 200);
        let result = LogsPipeline::new(
            config().with_api_key(""),
            deliverer,
            Arc::new(DefaultValidator),
            Arc::new(DefaultEnricher),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_close_logs_buffered_count() {
        let deliverer = ScriptedDeliverer::new(vec![], 200);
        let pipeline = pipeline(config(), deliverer);
        let ctx = Context::background();
        pipeline.info(&ctx, "a", None).unwrap();
        pipeline.info(&ctx, "b", None).unwrap();

        pipeline.close(&ctx).await.unwrap();

        assert!(logs_contain("Closing pipeline, 2 records buffered"));
    }
}
