// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Caller context: cancellation, deadline and trace correlation.
//!
//! A [`Context`] travels with `submit`, `flush` and `close`. Its cancellation
//! token and deadline bound the network-facing work (retry waits and delivery
//! calls); its span context is copied onto records that carry no correlation
//! ids of their own.
//!
//! Span contexts can be extracted from a W3C `traceparent` header:
//!
//! ```text
//! traceparent: 00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01
//! ```

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::errors::ValidationError;
use crate::record::Record;

lazy_static! {
    /// `version-traceId-spanId-flags[-vendor data]`
    static ref TRACEPARENT_REGEX: Regex =
        Regex::new(r"(?i)^([a-f0-9]{2})-([a-f0-9]{32})-([a-f0-9]{16})-([a-f0-9]{2})(-.*)?$")
            .expect("failed creating regex");

    static ref INVALID_SEGMENT_REGEX: Regex = Regex::new(r"^0+$").expect("failed creating regex");
}

/// Trace and span ids of the operation that emitted a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpanContext {
    pub trace_id: String,
    pub span_id: String,
}

impl SpanContext {
    /// Parses a W3C `traceparent` header value.
    pub fn from_traceparent(traceparent: &str) -> Result<Self, ValidationError> {
        let invalid = |message: &str| ValidationError::new("traceparent", message);

        let captures = TRACEPARENT_REGEX
            .captures(traceparent.trim())
            .ok_or_else(|| invalid("invalid traceparent"))?;

        let version = captures[1].to_lowercase();
        let tail = captures.get(5).map_or("", |m| m.as_str());
        match version.as_str() {
            "ff" => return Err(invalid("`ff` is an invalid traceparent version")),
            "00" if !tail.is_empty() => {
                return Err(invalid(
                    "traceparent with version `00` should contain only 4 values delimited by `-`",
                ))
            }
            "00" => {}
            _ => warn!("Unsupported traceparent version {version}, still attempting to parse"),
        }

        let trace_id = captures[2].to_lowercase();
        if INVALID_SEGMENT_REGEX.is_match(&trace_id) {
            return Err(invalid("`0` value for trace_id is invalid"));
        }
        let span_id = captures[3].to_lowercase();
        if INVALID_SEGMENT_REGEX.is_match(&span_id) {
            return Err(invalid("`0` value for span_id is invalid"));
        }

        Ok(Self { trace_id, span_id })
    }
}

/// Cancellation, deadline and correlation carried by a pipeline call.
#[derive(Clone, Debug, Default)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    span: Option<SpanContext>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn with_span_context(mut self, span: SpanContext) -> Self {
        self.span = Some(span);
        self
    }

    /// Attaches the span context of a `traceparent` header. An unparsable
    /// header leaves the context uncorrelated.
    #[must_use]
    pub fn with_traceparent(self, traceparent: &str) -> Self {
        match SpanContext::from_traceparent(traceparent) {
            Ok(span) => self.with_span_context(span),
            Err(e) => {
                warn!("Ignoring traceparent: {e}");
                self
            }
        }
    }

    #[must_use]
    pub fn span_context(&self) -> Option<&SpanContext> {
        self.span.as_ref()
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels this context and every clone of it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.cancel.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }
}

/// Injects correlation identifiers from a context into a record.
pub trait Enricher: Send + Sync {
    /// Must not overwrite identifiers already present on the record.
    fn enrich(&self, record: &mut Record, ctx: &Context);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEnricher;

impl Enricher for DefaultEnricher {
    fn enrich(&self, record: &mut Record, ctx: &Context) {
        let Some(span) = ctx.span_context() else {
            return;
        };
        if record.trace_id.as_deref().map_or(true, str::is_empty) {
            record.trace_id = Some(span.trace_id.clone());
        }
        if record.span_id.as_deref().map_or(true, str::is_empty) {
            record.span_id = Some(span.span_id.clone());
        }
    }
}
