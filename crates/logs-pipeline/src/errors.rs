// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types returned by the pipeline.
//!
//! Validation and closed-state errors are returned synchronously from
//! `submit`. Delivery errors (circuit open, retries exhausted, cancelled, HTTP
//! status) only surface through `flush` and `close`; the background flush path
//! logs them instead.

use std::error::Error as StdError;

use crate::retry::is_retryable_status;

/// A record or batch that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("validation error on field '{field}': {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// A delivery attempt that produced no response.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
    cancelled: bool,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cancelled: false,
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            cancelled: false,
            source: Some(source.into()),
        }
    }

    /// The attempt was abandoned because the caller's context finished.
    pub fn cancelled() -> Self {
        Self {
            message: "request cancelled".to_string(),
            cancelled: true,
            source: None,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid log: {0}")]
    ValidationRejected(#[from] ValidationError),

    #[error("client is closed")]
    Closed,

    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("max retries exceeded after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("operation cancelled")]
    Cancelled,

    /// The context finished after the batch was handed to the intake at least
    /// once; whether it arrived is unknown.
    #[error("delivery interrupted after {attempts} attempts")]
    Interrupted { attempts: u32 },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether the same delivery could succeed if tried again later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http { status, .. } => is_retryable_status(*status),
            Error::CircuitOpen | Error::RetriesExhausted { .. } => true,
            Error::ValidationRejected(_)
            | Error::Closed
            | Error::Cancelled
            | Error::Interrupted { .. }
            | Error::Config(_) => false,
        }
    }
}
