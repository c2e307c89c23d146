// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log records and the intake payload shapes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ValidationError;

/// Free-form key/value metadata attached to a record.
pub type Metadata = Map<String, Value>;

/// Severity of a log record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Critical,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Debug,
        Level::Info,
        Level::Warn,
        Level::Error,
        Level::Critical,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Critical => "critical",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            "critical" => Ok(Level::Critical),
            other => Err(ValidationError::new(
                "level",
                format!(
                    "invalid log level: {other} (must be one of: debug, info, warn, error, critical)"
                ),
            )),
        }
    }
}

/// A single log entry.
///
/// Records are built by the pipeline at submission time and are owned by the
/// pipeline from then on; nothing mutates a record once it is buffered.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Record {
    pub time: DateTime<Utc>,
    /// Source label of the emitting service. Sent as `service` to the intake.
    #[serde(rename = "service")]
    pub source: String,
    pub level: Level,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(skip_serializing_if = "is_absent")]
    pub trace_id: Option<String>,
    /// 16 hex characters when present.
    #[serde(skip_serializing_if = "is_absent")]
    pub span_id: Option<String>,
}

fn is_absent(id: &Option<String>) -> bool {
    id.as_deref().map_or(true, str::is_empty)
}

impl Record {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(source: impl Into<String>, level: Level, message: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            source: source.into(),
            level,
            message: message.into(),
            metadata: None,
            trace_id: None,
            span_id: None,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Option<Metadata>) -> Self {
        self.metadata = metadata.filter(|m| !m.is_empty());
        self
    }

    /// An empty id leaves the record uncorrelated.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into()).filter(|id| !id.is_empty());
        self
    }

    /// An empty id leaves the record uncorrelated.
    #[must_use]
    pub fn with_span_id(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into()).filter(|id| !id.is_empty());
        self
    }
}

/// Body of a batch ingestion request.
#[derive(Debug, Serialize)]
pub struct IngestRequest<'a> {
    pub logs: &'a [Record],
}

/// Body returned by the intake on success.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct IngestResponse {
    #[serde(default)]
    pub received: usize,
    #[serde(default)]
    pub timestamp: String,
}
