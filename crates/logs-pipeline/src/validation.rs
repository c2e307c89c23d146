// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Record and batch validation against the intake's constraints.

use lazy_static::lazy_static;
use regex::Regex;

use crate::constants::{MAX_BATCH_ENTRIES_SIZE, MAX_SOURCE_LENGTH};
use crate::errors::ValidationError;
use crate::record::Record;

lazy_static! {
    /// Span ids are exactly 16 hexadecimal characters, either case.
    static ref SPAN_ID_REGEX: Regex =
        Regex::new(r"^[a-fA-F0-9]{16}$").expect("failed creating regex");
}

/// Decides whether a record may enter the pipeline.
pub trait Validator: Send + Sync {
    fn validate(&self, record: &Record) -> Result<(), ValidationError>;

    /// Validates a whole batch right before delivery.
    fn validate_batch(&self, records: &[Record]) -> Result<(), ValidationError> {
        if records.is_empty() {
            return Err(ValidationError::new("logs", "at least one log is required"));
        }
        if records.len() > MAX_BATCH_ENTRIES_SIZE {
            return Err(ValidationError::new(
                "logs",
                format!("batch size must be {MAX_BATCH_ENTRIES_SIZE} logs or less"),
            ));
        }
        for (index, record) in records.iter().enumerate() {
            self.validate(record).map_err(|e| {
                ValidationError::new(e.field, format!("log at index {index}: {}", e.message))
            })?;
        }
        Ok(())
    }
}

/// The intake's field rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultValidator;

impl Validator for DefaultValidator {
    fn validate(&self, record: &Record) -> Result<(), ValidationError> {
        if record.source.is_empty() {
            return Err(ValidationError::new("service", "service name is required"));
        }
        if record.source.chars().count() > MAX_SOURCE_LENGTH {
            return Err(ValidationError::new(
                "service",
                format!("service name must be {MAX_SOURCE_LENGTH} characters or less"),
            ));
        }
        if record.message.is_empty() {
            return Err(ValidationError::new("message", "message is required"));
        }
        if let Some(span_id) = record.span_id.as_deref() {
            if !span_id.is_empty() && !SPAN_ID_REGEX.is_match(span_id) {
                return Err(ValidationError::new(
                    "span_id",
                    "span_id must be exactly 16 hexadecimal characters",
                ));
            }
        }
        Ok(())
    }
}
