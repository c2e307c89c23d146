// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Logs Pipeline
//!
//! Client-side log delivery: application code submits discrete log records,
//! the pipeline accumulates them and ships them in batches to a remote intake
//! endpoint, shielding the caller from transient network failures.
//!
//! ## Architecture
//!
//! ```text
//!   producer ──submit──> LogsPipeline ──> Aggregator buffer
//!                                              │ (size or timer trigger)
//!                                              v
//!                        CircuitBreaker::allow ──> retry::run ──> Deliverer
//!                                              │
//!                        CircuitBreaker::record_{success,failure}
//! ```
//!
//! - [`aggregator`]: buffers records, flushes on size and on a timer
//! - [`circuit_breaker`]: gates delivery after consecutive failures
//! - [`retry`]: retries transient delivery failures with [`backoff`]
//! - [`pipeline`]: composes the above and owns the lifecycle
//! - [`flusher`]: the HTTP delivery collaborator
//! - [`validation`], [`context`]: record validation and correlation-id enrichment

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]

pub mod aggregator;
pub mod backoff;
pub mod circuit_breaker;
pub mod config;
pub mod constants;
pub mod context;
pub mod errors;
pub mod flusher;
pub mod logger;
pub mod pipeline;
pub mod record;
pub mod retry;
pub mod validation;

pub use config::Config;
pub use context::Context;
pub use errors::Error;
pub use pipeline::LogsPipeline;
pub use record::{Level, Record};
