// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Exponential backoff with additive jitter.
//!
//! For a zero-based `attempt` the wait is `min * 2^attempt`, capped at `max`,
//! plus a jitter drawn uniformly from `[0, 0.25 * capped]`.

use std::time::Duration;

/// Upper bound of the jitter as a fraction of the capped wait.
const JITTER_FACTOR: f64 = 0.25;

/// Computes the wait before retry `attempt` using the thread-local generator.
#[must_use]
pub fn compute(attempt: u32, min: Duration, max: Duration) -> Duration {
    with_jitter(capped(attempt, min, max), fastrand::f64())
}

/// Same as [`compute`] with an explicit generator, for reproducible sequences.
#[must_use]
pub fn compute_with_rng(
    rng: &mut fastrand::Rng,
    attempt: u32,
    min: Duration,
    max: Duration,
) -> Duration {
    with_jitter(capped(attempt, min, max), rng.f64())
}

/// `min * 2^attempt` capped at `max`; saturates instead of overflowing.
fn capped(attempt: u32, min: Duration, max: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    min.checked_mul(factor).unwrap_or(max).min(max)
}

fn with_jitter(base: Duration, unit: f64) -> Duration {
    base + base.mul_f64(JITTER_FACTOR * unit.clamp(0.0, 1.0))
}
