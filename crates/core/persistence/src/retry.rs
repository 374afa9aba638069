//! Retry policy for transient database failures.
//!
//! Retries are local to this layer: up to 3 attempts with a 1 second initial
//! delay and exponential backoff, gated on
//! [`persistence_db::Error::is_retryable`]. Terminal errors propagate on the
//! first attempt.

use std::time::Duration;

use backon::ExponentialBuilder;

/// The standard retry policy for persistence operations.
pub(crate) fn policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_times(3)
}

/// Notify callback logging each retry attempt.
pub(crate) fn notify(op: &'static str) -> impl Fn(&persistence_db::Error, Duration) {
    move |err, dur| {
        tracing::warn!(
            error = %err,
            "Transient database error during {op}. Retrying in {:.1}s",
            dur.as_secs_f32()
        );
    }
}
