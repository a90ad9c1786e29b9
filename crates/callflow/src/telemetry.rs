//! # Call metrics
//!
//! With the `metrics` feature, the call runtime records OpenTelemetry
//! instruments through handles registered by [`init_metric_handles`]. Until
//! the handles are registered, and whenever the feature is off, every
//! recording function is a no-op.
//!
//! | Instrument | Kind | Attributes |
//! |---|---|---|
//! | `calls_started` | counter | `side` |
//! | `calls_inflight` | up/down counter | |
//! | `call_errors` | counter | `code` |
//! | `call_duration` | histogram (ms) | |
//! | `messages_sent` | counter | |
//! | `messages_received` | counter | |
//!
//! A call is in flight from the moment one side creates it until that side
//! has released every half and context of it, so each call is counted once
//! per side.

use crate::call::Side;
use tonic::Code;

#[cfg(feature = "metrics")]
use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter, UpDownCounter},
};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

// Metric handles - only compiled when metrics feature is enabled
#[cfg(feature = "metrics")]
static CALLS_STARTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CALLS_INFLIGHT: OnceLock<UpDownCounter<i64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CALL_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CALL_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static MESSAGES_SENT: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static MESSAGES_RECEIVED: OnceLock<Counter<u64>> = OnceLock::new();

/// Registers the instruments on `meter`. Later calls are ignored.
#[cfg(feature = "metrics")]
pub fn init_metric_handles(meter: &Meter) {
    let _ = CALLS_STARTED.set(
        meter
            .u64_counter("calls_started")
            .with_description("Calls created, per side")
            .build(),
    );

    let _ = CALLS_INFLIGHT.set(
        meter
            .i64_up_down_counter("calls_inflight")
            .with_description("Calls not yet released")
            .build(),
    );

    let _ = CALL_ERRORS.set(
        meter
            .u64_counter("call_errors")
            .with_description("Calls that ended with an error status")
            .build(),
    );

    let _ = CALL_DURATION_MS.set(
        meter
            .f64_histogram("call_duration")
            .with_unit("ms")
            .with_description("Time from call creation to release")
            .build(),
    );

    let _ = MESSAGES_SENT.set(
        meter
            .u64_counter("messages_sent")
            .with_description("Messages pushed onto call channels")
            .build(),
    );

    let _ = MESSAGES_RECEIVED.set(
        meter
            .u64_counter("messages_received")
            .with_description("Messages delivered to receivers")
            .build(),
    );
}

#[cfg(feature = "metrics")]
const fn side_label(side: Side) -> &'static str {
    match side {
        Side::Client => "client",
        Side::Server => "server",
    }
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
pub(crate) fn increment_calls_started(side: Side) {
    if let Some(counter) = CALLS_STARTED.get() {
        counter.add(1, &[KeyValue::new("side", side_label(side))]);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn increment_calls_started(_side: Side) {}

#[cfg(feature = "metrics")]
pub(crate) fn increment_calls_inflight() {
    if let Some(counter) = CALLS_INFLIGHT.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn increment_calls_inflight() {}

#[cfg(feature = "metrics")]
pub(crate) fn decrement_calls_inflight() {
    if let Some(counter) = CALLS_INFLIGHT.get() {
        counter.add(-1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn decrement_calls_inflight() {}

#[cfg(feature = "metrics")]
pub(crate) fn increment_call_errors(code: Code) {
    if let Some(counter) = CALL_ERRORS.get() {
        counter.add(1, &[KeyValue::new("code", i64::from(code as i32))]);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn increment_call_errors(_code: Code) {}

#[cfg(feature = "metrics")]
pub(crate) fn record_call_duration(duration_ms: f64) {
    if let Some(histogram) = CALL_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_call_duration(_duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub(crate) fn increment_messages_sent() {
    if let Some(counter) = MESSAGES_SENT.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn increment_messages_sent() {}

#[cfg(feature = "metrics")]
pub(crate) fn increment_messages_received() {
    if let Some(counter) = MESSAGES_RECEIVED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn increment_messages_received() {}
