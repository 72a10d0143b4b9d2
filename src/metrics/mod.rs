//! Prometheus metrics for the relay.
//!
//! This module provides metrics for monitoring both halves of the relay:
//! - Publish metrics (accepted and rejected messages per lane)
//! - Consume metrics (messages taken off a lane, handler and decode failures)
//! - Delivery metrics (Telegram sends by kind and outcome)

mod helpers;

pub use helpers::{encode_metrics, DeliveryMetrics};

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "relay";

lazy_static! {
    // ============================================================================
    // Publish Metrics
    // ============================================================================

    /// Messages accepted onto a lane
    pub static ref MESSAGES_PUBLISHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_published_total", METRIC_PREFIX),
        "Total messages enqueued",
        &["lane"]
    ).unwrap();

    /// Publish attempts that failed, by reason
    pub static ref PUBLISH_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_publish_failures_total", METRIC_PREFIX),
        "Total failed publish attempts",
        &["lane", "reason"]
    ).unwrap();

    // ============================================================================
    // Consume Metrics
    // ============================================================================

    /// Messages handed to a consumer handler
    pub static ref MESSAGES_CONSUMED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_consumed_total", METRIC_PREFIX),
        "Total messages taken off a lane",
        &["lane"]
    ).unwrap();

    /// Handler invocations that returned an error
    pub static ref HANDLER_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_handler_failures_total", METRIC_PREFIX),
        "Total consumer handler failures",
        &["lane"]
    ).unwrap();

    /// Broker messages dropped because the body could not be decoded
    pub static ref DECODE_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_decode_failures_total", METRIC_PREFIX),
        "Total messages dropped on decode failure",
        &["lane"]
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Telegram deliveries by kind and outcome
    pub static ref DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_deliveries_total", METRIC_PREFIX),
        "Total deliveries to the chat endpoint",
        &["kind", "outcome"]
    ).unwrap();
}
