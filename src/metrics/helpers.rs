//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::DELIVERIES_TOTAL;

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording delivery metrics
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    /// Record one delivery attempt of `kind` (`"text"` or `"file"`)
    pub fn record(kind: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        DELIVERIES_TOTAL.with_label_values(&[kind, outcome]).inc();
    }
}
