//! # Prometheus Metrics
//!
//! Operation metrics for a console session. Every controller operation the
//! console starts goes through [`ConsoleMetrics::observe`], which tracks it
//! as in flight, times it, and counts its outcome.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers.

use std::future::Future;

use cpe_controller::{OperationClass, OperationOutcome};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Holds all Prometheus metric handles for the console.
#[derive(Clone)]
pub struct ConsoleMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Settled operations by class and outcome label.
    pub operations_total: IntCounterVec,
    /// Operations currently in flight.
    pub operations_in_flight: IntGauge,
    /// Operation latency in seconds, by class.
    pub operation_latency_seconds: HistogramVec,
}

impl ConsoleMetrics {
    /// Creates and registers all metrics.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("cpe".into()), None)?;

        let operations_total = IntCounterVec::new(
            Opts::new("operations_total", "Settled controller operations"),
            &["class", "outcome"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let operations_in_flight = IntGauge::new(
            "operations_in_flight",
            "Controller operations currently in flight",
        )?;
        registry.register(Box::new(operations_in_flight.clone()))?;

        let operation_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "operation_latency_seconds",
                "End-to-end controller operation latency in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["class"],
        )?;
        registry.register(Box::new(operation_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            operations_total,
            operations_in_flight,
            operation_latency_seconds,
        })
    }

    /// Runs `operation`, recording it under `class`.
    pub async fn observe<F>(&self, class: OperationClass, operation: F) -> OperationOutcome
    where
        F: Future<Output = OperationOutcome>,
    {
        self.operations_in_flight.inc();
        let timer = self
            .operation_latency_seconds
            .with_label_values(&[class.as_str()])
            .start_timer();
        let outcome = operation.await;
        timer.observe_duration();
        self.operations_in_flight.dec();
        self.operations_total
            .with_label_values(&[class.as_str(), outcome.label()])
            .inc();
        outcome
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn observe_counts_outcomes() {
        let metrics = ConsoleMetrics::new().unwrap();
        metrics
            .observe(OperationClass::Deposit, async { OperationOutcome::Completed })
            .await;
        metrics
            .observe(OperationClass::Deposit, async { OperationOutcome::Skipped })
            .await;

        let completed = metrics
            .operations_total
            .with_label_values(&["deposit", "completed"])
            .get();
        assert_eq!(completed, 1);
        assert_eq!(metrics.operations_in_flight.get(), 0);

        let text = metrics.encode().unwrap();
        assert!(text.contains("cpe_operations_total"));
        assert!(text.contains("outcome=\"skipped\""));
    }
}
