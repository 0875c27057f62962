//! Operator Metrics
//!
//! Prometheus collectors registered in a registry owned by the operator, so
//! several instances (tests, benches) never collide in the global registry.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

use crate::error::{Error, Result};

const NAMESPACE: &str = "namespacestore";

/// Reconcile and remote-call metrics
pub struct ReconcileMetrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
    reconcile_duration: Histogram,
    status_update_failures: IntCounter,
    remote_calls_total: IntCounterVec,
}

impl ReconcileMetrics {
    /// Create and register all collectors
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new("reconcile_total", "Reconcile calls by outcome").namespace(NAMESPACE),
            &["outcome"],
        )
        .map_err(metrics_error)?;
        let reconcile_duration = Histogram::with_opts(
            HistogramOpts::new("reconcile_duration_seconds", "Duration of reconcile calls")
                .namespace(NAMESPACE)
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )
        .map_err(metrics_error)?;
        let status_update_failures = IntCounter::with_opts(
            Opts::new(
                "status_update_failures_total",
                "Status publications that failed after retries",
            )
            .namespace(NAMESPACE),
        )
        .map_err(metrics_error)?;
        let remote_calls_total = IntCounterVec::new(
            Opts::new("remote_calls_total", "Remote storage API calls by method")
                .namespace(NAMESPACE),
            &["method"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(reconcile_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(reconcile_duration.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(status_update_failures.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(remote_calls_total.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            reconcile_total,
            reconcile_duration,
            status_update_failures,
            remote_calls_total,
        })
    }

    #[inline]
    pub fn observe_reconcile(&self, outcome: &str, elapsed: Duration) {
        self.reconcile_total.with_label_values(&[outcome]).inc();
        self.reconcile_duration.observe(elapsed.as_secs_f64());
    }

    #[inline]
    pub fn inc_status_failure(&self) {
        self.status_update_failures.inc();
    }

    #[inline]
    pub fn inc_remote_call(&self, method: &str) {
        self.remote_calls_total.with_label_values(&[method]).inc();
    }

    /// Reconcile count for one outcome
    pub fn reconcile_count(&self, outcome: &str) -> u64 {
        self.reconcile_total.with_label_values(&[outcome]).get()
    }

    /// Render all collectors in the text exposition format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics encoding: {e}")))
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_counters() {
        let metrics = ReconcileMetrics::new().unwrap();
        metrics.observe_reconcile("converged", Duration::from_millis(12));
        metrics.observe_reconcile("converged", Duration::from_millis(8));
        metrics.inc_remote_call("read_system");

        assert_eq!(metrics.reconcile_count("converged"), 2);
        assert_eq!(metrics.reconcile_count("rejected"), 0);

        let text = metrics.encode().unwrap();
        assert!(text.contains("namespacestore_reconcile_total{outcome=\"converged\"} 2"));
        assert!(text.contains("namespacestore_remote_calls_total{method=\"read_system\"} 1"));
        assert!(text.contains("namespacestore_reconcile_duration_seconds_count 2"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = ReconcileMetrics::new().unwrap();
        let b = ReconcileMetrics::new().unwrap();
        a.inc_status_failure();
        assert!(a.encode().unwrap().contains("status_update_failures_total 1"));
        assert!(b.encode().unwrap().contains("status_update_failures_total 0"));
    }
}
