use crate::error::{GuardError, Result};
use axum::{
    body::Body,
    extract::State,
    http::{Response, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the Prometheus recorder and register metric descriptions
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            GuardError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    fn register_metrics() {
        describe_counter!(
            "quota_guard_decisions_total",
            "Rate limit decisions by algorithm and outcome"
        );
        describe_counter!(
            "quota_guard_rate_limit_exceeded_total",
            "Total number of requests rejected due to rate limiting"
        );
        describe_counter!(
            "quota_guard_store_errors_total",
            "Total number of counter store failures"
        );
        describe_histogram!(
            "quota_guard_check_duration_seconds",
            "Latency of a rate limit check including the store round trip"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    let metrics = service.render();
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(Body::from(metrics))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Outcome label for a rate limit decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Allowed,
    Blocked,
    Skipped,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Allowed => "allowed",
            Outcome::Blocked => "blocked",
            Outcome::Skipped => "skipped",
        }
    }
}

/// Record a rate limit decision
pub fn record_decision(algorithm: &str, outcome: Outcome) {
    counter!(
        "quota_guard_decisions_total",
        "algorithm" => algorithm.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);

    if outcome == Outcome::Blocked {
        counter!("quota_guard_rate_limit_exceeded_total", "algorithm" => algorithm.to_string())
            .increment(1);
    }
}

/// Record the latency of a check
pub fn record_check_duration(algorithm: &str, duration: f64) {
    histogram!("quota_guard_check_duration_seconds", "algorithm" => algorithm.to_string())
        .record(duration);
}

/// Record a counter store failure
pub fn record_store_error(algorithm: &str) {
    counter!("quota_guard_store_errors_total", "algorithm" => algorithm.to_string())
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(Outcome::Allowed.as_str(), "allowed");
        assert_eq!(Outcome::Blocked.as_str(), "blocked");
        assert_eq!(Outcome::Skipped.as_str(), "skipped");
    }

    #[test]
    fn test_decisions_are_rendered() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_decision("sliding-window", Outcome::Allowed);
            record_decision("sliding-window", Outcome::Blocked);
            record_decision("sliding-window", Outcome::Blocked);
            record_check_duration("sliding-window", 0.001);
            record_store_error("token-bucket");
        });

        let rendered = handle.render();
        let sample = |name: &str, labels: &[&str], value: &str| {
            rendered.lines().any(|line| {
                line.starts_with(&format!("{}{{", name))
                    && labels.iter().all(|label| line.contains(label))
                    && line.ends_with(&format!(" {}", value))
            })
        };

        assert!(sample(
            "quota_guard_decisions_total",
            &[r#"algorithm="sliding-window""#, r#"outcome="blocked""#],
            "2"
        ));
        assert!(sample(
            "quota_guard_decisions_total",
            &[r#"algorithm="sliding-window""#, r#"outcome="allowed""#],
            "1"
        ));
        assert!(sample(
            "quota_guard_rate_limit_exceeded_total",
            &[r#"algorithm="sliding-window""#],
            "2"
        ));
        assert!(sample(
            "quota_guard_store_errors_total",
            &[r#"algorithm="token-bucket""#],
            "1"
        ));
        assert!(sample(
            "quota_guard_check_duration_seconds_count",
            &[r#"algorithm="sliding-window""#],
            "1"
        ));
    }
}
