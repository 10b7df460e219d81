//! Metrics sink consumed by the service loop.

use std::future::Future;
use std::time::{Duration, Instant};

use prometheus::{GaugeVec, IntGaugeVec, Opts, Registry};

/// Gauges the service loop emits every tick.
pub trait Metrics: Send + Sync {
    fn service_up(&self, service: &str);
    fn service_down(&self, service: &str);
    fn observe_check_duration(&self, service: &str, check: &str, elapsed: Duration);
}

/// Wraps a check invocation, recording its wall-clock duration before
/// forwarding the result.
pub async fn measure_call<T, F, Fut>(
    metrics: &dyn Metrics,
    service: &str,
    check: &str,
    call: F,
) -> T
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let started = Instant::now();
    let result = call().await;
    metrics.observe_check_duration(service, check, started.elapsed());
    result
}

/// Prometheus-backed sink registering into an explicit registry.
pub struct PrometheusMetrics {
    service_up: IntGaugeVec,
    check_duration: GaugeVec,
}

impl PrometheusMetrics {
    pub fn new(version: &str, registry: &Registry) -> Result<Self, prometheus::Error> {
        let up = IntGaugeVec::new(
            Opts::new("up", "Process liveness").namespace("anycastd"),
            &["version"],
        )?;
        let service_up = IntGaugeVec::new(
            Opts::new("service_up", "Service liveness status based on checks")
                .namespace("anycastd"),
            &["service"],
        )?;
        let check_duration = GaugeVec::new(
            Opts::new(
                "check_duration_seconds",
                "Wall-clock duration of the check during the last tick",
            )
            .namespace("anycastd"),
            &["service", "check"],
        )?;

        registry.register(Box::new(up.clone()))?;
        registry.register(Box::new(service_up.clone()))?;
        registry.register(Box::new(check_duration.clone()))?;

        up.with_label_values(&[version]).set(1);

        Ok(Self {
            service_up,
            check_duration,
        })
    }
}

impl Metrics for PrometheusMetrics {
    fn service_up(&self, service: &str) {
        self.service_up.with_label_values(&[service]).set(1);
    }

    fn service_down(&self, service: &str) {
        self.service_up.with_label_values(&[service]).set(0);
    }

    fn observe_check_duration(&self, service: &str, check: &str, elapsed: Duration) {
        self.check_duration
            .with_label_values(&[service, check])
            .set(elapsed.as_secs_f64());
    }
}
