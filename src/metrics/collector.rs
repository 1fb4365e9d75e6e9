//! Metrics collection using Prometheus
//!
//! Counters and gauges describing reconciliation passes, queue removals and
//! queue depth per server, plus service-level health.

use anyhow::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome label of a reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Success,
    /// Server not configured enough to reconcile
    Skipped,
    /// Platform failure; retried next tick
    Transient,
    Failed,
}

impl PassOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassOutcome::Success => "success",
            PassOutcome::Skipped => "skipped",
            PassOutcome::Transient => "transient",
            PassOutcome::Failed => "failed",
        }
    }
}

/// Main metrics collector for the queue service
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
    service_metrics: ServiceMetrics,
    queue_metrics: QueueMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Reconciliation metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Passes by outcome
    pub reconcile_passes_total: IntCounterVec,

    /// Removals by kind (counted, discarded, anomaly)
    pub queue_removals_total: IntCounterVec,

    /// Entries added to a queue
    pub queue_joins_total: IntCounterVec,

    /// Current entries per server and state
    pub queue_entries: IntGaugeVec,

    /// Status message writes by action (edited, posted, unchanged)
    pub status_messages_total: IntCounterVec,

    /// Wall time of a full pass
    pub reconcile_duration_seconds: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        Self::with_registry(Arc::new(Registry::new()))
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    /// Record one finished pass
    pub fn record_pass(&self, outcome: PassOutcome, duration: Duration) {
        self.queue_metrics
            .reconcile_passes_total
            .with_label_values(&[outcome.as_str()])
            .inc();
        self.queue_metrics
            .reconcile_duration_seconds
            .observe(duration.as_secs_f64());
    }

    /// Record the removals and joins committed by a pass
    pub fn record_queue_changes(
        &self,
        server: &str,
        joined: u64,
        counted: u64,
        discarded: u64,
        anomalies: u64,
    ) {
        if joined > 0 {
            self.queue_metrics
                .queue_joins_total
                .with_label_values(&[server])
                .inc_by(joined);
        }
        for (kind, amount) in [
            ("counted", counted),
            ("discarded", discarded),
            ("anomaly", anomalies),
        ] {
            if amount > 0 {
                self.queue_metrics
                    .queue_removals_total
                    .with_label_values(&[kind])
                    .inc_by(amount);
            }
        }
    }

    /// Set the current queue depth of a server
    pub fn set_queue_depth(&self, server: &str, queued: usize, timed_out: usize) {
        self.queue_metrics
            .queue_entries
            .with_label_values(&[server, "queued"])
            .set(queued as i64);
        self.queue_metrics
            .queue_entries
            .with_label_values(&[server, "timed_out"])
            .set(timed_out as i64);
    }

    pub fn record_status_message(&self, action: &str) {
        self.queue_metrics
            .status_messages_total
            .with_label_values(&[action])
            .inc();
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Prometheus text exposition of every registered metric
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds = IntGauge::new("cuebot_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "cuebot_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("cuebot_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            component_health,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let reconcile_passes_total = IntCounterVec::new(
            Opts::new("cuebot_reconcile_passes_total", "Reconciliation passes"),
            &["outcome"],
        )?;
        registry.register(Box::new(reconcile_passes_total.clone()))?;

        let queue_removals_total = IntCounterVec::new(
            Opts::new("cuebot_queue_removals_total", "Queue entry removals"),
            &["kind"],
        )?;
        registry.register(Box::new(queue_removals_total.clone()))?;

        let queue_joins_total = IntCounterVec::new(
            Opts::new("cuebot_queue_joins_total", "Queue entries created"),
            &["server"],
        )?;
        registry.register(Box::new(queue_joins_total.clone()))?;

        let queue_entries = IntGaugeVec::new(
            Opts::new("cuebot_queue_entries", "Current queue entries"),
            &["server", "state"],
        )?;
        registry.register(Box::new(queue_entries.clone()))?;

        let status_messages_total = IntCounterVec::new(
            Opts::new("cuebot_status_messages_total", "Status message writes"),
            &["action"],
        )?;
        registry.register(Box::new(status_messages_total.clone()))?;

        let reconcile_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "cuebot_reconcile_duration_seconds",
                "Reconciliation pass duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(reconcile_duration_seconds.clone()))?;

        Ok(Self {
            reconcile_passes_total,
            queue_removals_total,
            queue_joins_total,
            queue_entries,
            status_messages_total,
            reconcile_duration_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_recording() {
        let collector = MetricsCollector::new().unwrap();
        collector.record_pass(PassOutcome::Success, Duration::from_millis(3));
        collector.record_pass(PassOutcome::Transient, Duration::from_millis(1));
        collector.record_pass(PassOutcome::Success, Duration::from_millis(2));

        let passes = &collector.queue().reconcile_passes_total;
        assert_eq!(passes.with_label_values(&["success"]).get(), 2);
        assert_eq!(passes.with_label_values(&["transient"]).get(), 1);
        assert_eq!(
            collector
                .queue()
                .reconcile_duration_seconds
                .get_sample_count(),
            3
        );
    }

    #[test]
    fn test_queue_changes_and_depth() {
        let collector = MetricsCollector::new().unwrap();
        collector.record_queue_changes("10", 2, 1, 1, 1);
        collector.set_queue_depth("10", 3, 1);

        let removals = &collector.queue().queue_removals_total;
        assert_eq!(removals.with_label_values(&["counted"]).get(), 1);
        assert_eq!(removals.with_label_values(&["anomaly"]).get(), 1);
        assert_eq!(
            collector
                .queue()
                .queue_entries
                .with_label_values(&["10", "queued"])
                .get(),
            3
        );
    }

    #[test]
    fn test_render_exposition() {
        let collector = MetricsCollector::new().unwrap();
        collector.update_health_status(2);
        collector.update_component_health("repository", true);
        collector.record_pass(PassOutcome::Skipped, Duration::ZERO);

        let text = collector.render().unwrap();
        assert!(text.contains("cuebot_health_status 2"));
        assert!(text.contains("cuebot_reconcile_passes_total{outcome=\"skipped\"} 1"));
    }

    #[test]
    fn test_metrics_timer() {
        let collector = MetricsCollector::new().unwrap();
        let timer = collector.start_timer();
        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.stop() >= Duration::from_millis(10));
    }
}
