//! Metrics and monitoring for the cuebot queue service
//!
//! Prometheus collectors for reconciliation passes and queue depth, plus the
//! HTTP server exposing them next to the health checks.

pub mod collector;
pub mod health;

pub use collector::{MetricsCollector, MetricsTimer, PassOutcome, QueueMetrics, ServiceMetrics};
pub use health::{HealthServer, HealthServerConfig, PresenceUpdate};
