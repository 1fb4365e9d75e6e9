//! Health check functionality
//!
//! Readiness and liveness checks plus a detailed report of component
//! health and queue statistics.

use crate::service::app::ServiceContext;
use crate::utils::format_dhms;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Worst of two statuses
    fn combine(self, other: &HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Set when the component is not healthy
    pub message: Option<String>,
    pub duration_ms: u64,
}

/// Queue statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Servers initialised
    pub servers: usize,
    /// Servers with queue and output channels set
    pub configured_servers: usize,
    /// Entries actively queued, from the latest passes
    pub queued: usize,
    /// Entries on timeout, from the latest passes
    pub on_timeout: usize,
    pub uptime_info: String,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(context: &ServiceContext) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(context).await,
            Self::check_repository(context).await,
            Self::check_scheduler(context),
        ];
        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, check| acc.combine(&check.status));
        let stats = Self::gather_service_stats(context).await;

        Ok(HealthCheck {
            status,
            service: context.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(context: &ServiceContext) -> Result<HealthStatus> {
        if context.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - running, reconciling and able to reach storage
    pub async fn readiness_check(context: &ServiceContext) -> Result<HealthStatus> {
        if !context.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }
        let scheduler = Self::check_scheduler(context).status;
        Ok(scheduler.combine(&Self::check_repository(context).await.status))
    }

    async fn check_service_running(context: &ServiceContext) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if context.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn check_repository(context: &ServiceContext) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match context.repository().list_servers().await {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Repository health check failed: {}", e);
                (
                    HealthStatus::Unhealthy,
                    Some(format!("Repository unavailable: {}", e)),
                )
            }
        };

        ComponentCheck {
            name: "repository".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_scheduler(context: &ServiceContext) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if context.scheduler_running() {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Reconciliation scheduler is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "scheduler".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn gather_service_stats(context: &ServiceContext) -> ServiceStats {
        let uptime_info = format!("Up {}", format_dhms(context.uptime()));
        let servers = match context.repository().list_servers().await {
            Ok(servers) => servers,
            Err(_) => {
                return ServiceStats {
                    uptime_info,
                    ..ServiceStats::default()
                }
            }
        };

        let reconciler = context.reconciler();
        let reports: Vec<_> = servers
            .iter()
            .filter_map(|server| reconciler.last_report(server.id))
            .collect();

        ServiceStats {
            servers: servers.len(),
            configured_servers: servers.iter().filter(|s| s.is_configured()).count(),
            queued: reports.iter().map(|r| r.queued).sum(),
            on_timeout: reports.iter().map(|r| r.on_timeout).sum(),
            uptime_info,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
