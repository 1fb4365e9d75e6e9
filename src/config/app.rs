//! Main application configuration
//!
//! This module defines the primary configuration structures for the cuebot
//! queue tracker, including environment variable loading, TOML file loading
//! and validation.

use crate::config::sessions::SessionSettings;
use crate::error::QueueError;
use crate::session::SessionSchedule;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub scheduler: SchedulerSettings,
    pub sessions: SessionSettings,
    pub storage: StorageSettings,
    pub superuser: Option<SuperuserSettings>,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Port for the health, metrics and presence endpoints
    pub http_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Reconciliation scheduling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Seconds between reconciliation ticks
    pub refresh_seconds: u64,
    /// Capacity of the ad-hoc reconciliation request channel
    pub trigger_buffer: usize,
    /// Plan and render passes without writing anything
    pub dry_run: bool,
}

/// Persistence settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// JSON snapshot file; in-memory only when unset
    pub path: Option<PathBuf>,
}

/// The member allowed to administer every server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuperuserSettings {
    pub id: u64,
    pub name: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "cuebot".to_string(),
            log_level: "info".to_string(),
            http_port: 8080,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            refresh_seconds: 15,
            trigger_buffer: 64,
            dry_run: false,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("Invalid {} value: {}", key, value))
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            self.service.log_level = log_level;
        }
        if let Ok(port) = env::var("HEALTH_PORT") {
            self.service.http_port = parse_env("HEALTH_PORT", &port)?;
        }
        if let Ok(timeout) = env::var("SHUTDOWN_TIMEOUT_SECONDS") {
            self.service.shutdown_timeout_seconds =
                parse_env("SHUTDOWN_TIMEOUT_SECONDS", &timeout)?;
        }

        // Scheduler settings
        if let Ok(refresh) = env::var("REFRESH_SECONDS") {
            self.scheduler.refresh_seconds = parse_env("REFRESH_SECONDS", &refresh)?;
        }
        if let Ok(dry_run) = env::var("DRY_RUN") {
            self.scheduler.dry_run = parse_env("DRY_RUN", &dry_run)?;
        }

        // Session windows
        if let Ok(start) = env::var("US_SESSION_START") {
            self.sessions.us.start = start;
        }
        if let Ok(end) = env::var("US_SESSION_END") {
            self.sessions.us.end = end;
        }
        if let Ok(start) = env::var("EU_SESSION_START") {
            self.sessions.eu.start = start;
        }
        if let Ok(end) = env::var("EU_SESSION_END") {
            self.sessions.eu.end = end;
        }
        if let Ok(minutes) = env::var("PRE_QUEUE_MINUTES") {
            self.sessions.pre_queue_minutes = parse_env("PRE_QUEUE_MINUTES", &minutes)?;
        }

        // Storage
        if let Ok(path) = env::var("STORAGE_PATH") {
            self.storage.path = Some(PathBuf::from(path));
        }

        // Superuser
        if let Ok(id) = env::var("SUPERUSER_ID") {
            let id = parse_env("SUPERUSER_ID", &id)?;
            let name = env::var("SUPERUSER_NAME").unwrap_or_else(|_| id_to_name(id));
            self.superuser = Some(SuperuserSettings { id, name });
        }

        Ok(())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get reconciliation interval as Duration
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.refresh_seconds)
    }

    /// Build the parsed session schedule
    pub fn session_schedule(&self) -> Result<SessionSchedule> {
        SessionSchedule::from_settings(&self.sessions)
    }
}

fn id_to_name(id: u64) -> String {
    format!("superuser-{}", id)
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    if config.service.http_port == 0 {
        return Err(anyhow!("HTTP port cannot be 0"));
    }
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }
    if config.scheduler.refresh_seconds == 0 {
        return Err(anyhow!("Refresh interval must be greater than 0"));
    }
    if config.scheduler.trigger_buffer == 0 {
        return Err(anyhow!("Trigger buffer must be greater than 0"));
    }

    // Malformed session boundaries fail before the loop starts
    config.session_schedule().map_err(|e| QueueError::ConfigurationError {
        message: format!("{:#}", e),
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.refresh_interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_rejects_zero_refresh() {
        let mut config = AppConfig::default();
        config.scheduler.refresh_seconds = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_bad_log_level() {
        let mut config = AppConfig::default();
        config.service.log_level = "chatty".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_malformed_session_time() {
        let mut config = AppConfig::default();
        config.sessions.us.start = "25:00".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<QueueError>(),
            Some(QueueError::ConfigurationError { .. })
        ));
    }

    #[test]
    fn test_parse_toml() {
        let raw = r#"
            [service]
            log_level = "debug"

            [scheduler]
            refresh_seconds = 30

            [sessions]
            pre_queue_minutes = 30

            [sessions.us]
            label = "USTZ SRE"
            start = "01:00"
            end = "07:00"

            [sessions.eu]
            label = "EUTZ SRE"
            start = "14:00"
            end = "22:00"

            [superuser]
            id = 1234
            name = "owner#0001"
        "#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.service.log_level, "debug");
        assert_eq!(config.service.http_port, 8080);
        assert_eq!(config.scheduler.refresh_seconds, 30);
        assert_eq!(config.superuser.as_ref().unwrap().id, 1234);
        assert!(validate_config(&config).is_ok());
    }
}
