//! Configuration management for the cuebot service
//!
//! This module handles configuration loading from environment variables and
//! TOML files, validation, and default values.

pub mod app;
pub mod sessions;

// Re-export commonly used types
pub use app::{
    validate_config, AppConfig, SchedulerSettings, ServiceSettings, StorageSettings,
    SuperuserSettings,
};
pub use sessions::{RegionSettings, SessionSettings};
