//! Cuebot - voice-channel queue tracking for chat servers
//!
//! This crate watches a designated voice channel per server, keeps a
//! persistent queue of the members waiting in it, applies a grace period to
//! members who briefly leave, credits queue statistics and publishes a live
//! status message. Tracking only runs during the configured regional
//! sessions.

pub mod admin;
pub mod config;
pub mod error;
pub mod metrics;
pub mod platform;
pub mod queue;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod storage;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{QueueError, Result};
pub use types::*;

// Re-export key components
pub use admin::{AdminCommand, AdminService};
pub use platform::{InMemoryPlatform, MembershipSource, MessageChannel};
pub use queue::{plan_pass, PassReport, QueueReconciler};
pub use scheduler::{ReconcileScheduler, ReconcileTrigger, SchedulerLiveness};
pub use session::{SessionPhase, SessionSchedule};
pub use storage::{InMemoryRepository, JsonFileRepository, Repository};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
