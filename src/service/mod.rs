//! Service layer
//!
//! Application state, component wiring, background task management and
//! health checks for the running service.

pub mod app;
pub mod health;

pub use app::{AppState, ServiceContext, ServiceError};
pub use health::{HealthCheck, HealthStatus};
