//! Error types for the queue tracking service
//!
//! Operations return `anyhow` results; the variants below are attached as the
//! root cause so the scheduler and the command layer can classify a failure
//! with `downcast_ref::<QueueError>()`.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific queue tracking scenarios
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Server {server_id} is not fully configured: {reason}")]
    Validation { server_id: u64, reason: String },

    #[error("Invalid timeout state for member {member_id}: {reason}")]
    InvalidTimeout { member_id: u64, reason: String },

    #[error("Chat platform unavailable: {message}")]
    TransientPlatform { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Server not found: {server_id}")]
    ServerNotFound { server_id: u64 },

    #[error("This server has not yet been initialised: {server_id}")]
    ServerNotInitialized { server_id: u64 },

    #[error("{server_id} has already been initialised")]
    AlreadyInitialized { server_id: u64 },

    #[error("No data on the requested member has been found: {reference}")]
    MemberNotFound { reference: String },

    #[error("Member {member_id} is not permitted to administer server {server_id}")]
    PermissionDenied { member_id: u64, server_id: u64 },

    #[error("Incorrect channel type: {kind}")]
    InvalidChannelKind { kind: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl QueueError {
    /// Whether the failure is expected to clear up on a later tick
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QueueError::TransientPlatform { .. } | QueueError::Storage { .. }
        )
    }

    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            QueueError::Validation { .. } => "validation",
            QueueError::InvalidTimeout { .. } => "invalid_timeout",
            QueueError::TransientPlatform { .. } => "transient_platform",
            QueueError::ConfigurationError { .. } => "configuration",
            QueueError::ServerNotFound { .. } => "server_not_found",
            QueueError::ServerNotInitialized { .. } => "server_not_initialized",
            QueueError::AlreadyInitialized { .. } => "already_initialized",
            QueueError::MemberNotFound { .. } => "member_not_found",
            QueueError::PermissionDenied { .. } => "permission_denied",
            QueueError::InvalidChannelKind { .. } => "invalid_channel_kind",
            QueueError::Storage { .. } => "storage",
            QueueError::InternalError { .. } => "internal",
        }
    }
}

/// Classify an `anyhow` error by its `QueueError` root, if any
pub fn error_kind(error: &anyhow::Error) -> &'static str {
    error
        .downcast_ref::<QueueError>()
        .map(QueueError::kind)
        .unwrap_or("unknown")
}
