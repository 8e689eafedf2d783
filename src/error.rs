use crate::config::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FollowwatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Upstream API error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Application shutdown requested")]
    Shutdown,

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpstreamError {
    #[error("API request failed: {0}")]
    RequestFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SnapshotError {
    #[error("Snapshot not found: {key}")]
    NotFound { key: String },

    #[error("Snapshot {key} is unreadable: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Failed to write snapshot {key}: {reason}")]
    WriteFailed { key: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    #[error("Malformed new-follow record from {originator:?}: {reason}")]
    Anomaly { originator: String, reason: String },
}

/// Classification of errors for the per-account processing loop
pub struct ErrorRecovery;

impl ErrorRecovery {
    /// Whether a later run (or a retry after the cooldown) could plausibly succeed
    pub fn is_recoverable(error: &FollowwatchError) -> bool {
        match error {
            FollowwatchError::Network(_) => true,

            FollowwatchError::Upstream(upstream_error) => match upstream_error {
                UpstreamError::RequestFailed(_) => true,
                UpstreamError::RateLimitExceeded { .. } => true,
                UpstreamError::AuthenticationFailed(_) => false,
                UpstreamError::NotFound { .. } => false,
                UpstreamError::InvalidResponse(_) => false,
            },

            FollowwatchError::Snapshot(snapshot_error) => match snapshot_error {
                SnapshotError::NotFound { .. } => true, // baseline appears after the next run
                SnapshotError::Corrupt { .. } => false,
                SnapshotError::WriteFailed { .. } => true,
            },

            FollowwatchError::Config(_) => false,
            FollowwatchError::Json(_) => false,
            FollowwatchError::Url(_) => false,
            FollowwatchError::Shutdown => false,
            FollowwatchError::InvalidData(_) => false,
        }
    }

    /// Whether the error must abort the whole batch instead of skipping one member
    pub fn aborts_batch(error: &FollowwatchError) -> bool {
        match error {
            FollowwatchError::Config(_) => true,
            FollowwatchError::Shutdown => true,
            FollowwatchError::Upstream(UpstreamError::AuthenticationFailed(_)) => true,
            FollowwatchError::Snapshot(SnapshotError::WriteFailed { .. }) => true,
            _ => false,
        }
    }

    /// Whether the error should terminate the process
    pub fn should_shutdown(error: &FollowwatchError) -> bool {
        match error {
            FollowwatchError::Config(_) => true,
            FollowwatchError::Shutdown => true,
            FollowwatchError::Upstream(UpstreamError::AuthenticationFailed(_)) => true,
            _ => false,
        }
    }
}
