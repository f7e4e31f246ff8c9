// Media control plane error types

use std::time::Duration;

/// Errors reported by a media control plane client
#[derive(Debug, Clone, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Control plane API error: {0}")]
    Api(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl ControlPlaneError {
    /// Network failures, timeouts and server-side faults are worth another try
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_) | Self::Api(_))
    }
}

pub type Result<T> = std::result::Result<T, ControlPlaneError>;
