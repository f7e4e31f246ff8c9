// Media Control Plane
//
// Interface to the real-time media server that hosts rooms and ingresses.
// The network client lives outside this crate; the core only depends on the
// trait below and receives a handle at construction time.

pub mod error;
pub mod memory;

pub use error::{ControlPlaneError, Result};
pub use memory::InMemoryControlPlane;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Remote status of an ingress endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngressStatus {
    /// Connected to the source, not yet publishing into the room
    Buffering,
    /// Publishing media into the room
    Publishing,
    /// Idle, no source connected
    Inactive,
    /// Source reached its end
    Complete,
    /// Remote-side failure
    Error,
}

impl IngressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buffering => "buffering",
            Self::Publishing => "publishing",
            Self::Inactive => "inactive",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    /// Status string as reported by the media server API
    pub fn as_remote_str(&self) -> &'static str {
        match self {
            Self::Buffering => "ENDPOINT_BUFFERING",
            Self::Publishing => "ENDPOINT_PUBLISHING",
            Self::Inactive => "ENDPOINT_INACTIVE",
            Self::Complete => "ENDPOINT_COMPLETE",
            Self::Error => "ENDPOINT_ERROR",
        }
    }
}

impl FromStr for IngressStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "endpoint_buffering" | "buffering" => Ok(Self::Buffering),
            "endpoint_publishing" | "publishing" | "active" => Ok(Self::Publishing),
            "endpoint_inactive" | "inactive" => Ok(Self::Inactive),
            "endpoint_complete" | "complete" => Ok(Self::Complete),
            "endpoint_error" | "error" => Ok(Self::Error),
            _ => Err(format!("Unknown ingress status: {s}")),
        }
    }
}

impl std::fmt::Display for IngressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to create a URL-sourced ingress publishing into a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateIngressRequest {
    pub name: String,
    pub room_name: String,
    /// Media URL the ingress pulls from
    pub source_url: String,
    pub participant_identity: String,
    pub participant_name: String,
    pub enable_transcoding: bool,
}

/// Ingress as reported by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressInfo {
    pub ingress_id: String,
    /// Endpoint URL of the ingress (if the server exposes one)
    pub url: Option<String>,
    pub room_name: String,
    pub status: IngressStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Filter for `list_ingress`; empty filter lists everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressFilter {
    pub ingress_id: Option<String>,
    pub room_name: Option<String>,
}

impl IngressFilter {
    #[must_use]
    pub fn by_id(ingress_id: impl Into<String>) -> Self {
        Self {
            ingress_id: Some(ingress_id.into()),
            room_name: None,
        }
    }

    #[must_use]
    pub fn matches(&self, ingress: &IngressInfo) -> bool {
        self.ingress_id.as_ref().is_none_or(|id| *id == ingress.ingress_id)
            && self.room_name.as_ref().is_none_or(|room| *room == ingress.room_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    /// Seconds an empty room is kept before the server closes it
    pub empty_timeout_secs: u32,
    pub max_participants: u32,
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub name: String,
    pub num_participants: u32,
    pub max_participants: u32,
    pub created_at: DateTime<Utc>,
}

/// Media control plane client
///
/// Unreliable and eventually consistent: callers bound every call with a
/// timeout and re-verify state instead of trusting earlier answers.
/// `delete_ingress` is idempotent and may report `NotFound`; `create_ingress`
/// is not idempotent, so callers serialize it per video.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaControlPlane: Send + Sync {
    async fn create_ingress(&self, request: CreateIngressRequest) -> Result<IngressInfo>;

    async fn list_ingress(&self, filter: IngressFilter) -> Result<Vec<IngressInfo>>;

    async fn delete_ingress(&self, ingress_id: &str) -> Result<()>;

    async fn create_room(&self, request: CreateRoomRequest) -> Result<RoomInfo>;

    async fn list_rooms(&self) -> Result<Vec<RoomInfo>>;

    async fn delete_room(&self, room_name: &str) -> Result<()>;
}
