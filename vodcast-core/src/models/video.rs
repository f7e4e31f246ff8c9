use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::id::VideoId;
use crate::control_plane::IngressStatus;

/// How a video reaches its viewers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    /// Served directly from storage, no ingress
    #[default]
    OnDemand,
    /// Pushed into the room through an ingress whenever it should be streaming
    LiveBroadcast,
    /// Pushed into the room through an ingress during a time window
    Scheduled,
}

impl StreamingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnDemand => "on_demand",
            Self::LiveBroadcast => "live_broadcast",
            Self::Scheduled => "scheduled",
        }
    }

    pub fn uses_ingress(&self) -> bool {
        matches!(self, Self::LiveBroadcast | Self::Scheduled)
    }
}

impl FromStr for StreamingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on_demand" => Ok(Self::OnDemand),
            "live_broadcast" => Ok(Self::LiveBroadcast),
            "scheduled" => Ok(Self::Scheduled),
            _ => Err(format!("Unknown streaming mode: {s}")),
        }
    }
}

impl std::fmt::Display for StreamingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local view of the video's ingress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IngressState {
    #[default]
    Inactive,
    Initializing,
    Active,
    /// Reserved; nothing transitions into it
    Ending,
    Completed,
    Error,
}

impl IngressState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Ending => "ending",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// States from which `ensure` provisions a fresh ingress
    pub fn needs_new_ingress(&self) -> bool {
        matches!(self, Self::Inactive | Self::Completed | Self::Error)
    }

    /// States in which a remote ingress is expected to exist
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Initializing | Self::Active | Self::Ending)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl FromStr for IngressState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(Self::Inactive),
            "initializing" => Ok(Self::Initializing),
            "active" => Ok(Self::Active),
            "ending" => Ok(Self::Ending),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown ingress state: {s}")),
        }
    }
}

impl std::fmt::Display for IngressState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every change to a video's streaming fields
///
/// `Video::apply` is the only writer of `ingress_state`, `streaming_active`,
/// `ingress_id`, `ingress_url` and the restart bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressTransition {
    /// On-demand video became directly servable
    ServeDirect,
    /// About to ask the control plane for a new ingress
    Provisioning,
    /// Control plane created an ingress
    Provisioned {
        ingress_id: String,
        url: Option<String>,
        status: IngressStatus,
    },
    /// Remote status read back from the control plane
    Observed(IngressStatus),
    /// Remote ingress no longer exists
    Vanished,
    /// Local reference dropped after a best-effort remote delete
    Released,
    /// Ingress creation failed
    Failed,
    /// Automatic restart booked for `at`
    RestartScheduled { at: DateTime<Utc> },
    /// Explicit stop: back to a clean inactive state
    Reset,
}

/// Streaming fields persisted together by `VideoRepository::save_streaming_state`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingState {
    pub ingress_state: IngressState,
    pub streaming_active: bool,
    pub ingress_id: Option<String>,
    pub ingress_url: Option<String>,
    pub restart_attempts: u32,
    pub next_restart_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: VideoId,
    pub title: String,
    /// Room on the media server, `video-<id>`
    pub room_name: String,
    /// Playable URL an ingress pulls from
    pub source_url: Option<String>,
    pub streaming_mode: StreamingMode,
    pub ingress_state: IngressState,
    pub streaming_active: bool,
    pub ingress_id: Option<String>,
    pub ingress_url: Option<String>,
    pub auto_restart: bool,
    pub loop_video: bool,
    /// Consecutive automatic restarts since the ingress was last active
    pub restart_attempts: u32,
    pub next_restart_at: Option<DateTime<Utc>>,
    pub scheduled_start_at: Option<DateTime<Utc>>,
    pub scheduled_end_at: Option<DateTime<Utc>>,
    pub total_views: i64,
    pub total_watch_seconds: i64,
    pub average_completion_rate: f64,
    pub duration_seconds: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Video {
    pub fn new(new: NewVideo, now: DateTime<Utc>) -> Self {
        let id = VideoId::new();
        Self {
            room_name: id.room_name(),
            id,
            title: new.title,
            source_url: new.source_url,
            streaming_mode: new.streaming_mode,
            ingress_state: IngressState::Inactive,
            streaming_active: false,
            ingress_id: None,
            ingress_url: None,
            auto_restart: new.auto_restart,
            loop_video: new.loop_video,
            restart_attempts: 0,
            next_restart_at: None,
            scheduled_start_at: new.scheduled_start_at,
            scheduled_end_at: new.scheduled_end_at,
            total_views: 0,
            total_watch_seconds: 0,
            average_completion_rate: 0.0,
            duration_seconds: new.duration_seconds,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn uses_ingress(&self) -> bool {
        self.streaming_mode.uses_ingress()
    }

    pub fn has_restart_policy(&self) -> bool {
        self.auto_restart || self.loop_video
    }

    /// `ensure` must provision rather than health-check
    pub fn needs_new_ingress(&self) -> bool {
        self.ingress_state.needs_new_ingress() || self.ingress_id.is_none()
    }

    /// Believed to have a remote ingress worth checking
    pub fn has_live_ingress(&self) -> bool {
        self.streaming_active || (self.ingress_id.is_some() && self.ingress_state.is_live())
    }

    /// Scheduled videos only restart before their window ends
    pub fn restart_window_open(&self, now: DateTime<Utc>) -> bool {
        self.streaming_mode != StreamingMode::Scheduled || self.scheduled_end_at.is_none_or(|end| end > now)
    }

    /// An automatic restart may run now
    pub fn restart_due(&self, now: DateTime<Utc>, max_attempts: u32) -> bool {
        self.uses_ingress()
            && self.has_restart_policy()
            && self.restart_window_open(now)
            && self.ingress_state.is_terminal()
            && self.restart_attempts < max_attempts
            && self.next_restart_at.is_none_or(|at| at <= now)
    }

    pub fn streaming_state(&self) -> StreamingState {
        StreamingState {
            ingress_state: self.ingress_state,
            streaming_active: self.streaming_active,
            ingress_id: self.ingress_id.clone(),
            ingress_url: self.ingress_url.clone(),
            restart_attempts: self.restart_attempts,
            next_restart_at: self.next_restart_at,
        }
    }

    /// Apply a transition; returns whether any streaming field changed
    pub fn apply(&mut self, transition: IngressTransition, now: DateTime<Utc>) -> bool {
        let before = self.streaming_state();

        match transition {
            IngressTransition::ServeDirect => {
                if !self.uses_ingress() {
                    self.streaming_active = true;
                }
            }
            IngressTransition::Provisioning => {
                self.ingress_state = IngressState::Initializing;
                self.streaming_active = false;
                self.next_restart_at = None;
            }
            IngressTransition::Provisioned {
                ingress_id,
                url,
                status,
            } => {
                self.ingress_id = Some(ingress_id);
                self.ingress_url = url;
                if status == IngressStatus::Publishing {
                    self.go_active();
                } else {
                    self.ingress_state = IngressState::Initializing;
                    self.streaming_active = false;
                }
            }
            IngressTransition::Observed(status) => match status {
                IngressStatus::Buffering => {
                    self.ingress_state = IngressState::Initializing;
                    self.streaming_active = false;
                }
                IngressStatus::Publishing => {
                    if self.ingress_id.is_some() {
                        self.go_active();
                    }
                }
                IngressStatus::Inactive => {
                    self.ingress_state = IngressState::Inactive;
                    self.streaming_active = false;
                }
                IngressStatus::Complete => {
                    self.ingress_state = IngressState::Completed;
                    self.streaming_active = false;
                }
                IngressStatus::Error => {
                    self.ingress_state = IngressState::Error;
                    self.streaming_active = false;
                }
            },
            IngressTransition::Vanished => {
                self.ingress_state = IngressState::Inactive;
                self.streaming_active = false;
                self.ingress_id = None;
                self.ingress_url = None;
            }
            IngressTransition::Released => {
                self.ingress_id = None;
                self.ingress_url = None;
                self.streaming_active = false;
                if self.ingress_state.is_live() {
                    self.ingress_state = IngressState::Inactive;
                }
            }
            IngressTransition::Failed => {
                self.ingress_state = IngressState::Error;
                self.streaming_active = false;
            }
            IngressTransition::RestartScheduled { at } => {
                self.restart_attempts = self.restart_attempts.saturating_add(1);
                self.next_restart_at = Some(at);
            }
            IngressTransition::Reset => {
                self.ingress_state = IngressState::Inactive;
                self.streaming_active = false;
                self.ingress_id = None;
                self.ingress_url = None;
                self.restart_attempts = 0;
                self.next_restart_at = None;
            }
        }

        let changed = self.streaming_state() != before;
        if changed {
            self.updated_at = now;
        }
        changed
    }

    fn go_active(&mut self) {
        self.ingress_state = IngressState::Active;
        self.streaming_active = true;
        self.restart_attempts = 0;
        self.next_restart_at = None;
    }

    /// Check the streaming invariants, describing the first violation found
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.uses_ingress() && self.streaming_active && self.ingress_state != IngressState::Active {
            return Err(format!(
                "streaming_active with ingress_state={} for video {}",
                self.ingress_state, self.id
            ));
        }
        if self.uses_ingress() && self.streaming_active && self.ingress_id.is_none() {
            return Err(format!("streaming_active without ingress_id for video {}", self.id));
        }
        if self.ingress_state == IngressState::Active && self.ingress_id.is_none() {
            return Err(format!("active ingress without ingress_id for video {}", self.id));
        }
        Ok(())
    }

    /// Broadcast window is configured
    pub fn has_schedule(&self) -> bool {
        self.streaming_mode == StreamingMode::Scheduled && self.scheduled_start_at.is_some()
    }
}

/// Registration request
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NewVideo {
    pub title: String,
    pub source_url: Option<String>,
    #[serde(default)]
    pub streaming_mode: StreamingMode,
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(default)]
    pub loop_video: bool,
    pub scheduled_start_at: Option<DateTime<Utc>>,
    pub scheduled_end_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
}

/// Full replacement of a video's broadcast settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastSettings {
    pub streaming_mode: StreamingMode,
    pub auto_restart: bool,
    pub loop_video: bool,
    pub scheduled_start_at: Option<DateTime<Utc>>,
    pub scheduled_end_at: Option<DateTime<Utc>>,
}

impl BroadcastSettings {
    pub fn from_video(video: &Video) -> Self {
        Self {
            streaming_mode: video.streaming_mode,
            auto_restart: video.auto_restart,
            loop_video: video.loop_video,
            scheduled_start_at: video.scheduled_start_at,
            scheduled_end_at: video.scheduled_end_at,
        }
    }

    /// Validate settings against the video's playable source
    pub fn validate(&self, source_url: Option<&str>) -> Result<(), String> {
        if let (Some(start), Some(end)) = (self.scheduled_start_at, self.scheduled_end_at) {
            if end <= start {
                return Err("Scheduled end must be after scheduled start".to_string());
            }
        }
        if self.streaming_mode == StreamingMode::Scheduled && self.scheduled_start_at.is_none() {
            return Err("Scheduled streaming requires a start time".to_string());
        }
        if self.streaming_mode.uses_ingress() && source_url.is_none_or(|url| url.trim().is_empty()) {
            return Err(format!(
                "{} streaming requires a playable source URL",
                self.streaming_mode
            ));
        }
        Ok(())
    }
}
