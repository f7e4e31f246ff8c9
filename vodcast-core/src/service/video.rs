//! Video catalog: registration, broadcast settings and decommissioning

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::ingress::IngressManager;
use crate::{
    config::ControlPlaneConfig,
    control_plane::{ControlPlaneError, CreateRoomRequest, MediaControlPlane},
    models::{BroadcastSettings, NewVideo, Video, VideoId},
    repository::{VideoRepository, ViewingSessionRepository},
    resilience::timeout,
    Error, Result,
};

const MAX_TITLE_LENGTH: usize = 255;

#[derive(Clone)]
pub struct VideoService {
    videos: Arc<dyn VideoRepository>,
    sessions: Arc<dyn ViewingSessionRepository>,
    control_plane: Arc<dyn MediaControlPlane>,
    ingress: IngressManager,
    config: ControlPlaneConfig,
}

impl VideoService {
    pub fn new(
        videos: Arc<dyn VideoRepository>,
        sessions: Arc<dyn ViewingSessionRepository>,
        control_plane: Arc<dyn MediaControlPlane>,
        ingress: IngressManager,
        config: ControlPlaneConfig,
    ) -> Self {
        Self {
            videos,
            sessions,
            control_plane,
            ingress,
            config,
        }
    }

    pub async fn get_video(&self, id: &VideoId) -> Result<Video> {
        self.videos
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Video {id} not found")))
    }

    /// Register a video; broadcast modes also get their media room
    pub async fn register_video(&self, mut new: NewVideo) -> Result<Video> {
        new.title = new.title.trim().to_string();
        if new.title.is_empty() {
            return Err(Error::InvalidInput("Title cannot be empty".to_string()));
        }
        if new.title.chars().count() > MAX_TITLE_LENGTH {
            return Err(Error::InvalidInput(format!(
                "Title must be at most {MAX_TITLE_LENGTH} characters"
            )));
        }
        if new.duration_seconds.is_some_and(|d| d < 0) {
            return Err(Error::InvalidInput("Duration cannot be negative".to_string()));
        }

        let settings = BroadcastSettings {
            streaming_mode: new.streaming_mode,
            auto_restart: new.auto_restart,
            loop_video: new.loop_video,
            scheduled_start_at: new.scheduled_start_at,
            scheduled_end_at: new.scheduled_end_at,
        };
        settings
            .validate(new.source_url.as_deref())
            .map_err(Error::InvalidInput)?;

        let video = Video::new(new, self.ingress.clock().now());
        let video = self.videos.create(&video).await?;
        info!(video_id = %video.id, mode = %video.streaming_mode, "Video registered");

        if video.uses_ingress() {
            self.ensure_room(&video).await;
        }
        Ok(video)
    }

    /// Replace mode, restart policy and schedule window
    ///
    /// Moving between on-demand and ingress modes stops streaming first, so
    /// the video restarts from `inactive` under its new mode.
    pub async fn update_broadcast_settings(&self, id: &VideoId, settings: BroadcastSettings) -> Result<Video> {
        let _guard = self.ingress.locks().acquire(id).await?;
        let mut video = self.ingress.load(id).await?;

        settings
            .validate(video.source_url.as_deref())
            .map_err(Error::InvalidInput)?;

        let gains_ingress = settings.streaming_mode.uses_ingress() && !video.uses_ingress();
        if settings.streaming_mode.uses_ingress() != video.uses_ingress() {
            self.ingress.stop_locked(&mut video).await?;
        }

        video.streaming_mode = settings.streaming_mode;
        video.auto_restart = settings.auto_restart;
        video.loop_video = settings.loop_video;
        video.scheduled_start_at = settings.scheduled_start_at;
        video.scheduled_end_at = settings.scheduled_end_at;
        video.updated_at = self.ingress.clock().now();
        self.videos.update_settings(&video).await?;

        info!(video_id = %id, mode = %video.streaming_mode, "Broadcast settings updated");
        if gains_ingress {
            self.ensure_room(&video).await;
        }
        Ok(video)
    }

    /// Tear down streaming and remove the video with its sessions
    pub async fn decommission_video(&self, id: &VideoId) -> Result<()> {
        self.ingress
            .locks()
            .with_lock(id, || self.decommission_locked(id))
            .await
    }

    async fn decommission_locked(&self, id: &VideoId) -> Result<()> {
        let mut video = self.ingress.load(id).await?;
        self.ingress.stop_locked(&mut video).await?;

        let deleted = timeout::bounded(
            self.config.request_timeout(),
            self.control_plane.delete_room(&video.room_name),
        )
        .await;
        match deleted {
            Ok(()) | Err(ControlPlaneError::NotFound(_)) => {}
            Err(e) => warn!(video_id = %id, room = %video.room_name, error = %e, "Failed to delete room"),
        }

        let removed_sessions = self.sessions.delete_for_video(id).await?;
        self.videos.delete(id).await?;
        info!(video_id = %id, removed_sessions, "Video decommissioned");
        Ok(())
    }

    /// Create the video's room unless it already exists; failures are logged
    async fn ensure_room(&self, video: &Video) {
        let limit = self.config.request_timeout();

        match timeout::bounded(limit, self.control_plane.list_rooms()).await {
            Ok(rooms) if rooms.iter().any(|r| r.name == video.room_name) => {
                debug!(video_id = %video.id, room = %video.room_name, "Room already exists");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(video_id = %video.id, error = %e, "Failed to list rooms");
                return;
            }
        }

        let request = CreateRoomRequest {
            name: video.room_name.clone(),
            empty_timeout_secs: self.config.room_empty_timeout_secs,
            max_participants: self.config.room_max_participants,
            metadata: serde_json::to_string(&serde_json::json!({
                "video_id": video.id,
                "title": video.title,
            }))
            .ok(),
        };
        match timeout::bounded(limit, self.control_plane.create_room(request)).await {
            Ok(room) => info!(video_id = %video.id, room = %room.name, "Room created"),
            Err(e) => warn!(video_id = %video.id, room = %video.room_name, error = %e, "Failed to create room"),
        }
    }
}
