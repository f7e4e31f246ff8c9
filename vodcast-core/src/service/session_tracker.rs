//! Viewing session tracking
//!
//! Every telemetry call is one read-modify-write under the per-session lock.
//! Opening or closing a session recomputes the video's stored counters from
//! scratch.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    config::AnalyticsConfig,
    models::{QualitySummary, SessionId, Video, VideoAnalytics, VideoId, ViewingSession},
    repository::{VideoRepository, ViewingSessionRepository},
    service::entity_lock::EntityLocks,
    Error, Result,
};

/// Viewer-side input for a new session
#[derive(Debug, Clone, Default)]
pub struct SessionStart {
    pub viewer_identity: String,
    pub viewer_ip: Option<String>,
    pub metadata: Option<JsonValue>,
}

#[derive(Clone)]
pub struct SessionTracker {
    sessions: Arc<dyn ViewingSessionRepository>,
    videos: Arc<dyn VideoRepository>,
    locks: Arc<EntityLocks<SessionId>>,
    clock: Arc<dyn Clock>,
    completion_threshold: f64,
    stale_after: chrono::Duration,
}

impl SessionTracker {
    pub fn new(
        sessions: Arc<dyn ViewingSessionRepository>,
        videos: Arc<dyn VideoRepository>,
        clock: Arc<dyn Clock>,
        analytics: &AnalyticsConfig,
        lock_timeout: Duration,
        stale_after: chrono::Duration,
    ) -> Self {
        Self {
            sessions,
            videos,
            locks: Arc::new(EntityLocks::new("session", lock_timeout)),
            clock,
            completion_threshold: analytics.completion_threshold,
            stale_after,
        }
    }

    #[must_use]
    pub fn locks(&self) -> &Arc<EntityLocks<SessionId>> {
        &self.locks
    }

    async fn load_video(&self, id: &VideoId) -> Result<Video> {
        self.videos
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Video {id} not found")))
    }

    async fn load(&self, id: &SessionId) -> Result<ViewingSession> {
        self.sessions
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Session {id} not found")))
    }

    pub async fn start_session(&self, video_id: &VideoId, start: SessionStart) -> Result<ViewingSession> {
        let viewer_identity = start.viewer_identity.trim();
        if viewer_identity.is_empty() {
            return Err(Error::InvalidInput("Viewer identity cannot be empty".to_string()));
        }
        let video = self.load_video(video_id).await?;

        let session = ViewingSession::new(
            video.id,
            Some(video.room_name),
            viewer_identity.to_string(),
            start.viewer_ip,
            start.metadata.unwrap_or_else(|| JsonValue::Object(Default::default())),
            self.clock.now(),
        );
        let session = self.sessions.create(&session).await?;

        info!(
            session_id = %session.id,
            video_id = %session.video_id,
            viewer = %session.viewer_identity,
            "Viewing session started"
        );
        if let Err(e) = self.recompute_video_analytics(&session.video_id).await {
            warn!(video_id = %session.video_id, error = %e, "Failed to recompute video analytics");
        }
        Ok(session)
    }

    /// Reuse the viewer's open session on this video, or start a new one
    ///
    /// Not atomic: two concurrent calls for the same viewer may both start.
    pub async fn find_or_start_session(&self, video_id: &VideoId, start: SessionStart) -> Result<ViewingSession> {
        if let Some(open) = self
            .sessions
            .find_open(video_id, start.viewer_identity.trim())
            .await?
        {
            debug!(session_id = %open.id, video_id = %video_id, "Reusing open viewing session");
            return Ok(open);
        }
        self.start_session(video_id, start).await
    }

    /// Close a session; closing it again returns it unchanged
    pub async fn end_session(&self, id: &SessionId, summary: Option<QualitySummary>) -> Result<ViewingSession> {
        let session = {
            let _guard = self.locks.acquire(id).await?;
            let mut session = self.load(id).await?;
            if !session.end(self.clock.now(), summary) {
                debug!(session_id = %id, "Viewing session already ended");
                return Ok(session);
            }
            self.sessions.update(&session).await?;
            session
        };

        info!(
            session_id = %id,
            video_id = %session.video_id,
            duration_seconds = ?session.duration_seconds,
            "Viewing session ended"
        );
        self.recompute_video_analytics(&session.video_id).await?;
        Ok(session)
    }

    pub async fn track_quality_change(
        &self,
        id: &SessionId,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Result<ViewingSession> {
        let (from, to) = (from.into(), to.into());
        self.modify_open(id, |session, now| session.record_quality_change(from, to, now))
            .await
    }

    pub async fn track_buffering(&self, id: &SessionId, duration_ms: Option<u64>) -> Result<ViewingSession> {
        self.modify_open(id, |session, now| session.record_buffering(duration_ms, now))
            .await
    }

    pub async fn track_connection_drop(&self, id: &SessionId, reason: Option<String>) -> Result<ViewingSession> {
        self.modify_open(id, |session, now| session.record_connection_drop(reason, now))
            .await
    }

    async fn modify_open<F>(&self, id: &SessionId, f: F) -> Result<ViewingSession>
    where
        F: FnOnce(&mut ViewingSession, chrono::DateTime<chrono::Utc>) + Send,
    {
        let _guard = self.locks.acquire(id).await?;
        let mut session = self.load(id).await?;
        if !session.is_open() {
            return Err(Error::InvalidState(format!("Session {id} has already ended")));
        }
        f(&mut session, self.clock.now());
        self.sessions.update(&session).await?;
        Ok(session)
    }

    /// Force-end open sessions with no activity within the stale threshold
    ///
    /// Reaped sessions get no quality summary. Returns how many were closed.
    pub async fn reap_stale_sessions(&self) -> Result<usize> {
        let cutoff = self.clock.now() - self.stale_after;
        let stale = self.sessions.list_stale_open(cutoff).await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let mut reaped = 0;
        let mut touched = BTreeSet::new();
        for candidate in stale {
            match self.reap_one(&candidate.id, cutoff).await {
                Ok(true) => {
                    reaped += 1;
                    touched.insert(candidate.video_id);
                }
                Ok(false) => {}
                Err(e) => warn!(session_id = %candidate.id, error = %e, "Failed to reap viewing session"),
            }
        }

        for video_id in &touched {
            if let Err(e) = self.recompute_video_analytics(video_id).await {
                warn!(video_id = %video_id, error = %e, "Failed to recompute video analytics");
            }
        }

        if reaped > 0 {
            info!(reaped, "Reaped stale viewing sessions");
        }
        Ok(reaped)
    }

    async fn reap_one(&self, id: &SessionId, cutoff: chrono::DateTime<chrono::Utc>) -> Result<bool> {
        let _guard = self.locks.acquire(id).await?;
        let mut session = self.load(id).await?;
        // Telemetry may have arrived since the listing
        if session.updated_at >= cutoff || !session.end(self.clock.now(), None) {
            return Ok(false);
        }
        self.sessions.update(&session).await?;
        debug!(session_id = %id, video_id = %session.video_id, "Viewing session reaped");
        Ok(true)
    }

    /// Re-derive the video's stored counters from all of its sessions
    pub async fn recompute_video_analytics(&self, video_id: &VideoId) -> Result<VideoAnalytics> {
        let video = self.load_video(video_id).await?;
        let threshold = video
            .duration_seconds
            .map(|secs| secs as f64 * self.completion_threshold);

        let aggregate = self.sessions.aggregate(video_id, threshold).await?;
        let analytics = VideoAnalytics::from_aggregate(&aggregate, video.duration_seconds);
        self.videos.save_analytics(video_id, &analytics).await?;

        debug!(
            video_id = %video_id,
            total_views = analytics.total_views,
            total_watch_seconds = analytics.total_watch_seconds,
            "Video analytics recomputed"
        );
        Ok(analytics)
    }
}
