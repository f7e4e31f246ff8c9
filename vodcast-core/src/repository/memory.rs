//! In-memory repositories for tests and local development

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};

use super::{VideoRepository, ViewingSessionRepository};
use crate::{
    models::{
        BucketCount, SessionAggregate, SessionId, StreamingMode, TimeBucket, Video, VideoAnalytics,
        VideoId, ViewingSession,
    },
    Error, Result,
};

#[derive(Default)]
pub struct MemoryVideoRepository {
    videos: DashMap<VideoId, Video>,
}

impl MemoryVideoRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_video<T>(&self, id: &VideoId, f: impl FnOnce(&mut Video) -> T) -> Result<T> {
        self.videos
            .get_mut(id)
            .map(|mut video| f(video.value_mut()))
            .ok_or_else(|| Error::NotFound(format!("Video {id} not found")))
    }
}

#[async_trait]
impl VideoRepository for MemoryVideoRepository {
    async fn create(&self, video: &Video) -> Result<Video> {
        if self.videos.iter().any(|v| v.room_name == video.room_name) {
            return Err(Error::AlreadyExists("Room name already taken".to_string()));
        }
        match self.videos.entry(video.id.clone()) {
            Entry::Occupied(_) => Err(Error::AlreadyExists("Resource already exists".to_string())),
            Entry::Vacant(slot) => {
                slot.insert(video.clone());
                Ok(video.clone())
            }
        }
    }

    async fn get(&self, id: &VideoId) -> Result<Option<Video>> {
        Ok(self.videos.get(id).map(|v| v.value().clone()))
    }

    async fn list_by_mode(&self, mode: StreamingMode) -> Result<Vec<Video>> {
        let mut videos: Vec<Video> = self
            .videos
            .iter()
            .filter(|v| v.streaming_mode == mode)
            .map(|v| v.value().clone())
            .collect();
        videos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(videos)
    }

    async fn list_with_live_ingress(&self) -> Result<Vec<Video>> {
        let mut videos: Vec<Video> = self
            .videos
            .iter()
            .filter(|v| v.uses_ingress() && v.has_live_ingress())
            .map(|v| v.value().clone())
            .collect();
        videos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(videos)
    }

    async fn update_settings(&self, video: &Video) -> Result<()> {
        self.with_video(&video.id, |stored| {
            stored.streaming_mode = video.streaming_mode;
            stored.auto_restart = video.auto_restart;
            stored.loop_video = video.loop_video;
            stored.scheduled_start_at = video.scheduled_start_at;
            stored.scheduled_end_at = video.scheduled_end_at;
            stored.updated_at = video.updated_at;
        })
    }

    async fn save_streaming_state(&self, video: &Video) -> Result<()> {
        self.with_video(&video.id, |stored| {
            stored.ingress_state = video.ingress_state;
            stored.streaming_active = video.streaming_active;
            stored.ingress_id.clone_from(&video.ingress_id);
            stored.ingress_url.clone_from(&video.ingress_url);
            stored.restart_attempts = video.restart_attempts;
            stored.next_restart_at = video.next_restart_at;
            stored.updated_at = video.updated_at;
        })
    }

    async fn save_analytics(&self, id: &VideoId, analytics: &VideoAnalytics) -> Result<()> {
        self.with_video(id, |stored| {
            stored.total_views = analytics.total_views;
            stored.total_watch_seconds = analytics.total_watch_seconds;
            stored.average_completion_rate = analytics.average_completion_rate;
        })
    }

    async fn delete(&self, id: &VideoId) -> Result<bool> {
        Ok(self.videos.remove(id).is_some())
    }
}

#[derive(Default)]
pub struct MemoryViewingSessionRepository {
    sessions: DashMap<SessionId, ViewingSession>,
}

impl MemoryViewingSessionRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn for_video(&self, video_id: &VideoId) -> Vec<ViewingSession> {
        self.sessions
            .iter()
            .filter(|s| s.video_id == *video_id)
            .map(|s| s.value().clone())
            .collect()
    }
}

fn average(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0u32), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / f64::from(count)
    }
}

#[async_trait]
impl ViewingSessionRepository for MemoryViewingSessionRepository {
    async fn create(&self, session: &ViewingSession) -> Result<ViewingSession> {
        match self.sessions.entry(session.id.clone()) {
            Entry::Occupied(_) => Err(Error::AlreadyExists("Resource already exists".to_string())),
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
                Ok(session.clone())
            }
        }
    }

    async fn get(&self, id: &SessionId) -> Result<Option<ViewingSession>> {
        Ok(self.sessions.get(id).map(|s| s.value().clone()))
    }

    async fn find_open(&self, video_id: &VideoId, viewer_identity: &str) -> Result<Option<ViewingSession>> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| s.video_id == *video_id && s.viewer_identity == viewer_identity && s.is_open())
            .max_by_key(|s| s.started_at)
            .map(|s| s.value().clone()))
    }

    async fn update(&self, session: &ViewingSession) -> Result<()> {
        match self.sessions.get_mut(&session.id) {
            Some(mut stored) => {
                *stored = session.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("Session {} not found", session.id))),
        }
    }

    async fn list_stale_open(&self, before: DateTime<Utc>) -> Result<Vec<ViewingSession>> {
        let mut stale: Vec<ViewingSession> = self
            .sessions
            .iter()
            .filter(|s| s.is_open() && s.updated_at < before)
            .map(|s| s.value().clone())
            .collect();
        stale.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(stale)
    }

    async fn list_recent(&self, video_id: &VideoId, limit: i64) -> Result<Vec<ViewingSession>> {
        let mut sessions = self.for_video(video_id);
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        sessions.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(sessions)
    }

    async fn aggregate(
        &self,
        video_id: &VideoId,
        completion_threshold_secs: Option<f64>,
    ) -> Result<SessionAggregate> {
        let sessions = self.for_video(video_id);
        let closed: Vec<&ViewingSession> = sessions.iter().filter(|s| !s.is_open()).collect();
        let viewers: HashSet<&str> = sessions.iter().map(|s| s.viewer_identity.as_str()).collect();

        let completed_sessions = completion_threshold_secs.map_or(0, |threshold| {
            sessions
                .iter()
                .filter(|s| s.duration_seconds.is_some_and(|d| d as f64 > threshold))
                .count()
        });

        Ok(SessionAggregate {
            total_sessions: sessions.len() as i64,
            unique_viewers: viewers.len() as i64,
            closed_sessions: closed.len() as i64,
            total_watch_seconds: closed.iter().filter_map(|s| s.duration_seconds).sum(),
            completed_sessions: completed_sessions as i64,
            avg_watch_seconds: average(closed.iter().filter_map(|s| s.duration_seconds).map(|d| d as f64)),
            avg_quality_switches: average(closed.iter().map(|s| f64::from(s.quality_switches))),
            avg_buffering_events: average(closed.iter().map(|s| f64::from(s.buffering_events))),
            avg_connection_drops: average(closed.iter().map(|s| f64::from(s.connection_drops))),
        })
    }

    async fn views_by_bucket(
        &self,
        video_id: &VideoId,
        bucket: TimeBucket,
        since: DateTime<Utc>,
    ) -> Result<Vec<BucketCount>> {
        let mut counts: BTreeMap<DateTime<Utc>, i64> = BTreeMap::new();
        for session in self.for_video(video_id) {
            if session.started_at >= since {
                *counts.entry(bucket.truncate(session.started_at)).or_insert(0) += 1;
            }
        }
        Ok(counts
            .into_iter()
            .map(|(bucket, views)| BucketCount { bucket, views })
            .collect())
    }

    async fn delete_for_video(&self, video_id: &VideoId) -> Result<u64> {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.video_id != *video_id);
        Ok((before - self.sessions.len()) as u64)
    }
}
