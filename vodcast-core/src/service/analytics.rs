//! Read-side analytics for a video

use std::sync::Arc;

use chrono::Duration;

use crate::{
    clock::Clock,
    config::AnalyticsConfig,
    models::{
        viewing_session::round2, QualityStats, RecentSession, TimeBucket, VideoAnalytics,
        VideoAnalyticsReport, VideoId,
    },
    repository::{VideoRepository, ViewingSessionRepository},
    Error, Result,
};

/// Days covered by `daily_views`, today included
const DAILY_WINDOW_DAYS: i64 = 7;

#[derive(Clone)]
pub struct AnalyticsService {
    videos: Arc<dyn VideoRepository>,
    sessions: Arc<dyn ViewingSessionRepository>,
    clock: Arc<dyn Clock>,
    config: AnalyticsConfig,
}

impl AnalyticsService {
    pub fn new(
        videos: Arc<dyn VideoRepository>,
        sessions: Arc<dyn ViewingSessionRepository>,
        clock: Arc<dyn Clock>,
        config: AnalyticsConfig,
    ) -> Self {
        Self {
            videos,
            sessions,
            clock,
            config,
        }
    }

    pub async fn video_analytics(&self, id: &VideoId) -> Result<VideoAnalyticsReport> {
        let video = self
            .videos
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Video {id} not found")))?;

        let threshold = video
            .duration_seconds
            .map(|secs| secs as f64 * self.config.completion_threshold);
        let aggregate = self.sessions.aggregate(id, threshold).await?;
        let totals = VideoAnalytics::from_aggregate(&aggregate, video.duration_seconds);

        let recent_sessions = self
            .sessions
            .list_recent(id, self.config.recent_sessions_limit)
            .await?
            .into_iter()
            .map(|s| RecentSession {
                watch_percentage: s.watch_percentage(video.duration_seconds),
                duration: s.duration_human(),
                viewer: s.viewer_identity,
                started_at: s.started_at,
                quality_switches: s.quality_switches,
                buffering_events: s.buffering_events,
            })
            .collect();

        let today = TimeBucket::Day.truncate(self.clock.now());
        let hourly_views = self.sessions.views_by_bucket(id, TimeBucket::Hour, today).await?;
        let daily_views = self
            .sessions
            .views_by_bucket(id, TimeBucket::Day, today - Duration::days(DAILY_WINDOW_DAYS - 1))
            .await?;

        Ok(VideoAnalyticsReport {
            video_id: video.id,
            title: video.title,
            total_views: totals.total_views,
            unique_viewers: aggregate.unique_viewers,
            total_watch_time: totals.total_watch_seconds,
            average_watch_duration: aggregate.avg_watch_seconds.round() as i64,
            completion_rate: totals.average_completion_rate,
            quality_stats: QualityStats {
                average_switches: round2(aggregate.avg_quality_switches),
                average_buffering: round2(aggregate.avg_buffering_events),
                average_drops: round2(aggregate.avg_connection_drops),
            },
            recent_sessions,
            hourly_views,
            daily_views,
        })
    }
}
