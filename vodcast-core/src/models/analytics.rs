use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::VideoId;
use super::viewing_session::round2;

/// Aggregates computed by the store over one video's sessions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionAggregate {
    /// All sessions, open or closed
    pub total_sessions: i64,
    pub unique_viewers: i64,
    pub closed_sessions: i64,
    /// Sum of closed-session durations
    pub total_watch_seconds: i64,
    /// Sessions longer than the completion threshold (0 when no threshold)
    pub completed_sessions: i64,
    /// Averages over closed sessions
    pub avg_watch_seconds: f64,
    pub avg_quality_switches: f64,
    pub avg_buffering_events: f64,
    pub avg_connection_drops: f64,
}

/// Aggregate counters stored on the video record
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoAnalytics {
    pub total_views: i64,
    pub total_watch_seconds: i64,
    pub average_completion_rate: f64,
}

impl VideoAnalytics {
    /// Project the session aggregate onto the video's counters
    pub fn from_aggregate(aggregate: &SessionAggregate, video_duration_seconds: Option<i64>) -> Self {
        let average_completion_rate = match video_duration_seconds {
            Some(_) if aggregate.total_sessions > 0 => round2(
                aggregate.completed_sessions as f64 / aggregate.total_sessions as f64 * 100.0,
            ),
            _ => 0.0,
        };

        Self {
            total_views: aggregate.total_sessions,
            total_watch_seconds: aggregate.total_watch_seconds,
            average_completion_rate,
        }
    }
}

/// Granularity of `views_by_bucket`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeBucket {
    Hour,
    Day,
}

impl TimeBucket {
    /// Unit name understood by PostgreSQL `date_trunc`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }

    /// Truncate a timestamp to the start of its bucket
    pub fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        use chrono::{Timelike, TimeZone};

        let (h, date) = (ts.hour(), ts.date_naive());
        let hour = match self {
            Self::Hour => h,
            Self::Day => 0,
        };
        date.and_hms_opt(hour, 0, 0)
            .map_or(ts, |naive| Utc.from_utc_datetime(&naive))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCount {
    pub bucket: DateTime<Utc>,
    pub views: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityStats {
    pub average_switches: f64,
    pub average_buffering: f64,
    pub average_drops: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentSession {
    pub viewer: String,
    pub started_at: DateTime<Utc>,
    pub duration: String,
    pub watch_percentage: f64,
    pub quality_switches: i32,
    pub buffering_events: i32,
}

/// Read-side analytics for one video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoAnalyticsReport {
    pub video_id: VideoId,
    pub title: String,
    pub total_views: i64,
    pub unique_viewers: i64,
    pub total_watch_time: i64,
    /// Whole seconds, closed sessions only
    pub average_watch_duration: i64,
    pub completion_rate: f64,
    pub quality_stats: QualityStats,
    pub recent_sessions: Vec<RecentSession>,
    pub hourly_views: Vec<BucketCount>,
    pub daily_views: Vec<BucketCount>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_completion_rate_projection() {
        let aggregate = SessionAggregate {
            total_sessions: 3,
            completed_sessions: 1,
            total_watch_seconds: 500,
            ..Default::default()
        };

        let analytics = VideoAnalytics::from_aggregate(&aggregate, Some(300));
        assert_eq!(analytics.total_views, 3);
        assert_eq!(analytics.total_watch_seconds, 500);
        assert_eq!(analytics.average_completion_rate, 33.33);

        // Unknown duration or no sessions
        assert_eq!(VideoAnalytics::from_aggregate(&aggregate, None).average_completion_rate, 0.0);
        assert_eq!(
            VideoAnalytics::from_aggregate(&SessionAggregate::default(), Some(300)).average_completion_rate,
            0.0
        );
    }

    #[test]
    fn test_bucket_truncate() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 17, 13, 42, 7).unwrap();
        assert_eq!(TimeBucket::Hour.truncate(ts), Utc.with_ymd_and_hms(2024, 5, 17, 13, 0, 0).unwrap());
        assert_eq!(TimeBucket::Day.truncate(ts), Utc.with_ymd_and_hms(2024, 5, 17, 0, 0, 0).unwrap());
    }
}
