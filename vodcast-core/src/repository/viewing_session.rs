use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, types::Json, PgPool, Row};

use super::ViewingSessionRepository;
use crate::{
    models::{
        BucketCount, QualityChange, SessionAggregate, SessionId, TimeBucket, VideoId, ViewingSession,
    },
    Error, Result,
};

const SESSION_COLUMNS: &str = "id, video_id, viewer_identity, viewer_ip, room_name, started_at, ended_at,
    duration_seconds, quality_switches, average_quality, average_bitrate, buffering_events,
    connection_drops, quality_timeline, metadata, created_at, updated_at";

/// Viewing session repository backed by PostgreSQL
#[derive(Clone)]
pub struct PgViewingSessionRepository {
    pool: PgPool,
}

impl PgViewingSessionRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_session(row: &PgRow) -> Result<ViewingSession> {
        let timeline: Json<Vec<QualityChange>> = row.try_get("quality_timeline")?;

        Ok(ViewingSession {
            id: row.try_get("id")?,
            video_id: row.try_get("video_id")?,
            viewer_identity: row.try_get("viewer_identity")?,
            viewer_ip: row.try_get("viewer_ip")?,
            room_name: row.try_get("room_name")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            duration_seconds: row.try_get("duration_seconds")?,
            quality_switches: row.try_get("quality_switches")?,
            average_quality: row.try_get("average_quality")?,
            average_bitrate: row.try_get("average_bitrate")?,
            buffering_events: row.try_get("buffering_events")?,
            connection_drops: row.try_get("connection_drops")?,
            quality_timeline: timeline.0,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ViewingSessionRepository for PgViewingSessionRepository {
    async fn create(&self, session: &ViewingSession) -> Result<ViewingSession> {
        let query = format!(
            "INSERT INTO viewing_sessions (id, video_id, viewer_identity, viewer_ip, room_name, started_at, ended_at,
                duration_seconds, quality_switches, average_quality, average_bitrate, buffering_events,
                connection_drops, quality_timeline, metadata, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
             RETURNING {SESSION_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(&session.id)
            .bind(&session.video_id)
            .bind(&session.viewer_identity)
            .bind(&session.viewer_ip)
            .bind(&session.room_name)
            .bind(session.started_at)
            .bind(session.ended_at)
            .bind(session.duration_seconds)
            .bind(session.quality_switches)
            .bind(&session.average_quality)
            .bind(session.average_bitrate)
            .bind(session.buffering_events)
            .bind(session.connection_drops)
            .bind(Json(&session.quality_timeline))
            .bind(&session.metadata)
            .bind(session.created_at)
            .bind(session.updated_at)
            .fetch_one(&self.pool)
            .await?;

        Self::row_to_session(&row)
    }

    async fn get(&self, id: &SessionId) -> Result<Option<ViewingSession>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM viewing_sessions WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn find_open(&self, video_id: &VideoId, viewer_identity: &str) -> Result<Option<ViewingSession>> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM viewing_sessions
             WHERE video_id = $1 AND viewer_identity = $2 AND ended_at IS NULL
             ORDER BY started_at DESC
             LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(video_id)
            .bind(viewer_identity)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn update(&self, session: &ViewingSession) -> Result<()> {
        let result = sqlx::query(
            "UPDATE viewing_sessions
             SET ended_at = $2, duration_seconds = $3, quality_switches = $4, average_quality = $5,
                 average_bitrate = $6, buffering_events = $7, connection_drops = $8,
                 quality_timeline = $9, metadata = $10, updated_at = $11
             WHERE id = $1",
        )
        .bind(&session.id)
        .bind(session.ended_at)
        .bind(session.duration_seconds)
        .bind(session.quality_switches)
        .bind(&session.average_quality)
        .bind(session.average_bitrate)
        .bind(session.buffering_events)
        .bind(session.connection_drops)
        .bind(Json(&session.quality_timeline))
        .bind(&session.metadata)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Session {} not found", session.id)));
        }
        Ok(())
    }

    async fn list_stale_open(&self, before: DateTime<Utc>) -> Result<Vec<ViewingSession>> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM viewing_sessions
             WHERE ended_at IS NULL AND updated_at < $1
             ORDER BY updated_at"
        );
        let rows = sqlx::query(&query)
            .bind(before)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_session).collect()
    }

    async fn list_recent(&self, video_id: &VideoId, limit: i64) -> Result<Vec<ViewingSession>> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM viewing_sessions
             WHERE video_id = $1
             ORDER BY started_at DESC
             LIMIT $2"
        );
        let rows = sqlx::query(&query)
            .bind(video_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_session).collect()
    }

    async fn aggregate(
        &self,
        video_id: &VideoId,
        completion_threshold_secs: Option<f64>,
    ) -> Result<SessionAggregate> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) AS total_sessions,
                COUNT(DISTINCT viewer_identity) AS unique_viewers,
                COUNT(*) FILTER (WHERE ended_at IS NOT NULL) AS closed_sessions,
                COALESCE(SUM(duration_seconds) FILTER (WHERE ended_at IS NOT NULL), 0)::BIGINT AS total_watch_seconds,
                COUNT(*) FILTER (WHERE $2::DOUBLE PRECISION IS NOT NULL AND duration_seconds > $2) AS completed_sessions,
                COALESCE(AVG(duration_seconds) FILTER (WHERE ended_at IS NOT NULL), 0)::DOUBLE PRECISION AS avg_watch_seconds,
                COALESCE(AVG(quality_switches) FILTER (WHERE ended_at IS NOT NULL), 0)::DOUBLE PRECISION AS avg_quality_switches,
                COALESCE(AVG(buffering_events) FILTER (WHERE ended_at IS NOT NULL), 0)::DOUBLE PRECISION AS avg_buffering_events,
                COALESCE(AVG(connection_drops) FILTER (WHERE ended_at IS NOT NULL), 0)::DOUBLE PRECISION AS avg_connection_drops
             FROM viewing_sessions
             WHERE video_id = $1",
        )
        .bind(video_id)
        .bind(completion_threshold_secs)
        .fetch_one(&self.pool)
        .await?;

        Ok(SessionAggregate {
            total_sessions: row.try_get("total_sessions")?,
            unique_viewers: row.try_get("unique_viewers")?,
            closed_sessions: row.try_get("closed_sessions")?,
            total_watch_seconds: row.try_get("total_watch_seconds")?,
            completed_sessions: row.try_get("completed_sessions")?,
            avg_watch_seconds: row.try_get("avg_watch_seconds")?,
            avg_quality_switches: row.try_get("avg_quality_switches")?,
            avg_buffering_events: row.try_get("avg_buffering_events")?,
            avg_connection_drops: row.try_get("avg_connection_drops")?,
        })
    }

    async fn views_by_bucket(
        &self,
        video_id: &VideoId,
        bucket: TimeBucket,
        since: DateTime<Utc>,
    ) -> Result<Vec<BucketCount>> {
        let rows = sqlx::query(
            "SELECT date_trunc($2, started_at AT TIME ZONE 'UTC') AT TIME ZONE 'UTC' AS bucket,
                    COUNT(*) AS views
             FROM viewing_sessions
             WHERE video_id = $1 AND started_at >= $3
             GROUP BY bucket
             ORDER BY bucket",
        )
        .bind(video_id)
        .bind(bucket.as_str())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<BucketCount> {
                Ok(BucketCount {
                    bucket: row.try_get("bucket")?,
                    views: row.try_get("views")?,
                })
            })
            .collect()
    }

    async fn delete_for_video(&self, video_id: &VideoId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM viewing_sessions WHERE video_id = $1")
            .bind(video_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
