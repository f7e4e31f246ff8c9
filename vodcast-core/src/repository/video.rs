use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};

use super::VideoRepository;
use crate::{
    models::{IngressState, StreamingMode, Video, VideoAnalytics, VideoId},
    Error, Result,
};

const VIDEO_COLUMNS: &str = "id, title, room_name, source_url, streaming_mode, ingress_state, streaming_active,
    ingress_id, ingress_url, auto_restart, loop_video, restart_attempts, next_restart_at,
    scheduled_start_at, scheduled_end_at, total_views, total_watch_seconds, average_completion_rate,
    duration_seconds, created_at, updated_at";

/// Video repository backed by PostgreSQL
#[derive(Clone)]
pub struct PgVideoRepository {
    pool: PgPool,
}

impl PgVideoRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_video(row: &PgRow) -> Result<Video> {
        let streaming_mode: String = row.try_get("streaming_mode")?;
        let ingress_state: String = row.try_get("ingress_state")?;
        let restart_attempts: i32 = row.try_get("restart_attempts")?;

        Ok(Video {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            room_name: row.try_get("room_name")?,
            source_url: row.try_get("source_url")?,
            streaming_mode: streaming_mode.parse().map_err(Error::Internal)?,
            ingress_state: ingress_state.parse().map_err(Error::Internal)?,
            streaming_active: row.try_get("streaming_active")?,
            ingress_id: row.try_get("ingress_id")?,
            ingress_url: row.try_get("ingress_url")?,
            auto_restart: row.try_get("auto_restart")?,
            loop_video: row.try_get("loop_video")?,
            restart_attempts: u32::try_from(restart_attempts).unwrap_or(0),
            next_restart_at: row.try_get("next_restart_at")?,
            scheduled_start_at: row.try_get("scheduled_start_at")?,
            scheduled_end_at: row.try_get("scheduled_end_at")?,
            total_views: row.try_get("total_views")?,
            total_watch_seconds: row.try_get("total_watch_seconds")?,
            average_completion_rate: row.try_get("average_completion_rate")?,
            duration_seconds: row.try_get("duration_seconds")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn ensure_updated(rows_affected: u64, id: &VideoId) -> Result<()> {
        if rows_affected == 0 {
            return Err(Error::NotFound(format!("Video {id} not found")));
        }
        Ok(())
    }
}

fn attempts_to_i32(attempts: u32) -> i32 {
    i32::try_from(attempts).unwrap_or(i32::MAX)
}

#[async_trait]
impl VideoRepository for PgVideoRepository {
    async fn create(&self, video: &Video) -> Result<Video> {
        let query = format!(
            "INSERT INTO videos (id, title, room_name, source_url, streaming_mode, ingress_state, streaming_active,
                ingress_id, ingress_url, auto_restart, loop_video, restart_attempts, next_restart_at,
                scheduled_start_at, scheduled_end_at, total_views, total_watch_seconds, average_completion_rate,
                duration_seconds, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
             RETURNING {VIDEO_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(&video.id)
            .bind(&video.title)
            .bind(&video.room_name)
            .bind(&video.source_url)
            .bind(video.streaming_mode.as_str())
            .bind(video.ingress_state.as_str())
            .bind(video.streaming_active)
            .bind(&video.ingress_id)
            .bind(&video.ingress_url)
            .bind(video.auto_restart)
            .bind(video.loop_video)
            .bind(attempts_to_i32(video.restart_attempts))
            .bind(video.next_restart_at)
            .bind(video.scheduled_start_at)
            .bind(video.scheduled_end_at)
            .bind(video.total_views)
            .bind(video.total_watch_seconds)
            .bind(video.average_completion_rate)
            .bind(video.duration_seconds)
            .bind(video.created_at)
            .bind(video.updated_at)
            .fetch_one(&self.pool)
            .await?;

        Self::row_to_video(&row)
    }

    async fn get(&self, id: &VideoId) -> Result<Option<Video>> {
        let query = format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_video).transpose()
    }

    async fn list_by_mode(&self, mode: StreamingMode) -> Result<Vec<Video>> {
        let query = format!(
            "SELECT {VIDEO_COLUMNS} FROM videos WHERE streaming_mode = $1 ORDER BY created_at"
        );
        let rows = sqlx::query(&query)
            .bind(mode.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_video).collect()
    }

    async fn list_with_live_ingress(&self) -> Result<Vec<Video>> {
        let query = format!(
            "SELECT {VIDEO_COLUMNS} FROM videos
             WHERE streaming_mode <> $1
               AND (streaming_active OR (ingress_id IS NOT NULL AND ingress_state IN ($2, $3, $4)))
             ORDER BY created_at"
        );
        let rows = sqlx::query(&query)
            .bind(StreamingMode::OnDemand.as_str())
            .bind(IngressState::Initializing.as_str())
            .bind(IngressState::Active.as_str())
            .bind(IngressState::Ending.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_video).collect()
    }

    async fn update_settings(&self, video: &Video) -> Result<()> {
        let result = sqlx::query(
            "UPDATE videos
             SET streaming_mode = $2, auto_restart = $3, loop_video = $4,
                 scheduled_start_at = $5, scheduled_end_at = $6, updated_at = $7
             WHERE id = $1",
        )
        .bind(&video.id)
        .bind(video.streaming_mode.as_str())
        .bind(video.auto_restart)
        .bind(video.loop_video)
        .bind(video.scheduled_start_at)
        .bind(video.scheduled_end_at)
        .bind(video.updated_at)
        .execute(&self.pool)
        .await?;

        Self::ensure_updated(result.rows_affected(), &video.id)
    }

    async fn save_streaming_state(&self, video: &Video) -> Result<()> {
        let result = sqlx::query(
            "UPDATE videos
             SET ingress_state = $2, streaming_active = $3, ingress_id = $4, ingress_url = $5,
                 restart_attempts = $6, next_restart_at = $7, updated_at = $8
             WHERE id = $1",
        )
        .bind(&video.id)
        .bind(video.ingress_state.as_str())
        .bind(video.streaming_active)
        .bind(&video.ingress_id)
        .bind(&video.ingress_url)
        .bind(attempts_to_i32(video.restart_attempts))
        .bind(video.next_restart_at)
        .bind(video.updated_at)
        .execute(&self.pool)
        .await?;

        Self::ensure_updated(result.rows_affected(), &video.id)
    }

    async fn save_analytics(&self, id: &VideoId, analytics: &VideoAnalytics) -> Result<()> {
        let result = sqlx::query(
            "UPDATE videos
             SET total_views = $2, total_watch_seconds = $3, average_completion_rate = $4
             WHERE id = $1",
        )
        .bind(id)
        .bind(analytics.total_views)
        .bind(analytics.total_watch_seconds)
        .bind(analytics.average_completion_rate)
        .execute(&self.pool)
        .await?;

        Self::ensure_updated(result.rows_affected(), id)
    }

    async fn delete(&self, id: &VideoId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM videos WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
