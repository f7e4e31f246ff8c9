//! Durable store
//!
//! Services depend on the traits below. `Pg*` implementations back them with
//! PostgreSQL, `Memory*` implementations keep everything in process memory.

pub mod memory;
pub mod video;
pub mod viewing_session;

pub use memory::{MemoryVideoRepository, MemoryViewingSessionRepository};
pub use video::PgVideoRepository;
pub use viewing_session::PgViewingSessionRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    models::{
        BucketCount, SessionAggregate, SessionId, StreamingMode, TimeBucket, Video, VideoAnalytics,
        VideoId, ViewingSession,
    },
    Result,
};

#[async_trait]
pub trait VideoRepository: Send + Sync {
    async fn create(&self, video: &Video) -> Result<Video>;

    async fn get(&self, id: &VideoId) -> Result<Option<Video>>;

    async fn list_by_mode(&self, mode: StreamingMode) -> Result<Vec<Video>>;

    /// Ingress-backed videos that are streaming or hold an ingress in a live state
    async fn list_with_live_ingress(&self) -> Result<Vec<Video>>;

    /// Persist mode, restart policy and schedule window
    async fn update_settings(&self, video: &Video) -> Result<()>;

    /// Atomically persist the streaming fields and `updated_at`
    async fn save_streaming_state(&self, video: &Video) -> Result<()>;

    async fn save_analytics(&self, id: &VideoId, analytics: &VideoAnalytics) -> Result<()>;

    async fn delete(&self, id: &VideoId) -> Result<bool>;
}

#[async_trait]
pub trait ViewingSessionRepository: Send + Sync {
    async fn create(&self, session: &ViewingSession) -> Result<ViewingSession>;

    async fn get(&self, id: &SessionId) -> Result<Option<ViewingSession>>;

    /// Most recent open session of a viewer on a video
    async fn find_open(&self, video_id: &VideoId, viewer_identity: &str) -> Result<Option<ViewingSession>>;

    async fn update(&self, session: &ViewingSession) -> Result<()>;

    /// Open sessions whose last activity is before `before`
    async fn list_stale_open(&self, before: DateTime<Utc>) -> Result<Vec<ViewingSession>>;

    async fn list_recent(&self, video_id: &VideoId, limit: i64) -> Result<Vec<ViewingSession>>;

    /// Aggregate a video's sessions; a session counts as completed when its
    /// duration exceeds `completion_threshold_secs`
    async fn aggregate(
        &self,
        video_id: &VideoId,
        completion_threshold_secs: Option<f64>,
    ) -> Result<SessionAggregate>;

    /// Sessions started since `since`, counted per time bucket in ascending order
    async fn views_by_bucket(
        &self,
        video_id: &VideoId,
        bucket: TimeBucket,
        since: DateTime<Utc>,
    ) -> Result<Vec<BucketCount>>;

    async fn delete_for_video(&self, video_id: &VideoId) -> Result<u64>;
}
