pub mod analytics;
pub mod id;
pub mod video;
pub mod viewing_session;

pub use analytics::{
    BucketCount, QualityStats, RecentSession, SessionAggregate, TimeBucket, VideoAnalytics,
    VideoAnalyticsReport,
};
pub use id::{generate_id, SessionId, VideoId};
pub use video::{
    BroadcastSettings, IngressState, IngressTransition, NewVideo, StreamingMode, StreamingState,
    Video,
};
pub use viewing_session::{QualityChange, QualitySummary, ViewingSession, COMPLETED_VIEWING_PERCENT};
