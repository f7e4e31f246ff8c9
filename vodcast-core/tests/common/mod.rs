//! Shared harness: in-memory stores, in-memory control plane, manual clock

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use vodcast_core::{
    bootstrap::{build_services, Services},
    control_plane::{InMemoryControlPlane, IngressStatus},
    models::{NewVideo, StreamingMode, Video, VideoId},
    repository::{
        MemoryVideoRepository, MemoryViewingSessionRepository, VideoRepository,
    },
    Config, ManualClock,
};

pub struct Harness {
    pub services: Services,
    pub videos: Arc<MemoryVideoRepository>,
    pub sessions: Arc<MemoryViewingSessionRepository>,
    pub control_plane: Arc<InMemoryControlPlane>,
    pub clock: ManualClock,
    pub config: Config,
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default(), IngressStatus::Publishing)
    }

    pub fn with_config(config: Config, initial_status: IngressStatus) -> Self {
        let videos = Arc::new(MemoryVideoRepository::new());
        let sessions = Arc::new(MemoryViewingSessionRepository::new());
        let control_plane = Arc::new(InMemoryControlPlane::with_initial_status(initial_status));
        let clock = ManualClock::new(epoch());

        let services = build_services(
            videos.clone(),
            sessions.clone(),
            control_plane.clone(),
            Arc::new(clock.clone()),
            &config,
        );

        Self {
            services,
            videos,
            sessions,
            control_plane,
            clock,
            config,
        }
    }

    pub async fn register(&self, new: NewVideo) -> Video {
        self.services.video_service.register_video(new).await.unwrap()
    }

    pub async fn broadcast(&self, auto_restart: bool, loop_video: bool) -> Video {
        self.register(NewVideo {
            title: "Evening broadcast".to_string(),
            source_url: Some("https://cdn.local/evening.mp4".to_string()),
            streaming_mode: StreamingMode::LiveBroadcast,
            auto_restart,
            loop_video,
            duration_seconds: Some(3600),
            ..Default::default()
        })
        .await
    }

    /// Registered and streaming through a publishing ingress
    pub async fn live_broadcast(&self, auto_restart: bool) -> Video {
        let video = self.broadcast(auto_restart, false).await;
        let live = self.services.ingress_manager.start_streaming(&video.id).await.unwrap();
        assert!(live.streaming_active, "expected {live:?} to be streaming");
        live
    }

    pub async fn video(&self, id: &VideoId) -> Video {
        self.videos.get(id).await.unwrap().unwrap()
    }

    /// Poll until `done` holds, letting spawned tasks and timers progress
    pub async fn wait_until(&self, mut done: impl FnMut() -> bool) {
        for _ in 0..1200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(done(), "condition not reached");
    }
}
