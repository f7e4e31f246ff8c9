//! Scheduled broadcast and viewing analytics flows
//!
//! Run with: cargo test --test scheduling

mod common;

use chrono::Duration;
use common::Harness;
use vodcast_core::{
    control_plane::IngressStatus,
    models::{IngressState, NewVideo, QualitySummary, StreamingMode},
    service::SessionStart,
    Clock, Config,
};

fn scheduled_show(h: &Harness, starts_in: Duration, runs_for: Duration) -> NewVideo {
    let start = h.clock.now() + starts_in;
    NewVideo {
        title: "Premiere".to_string(),
        source_url: Some("https://cdn.local/premiere.mp4".to_string()),
        streaming_mode: StreamingMode::Scheduled,
        scheduled_start_at: Some(start),
        scheduled_end_at: Some(start + runs_for),
        duration_seconds: Some(1200),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_scheduled_broadcast_prewarms_starts_and_stops() {
    let h = Harness::with_config(Config::default(), IngressStatus::Buffering);
    let video = h
        .register(scheduled_show(&h, Duration::minutes(2), Duration::minutes(30)))
        .await;

    // Inside the 5 minute lead window
    let first = h.services.scheduler.tick().await.unwrap();
    assert_eq!(first.evaluated, 1);
    assert_eq!(first.prewarmed, 1);

    let warm = h.video(&video.id).await;
    assert!(!warm.streaming_active);
    assert_eq!(warm.ingress_state, IngressState::Initializing);
    let ingress_id = warm.ingress_id.clone().unwrap();

    // Already warming, nothing to do before the start
    let idle = h.services.scheduler.tick().await.unwrap();
    assert!(idle.is_idle());
    assert_eq!(h.control_plane.create_calls(), 1);

    h.clock.advance(Duration::minutes(3));
    h.control_plane.set_status(&ingress_id, IngressStatus::Publishing);
    let started = h.services.scheduler.tick().await.unwrap();
    assert_eq!(started.started, 1);

    let live = h.video(&video.id).await;
    assert!(live.streaming_active);
    assert_eq!(live.ingress_id.as_deref(), Some(ingress_id.as_str()));
    assert_eq!(h.control_plane.create_calls(), 1);

    h.clock.advance(Duration::minutes(30));
    let stopped = h.services.scheduler.tick().await.unwrap();
    assert_eq!(stopped.stopped, 1);

    let ended = h.video(&video.id).await;
    assert!(!ended.streaming_active);
    assert_eq!(ended.ingress_state, IngressState::Inactive);
    assert!(h.control_plane.ingress(&ingress_id).is_none());
}

#[tokio::test]
async fn test_prewarmed_ingress_is_torn_down_after_end() {
    let h = Harness::with_config(Config::default(), IngressStatus::Buffering);
    let video = h
        .register(scheduled_show(&h, Duration::minutes(1), Duration::minutes(10)))
        .await;

    h.services.scheduler.tick().await.unwrap();
    assert!(h.video(&video.id).await.ingress_id.is_some());

    // The ingress never publishes; the window passes
    h.clock.advance(Duration::minutes(15));
    let report = h.services.scheduler.tick().await.unwrap();
    assert_eq!(report.stopped, 1);

    let stored = h.video(&video.id).await;
    assert!(stored.ingress_id.is_none());
    assert_eq!(h.control_plane.ingress_count(), 0);
}

#[tokio::test]
async fn test_missed_window_is_skipped() {
    let h = Harness::new();
    let video = h
        .register(scheduled_show(&h, Duration::minutes(10), Duration::minutes(10)))
        .await;

    h.clock.advance(Duration::hours(1));
    let report = h.services.scheduler.tick().await.unwrap();

    assert!(report.is_idle());
    assert_eq!(h.control_plane.create_calls(), 0);
    assert_eq!(h.video(&video.id).await.ingress_state, IngressState::Inactive);
}

#[tokio::test]
async fn test_sessions_feed_video_analytics() {
    let h = Harness::new();
    let video = h.live_broadcast(false).await;
    let tracker = &h.services.session_tracker;

    let mut ids = Vec::new();
    for viewer in ["ann", "ben", "ann"] {
        let session = tracker
            .start_session(
                &video.id,
                SessionStart {
                    viewer_identity: viewer.to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        ids.push(session.id);
    }

    tracker.track_quality_change(&ids[0], "480p", "720p").await.unwrap();
    tracker.track_connection_drop(&ids[1], None).await.unwrap();

    h.clock.advance(Duration::minutes(50));
    tracker.end_session(&ids[0], None).await.unwrap();
    tracker
        .end_session(
            &ids[1],
            Some(QualitySummary {
                average_bitrate: Some(2_500.0),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

    let stored = h.video(&video.id).await;
    assert_eq!(stored.total_views, 3);
    assert_eq!(stored.total_watch_seconds, 6000);
    // 3000s of a 3600s video passes the 80% threshold
    assert!((stored.average_completion_rate - 66.67).abs() < 1e-9);

    let report = h.services.analytics_service.video_analytics(&video.id).await.unwrap();
    assert_eq!(report.total_views, 3);
    assert_eq!(report.unique_viewers, 2);
    assert_eq!(report.average_watch_duration, 3000);
    assert!((report.quality_stats.average_switches - 0.5).abs() < f64::EPSILON);
    assert!((report.quality_stats.average_drops - 0.5).abs() < f64::EPSILON);
    assert_eq!(report.recent_sessions.len(), 3);
    assert_eq!(
        report.recent_sessions.iter().filter(|s| s.duration == "In progress").count(),
        1
    );
    assert_eq!(report.daily_views.iter().map(|b| b.views).sum::<i64>(), 3);
}
