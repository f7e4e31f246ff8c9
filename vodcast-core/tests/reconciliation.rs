//! Reconciliation pass and background job tests
//!
//! Run with: cargo test --test reconciliation

mod common;

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use common::Harness;
use quickcheck::{Arbitrary, Gen, QuickCheck};
use serde_json::json;
use vodcast_core::{
    bootstrap::start_jobs,
    control_plane::{ControlPlaneError, IngressStatus},
    models::{IngressState, NewVideo, StreamingMode, Video},
    repository::VideoRepository,
    service::SessionStart,
    Clock, Config,
};

#[tokio::test]
async fn test_pass_heals_vanished_ingress() {
    let h = Harness::new();
    let video = h.live_broadcast(false).await;
    h.control_plane.remove(video.ingress_id.as_deref().unwrap());

    let report = h.services.reconciler.run_pass().await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.healed, 1);

    let stored = h.video(&video.id).await;
    assert_eq!(stored.ingress_state, IngressState::Inactive);
    assert!(!stored.streaming_active);
    assert!(stored.ingress_id.is_none());

    // Nothing left to check on the next pass
    let next = h.services.reconciler.run_pass().await.unwrap();
    assert_eq!(next.checked, 0);
    assert!(!next.has_changes());
}

#[tokio::test]
async fn test_pass_promotes_buffering_ingress() {
    let h = Harness::with_config(Config::default(), IngressStatus::Buffering);
    let video = h.broadcast(false, false).await;
    let started = h.services.ingress_manager.start_streaming(&video.id).await.unwrap();
    assert_eq!(started.ingress_state, IngressState::Initializing);

    let quiet = h.services.reconciler.run_pass().await.unwrap();
    assert_eq!(quiet.checked, 1);
    assert_eq!(quiet.transitioned, 0);

    h.control_plane
        .set_status(started.ingress_id.as_deref().unwrap(), IngressStatus::Publishing);
    let report = h.services.reconciler.run_pass().await.unwrap();
    assert_eq!(report.transitioned, 1);

    let stored = h.video(&video.id).await;
    assert_eq!(stored.ingress_state, IngressState::Active);
    assert!(stored.streaming_active);
}

#[tokio::test]
async fn test_remote_complete_without_restart_policy() {
    let h = Harness::new();
    let video = h.live_broadcast(false).await;
    let ingress_id = video.ingress_id.clone().unwrap();
    h.control_plane.set_status(&ingress_id, IngressStatus::Complete);

    let report = h.services.reconciler.run_pass().await.unwrap();
    assert_eq!(report.transitioned, 1);

    let stored = h.video(&video.id).await;
    assert_eq!(stored.ingress_state, IngressState::Completed);
    assert!(!stored.streaming_active);
    assert!(stored.ingress_id.is_none());
    assert!(h.control_plane.ingress(&ingress_id).is_none());
    assert_eq!(h.control_plane.create_calls(), 1);
}

#[tokio::test]
async fn test_remote_complete_with_auto_restart_recreates() {
    let h = Harness::new();
    let video = h.live_broadcast(true).await;
    let ingress_id = video.ingress_id.clone().unwrap();
    h.control_plane.set_status(&ingress_id, IngressStatus::Complete);

    h.services.reconciler.run_pass().await.unwrap();

    assert_eq!(h.control_plane.create_calls(), 2);
    let stored = h.video(&video.id).await;
    assert_eq!(stored.ingress_state, IngressState::Active);
    assert_ne!(stored.ingress_id.as_deref(), Some(ingress_id.as_str()));
}

#[tokio::test]
async fn test_remote_error_without_auto_restart_stays_in_error() {
    let h = Harness::new();
    let video = h.live_broadcast(false).await;
    h.control_plane
        .set_status(video.ingress_id.as_deref().unwrap(), IngressStatus::Error);

    h.services.reconciler.run_pass().await.unwrap();
    let after = h.services.reconciler.run_pass().await.unwrap();

    assert_eq!(after.restarted, 0);
    assert_eq!(h.control_plane.create_calls(), 1);
    let stored = h.video(&video.id).await;
    assert_eq!(stored.ingress_state, IngressState::Error);
    assert!(!stored.streaming_active);
}

#[tokio::test]
async fn test_pass_creates_missing_ingress_for_streaming_broadcast() {
    let h = Harness::new();
    let mut video = h.broadcast(false, false).await;
    // Row left streaming without an ingress id
    video.ingress_state = IngressState::Active;
    video.streaming_active = true;
    h.videos.save_streaming_state(&video).await.unwrap();

    let report = h.services.reconciler.run_pass().await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(h.control_plane.create_calls(), 1);

    let stored = h.video(&video.id).await;
    assert_eq!(stored.ingress_state, IngressState::Active);
    assert!(stored.ingress_id.is_some());
    stored.check_invariants().unwrap();
}

#[tokio::test]
async fn test_pass_runs_restart_once_backoff_elapsed() {
    let h = Harness::new();
    let mut video = h.broadcast(true, false).await;
    video.ingress_state = IngressState::Error;
    video.restart_attempts = 1;
    video.next_restart_at = Some(h.clock.now() + ChronoDuration::seconds(5));
    h.videos.save_streaming_state(&video).await.unwrap();

    let early = h.services.reconciler.run_pass().await.unwrap();
    assert_eq!(early.restarted, 0);
    assert_eq!(h.control_plane.create_calls(), 0);

    h.clock.advance(ChronoDuration::seconds(10));
    let due = h.services.reconciler.run_pass().await.unwrap();
    assert_eq!(due.restarted, 1);

    let stored = h.video(&video.id).await;
    assert_eq!(stored.ingress_state, IngressState::Active);
    assert_eq!(stored.restart_attempts, 0);
}

#[tokio::test]
async fn test_pass_restarts_scheduled_broadcast_inside_window() {
    let h = Harness::new();
    let start = h.clock.now() - ChronoDuration::minutes(5);
    let video = h
        .register(NewVideo {
            title: "Matinee".to_string(),
            source_url: Some("https://cdn.local/matinee.mp4".to_string()),
            streaming_mode: StreamingMode::Scheduled,
            auto_restart: true,
            scheduled_start_at: Some(start),
            scheduled_end_at: Some(start + ChronoDuration::hours(1)),
            ..Default::default()
        })
        .await;
    let mut errored = h.video(&video.id).await;
    errored.ingress_state = IngressState::Error;
    errored.restart_attempts = 1;
    errored.next_restart_at = Some(h.clock.now() - ChronoDuration::seconds(1));
    h.videos.save_streaming_state(&errored).await.unwrap();

    let report = h.services.reconciler.run_pass().await.unwrap();
    assert_eq!(report.restarted, 1);
    assert_eq!(h.video(&video.id).await.ingress_state, IngressState::Active);

    // Past the window the scheduler owns teardown; no further restarts
    h.control_plane
        .set_status(h.video(&video.id).await.ingress_id.as_deref().unwrap(), IngressStatus::Error);
    h.clock.advance(ChronoDuration::hours(2));
    h.services.reconciler.run_pass().await.unwrap();
    let after = h.services.reconciler.run_pass().await.unwrap();
    assert_eq!(after.restarted, 0);
    assert_eq!(h.control_plane.create_calls(), 1);
}

#[tokio::test]
async fn test_failed_repair_is_counted_not_fatal() {
    let h = Harness::new();
    let mut broken = h.broadcast(false, false).await;
    broken.ingress_state = IngressState::Active;
    broken.streaming_active = true;
    h.videos.save_streaming_state(&broken).await.unwrap();
    let healthy = h.live_broadcast(false).await;

    h.control_plane
        .fail_next_create(ControlPlaneError::Transport("unreachable".to_string()));
    let report = h.services.reconciler.run_pass().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(h.video(&broken.id).await.ingress_state, IngressState::Error);
    assert_eq!(h.video(&healthy.id).await.ingress_state, IngressState::Active);
}

#[tokio::test]
async fn test_pass_reaps_stale_sessions() {
    let h = Harness::new();
    let video = h.broadcast(false, false).await;
    let session = h
        .services
        .session_tracker
        .start_session(
            &video.id,
            SessionStart {
                viewer_identity: "viewer-1".to_string(),
                viewer_ip: None,
                metadata: Some(json!({ "player": "web" })),
            },
        )
        .await
        .unwrap();

    h.clock.advance(ChronoDuration::minutes(31));
    let report = h.services.reconciler.run_pass().await.unwrap();
    assert_eq!(report.sessions_reaped, 1);

    let reaped = h.services.session_tracker.end_session(&session.id, None).await.unwrap();
    assert!(reaped.ended_at.is_some());
    assert_eq!(reaped.duration_seconds, Some(1860));
    assert_eq!(reaped.quality_switches, 0);
    assert!(reaped.average_quality.is_none());
    assert_eq!(h.video(&video.id).await.total_views, 1);
}

#[tokio::test(start_paused = true)]
async fn test_background_jobs_heal_and_stop() {
    let mut config = Config::default();
    config.reconciler.interval_secs = 5;
    let h = Harness::with_config(config.clone(), IngressStatus::Publishing);
    let video = h.live_broadcast(false).await;
    h.control_plane.remove(video.ingress_id.as_deref().unwrap());

    let jobs = start_jobs(&h.services, &config);
    assert_eq!(jobs.handles.len(), 2);

    let mut healed = false;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if h.video(&video.id).await.ingress_id.is_none() {
            healed = true;
            break;
        }
    }
    assert!(healed);

    jobs.shutdown().await;
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Start,
    Stop,
    Ensure,
    Create,
    Health,
    Remote(IngressStatus),
    Vanish,
    FailNextCreate,
    Completed,
    Errored,
    Restart,
    Reconcile,
}

impl Arbitrary for Op {
    fn arbitrary(g: &mut Gen) -> Self {
        *g.choose(&[
            Op::Start,
            Op::Stop,
            Op::Ensure,
            Op::Create,
            Op::Health,
            Op::Remote(IngressStatus::Buffering),
            Op::Remote(IngressStatus::Publishing),
            Op::Remote(IngressStatus::Inactive),
            Op::Remote(IngressStatus::Complete),
            Op::Remote(IngressStatus::Error),
            Op::Vanish,
            Op::FailNextCreate,
            Op::Completed,
            Op::Errored,
            Op::Restart,
            Op::Reconcile,
        ])
        .unwrap()
    }
}

async fn run_op(h: &Harness, video: &Video, op: Op) {
    let manager = &h.services.ingress_manager;
    let current = h.video(&video.id).await.ingress_id;

    // Operation errors are expected along the way; only the stored state matters
    match op {
        Op::Start => {
            let _ = manager.start_streaming(&video.id).await;
        }
        Op::Stop => {
            let _ = manager.stop_streaming(&video.id).await;
        }
        Op::Ensure => {
            let _ = manager.ensure_broadcast_ingress(&video.id).await;
        }
        Op::Create => {
            let _ = manager.create_broadcast_ingress(&video.id).await;
        }
        Op::Health => {
            let _ = manager.check_ingress_health(&video.id).await;
        }
        Op::Remote(status) => {
            if let Some(id) = current {
                h.control_plane.set_status(&id, status);
            }
        }
        Op::Vanish => {
            if let Some(id) = current {
                h.control_plane.remove(&id);
            }
        }
        Op::FailNextCreate => h
            .control_plane
            .fail_next_create(ControlPlaneError::Api("injected".to_string())),
        Op::Completed => {
            let _ = manager.handle_ingress_completed(&video.id).await;
        }
        Op::Errored => {
            let _ = manager.handle_ingress_error(&video.id).await;
        }
        Op::Restart => {
            let _ = manager.restart_ingress(&video.id).await;
        }
        Op::Reconcile => {
            let _ = h.services.reconciler.run_pass().await;
        }
    }
}

fn prop_manager_keeps_invariants(ops: Vec<Op>, auto_restart: bool, loop_video: bool) -> bool {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();

    runtime.block_on(async move {
        let h = Harness::new();
        let video = h.broadcast(auto_restart, loop_video).await;

        for op in ops {
            run_op(&h, &video, op).await;
            let stored = h.video(&video.id).await;
            if let Err(violation) = stored.check_invariants() {
                eprintln!("{op:?} broke an invariant: {violation}");
                return false;
            }
            if stored.streaming_active && stored.ingress_state != IngressState::Active {
                return false;
            }
        }
        true
    })
}

#[test]
fn test_random_operation_sequences_keep_invariants() {
    QuickCheck::new()
        .tests(64)
        .quickcheck(prop_manager_keeps_invariants as fn(Vec<Op>, bool, bool) -> bool);
}
