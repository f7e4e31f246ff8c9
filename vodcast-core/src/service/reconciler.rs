//! Periodic convergence of local streaming state with the control plane
//!
//! A pass observes every video believed to be streaming, recreates ingresses
//! that live broadcasts lost, runs restarts whose backoff has elapsed and reaps
//! stale viewing sessions. Failures are counted per video and never abort the
//! pass.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ingress::{IngressManager, ObserveOutcome};
use super::session_tracker::SessionTracker;
use crate::{
    config::ReconcilerConfig,
    models::{StreamingMode, Video, VideoId},
    Result,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Videos whose remote ingress was looked up
    pub checked: usize,
    /// Remote ingress missing, local state reset
    pub healed: usize,
    /// Local state moved to match the remote status
    pub transitioned: usize,
    pub created: usize,
    pub restarted: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub sessions_reaped: usize,
}

impl ReconcileReport {
    fn record(&mut self, outcome: VideoOutcome) {
        match outcome {
            VideoOutcome::Observed(ObserveOutcome::Unchanged) | VideoOutcome::Skipped => {}
            VideoOutcome::Observed(ObserveOutcome::Healed) => self.healed += 1,
            VideoOutcome::Observed(ObserveOutcome::Transitioned) => self.transitioned += 1,
            VideoOutcome::Created => self.created += 1,
            VideoOutcome::Restarted => self.restarted += 1,
            VideoOutcome::Failed => self.failed += 1,
            VideoOutcome::TimedOut => self.timed_out += 1,
        }
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.healed + self.transitioned + self.created + self.restarted + self.sessions_reaped > 0
    }
}

#[derive(Debug, Clone, Copy)]
enum VideoOutcome {
    Observed(ObserveOutcome),
    Created,
    Restarted,
    Skipped,
    Failed,
    TimedOut,
}

#[derive(Clone)]
pub struct IngressReconciler {
    ingress: IngressManager,
    sessions: SessionTracker,
    config: ReconcilerConfig,
}

impl IngressReconciler {
    pub fn new(ingress: IngressManager, sessions: SessionTracker, config: ReconcilerConfig) -> Self {
        Self {
            ingress,
            sessions,
            config,
        }
    }

    /// Run one reconciliation pass
    ///
    /// Only failing to list videos fails the pass.
    pub async fn run_pass(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let streaming = self.ingress.videos.list_with_live_ingress().await?;
        report.checked = streaming.len();
        for outcome in self
            .for_each_video(streaming, |manager, id| async move {
                manager.observe_remote(&id).await.map(VideoOutcome::Observed)
            })
            .await
        {
            report.record(outcome);
        }

        let now = self.ingress.clock().now();
        let mut broadcasts = self
            .ingress
            .videos
            .list_by_mode(StreamingMode::LiveBroadcast)
            .await?;
        broadcasts.extend(self.ingress.videos.list_by_mode(StreamingMode::Scheduled).await?);
        let broadcasts: Vec<Video> = broadcasts
            .into_iter()
            .filter(|video| needs_repair(video, now))
            .collect();
        for outcome in self
            .for_each_video(broadcasts, |manager, id| async move {
                if manager.create_if_missing(&id).await? {
                    return Ok(VideoOutcome::Created);
                }
                if manager.restart_if_due(&id).await? {
                    return Ok(VideoOutcome::Restarted);
                }
                Ok(VideoOutcome::Skipped)
            })
            .await
        {
            report.record(outcome);
        }

        match self.sessions.reap_stale_sessions().await {
            Ok(reaped) => report.sessions_reaped = reaped,
            Err(e) => warn!(error = %e, "Failed to reap stale viewing sessions"),
        }

        let pruned = self.ingress.locks().prune() + self.sessions.locks().prune();
        if pruned > 0 {
            debug!(pruned, "Pruned idle lock entries");
        }

        Ok(report)
    }

    /// Run `work` for each video with bounded concurrency and a per-video
    /// timeout, turning errors into outcomes
    async fn for_each_video<F, Fut>(&self, videos: Vec<Video>, work: F) -> Vec<VideoOutcome>
    where
        F: Fn(IngressManager, VideoId) -> Fut,
        Fut: Future<Output = Result<VideoOutcome>>,
    {
        let limit = self.config.per_video_timeout();
        let work = &work;

        stream::iter(videos)
            .map(|video| async move {
                let id = video.id;
                match tokio::time::timeout(limit, work(self.ingress.clone(), id.clone())).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => {
                        warn!(video_id = %id, error = %e, "Reconciliation failed for video");
                        VideoOutcome::Failed
                    }
                    Err(_) => {
                        warn!(video_id = %id, timeout = ?limit, "Reconciliation timed out for video");
                        VideoOutcome::TimedOut
                    }
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await
    }

    /// Spawn the periodic loop until `shutdown` is cancelled
    #[must_use]
    pub fn start(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let reconciler = self.clone();
        let period = self.config.interval().max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(period = ?period, "Ingress reconciler started");

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => match reconciler.run_pass().await {
                        Ok(report) if report.has_changes() || report.failed + report.timed_out > 0 => {
                            info!(?report, "Reconciliation pass complete");
                        }
                        Ok(report) => debug!(checked = report.checked, "Reconciliation pass: no changes"),
                        Err(e) => error!(error = %e, "Reconciliation pass failed"),
                    },
                }
            }
            info!("Ingress reconciler stopped");
        })
    }
}

/// Broadcasts that lost their ingress or wait on a restart
///
/// Scheduled videos only qualify for restarts while their window is open.
fn needs_repair(video: &Video, now: DateTime<Utc>) -> bool {
    let restartable = video.ingress_state.is_terminal() && video.has_restart_policy();
    match video.streaming_mode {
        StreamingMode::LiveBroadcast => {
            let missing = video.streaming_active && video.ingress_id.is_none();
            missing || restartable
        }
        StreamingMode::Scheduled => restartable && video.restart_window_open(now),
        StreamingMode::OnDemand => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IngressState, NewVideo};
    use chrono::Duration as ChronoDuration;

    fn broadcast() -> Video {
        Video::new(
            NewVideo {
                title: "Radio".to_string(),
                source_url: Some("https://cdn.local/radio.mp3".to_string()),
                streaming_mode: StreamingMode::LiveBroadcast,
                ..Default::default()
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_needs_repair() {
        let now = Utc::now();
        let idle = broadcast();
        assert!(!needs_repair(&idle, now));

        let mut orphaned = broadcast();
        orphaned.streaming_active = true;
        orphaned.ingress_state = IngressState::Active;
        assert!(needs_repair(&orphaned, now));

        let mut errored = broadcast();
        errored.ingress_state = IngressState::Error;
        assert!(!needs_repair(&errored, now));
        errored.auto_restart = true;
        assert!(needs_repair(&errored, now));

        let mut looped = broadcast();
        looped.ingress_state = IngressState::Completed;
        looped.loop_video = true;
        assert!(needs_repair(&looped, now));
    }

    #[test]
    fn test_scheduled_restart_needs_open_window() {
        let now = Utc::now();
        let mut show = broadcast();
        show.streaming_mode = StreamingMode::Scheduled;
        show.auto_restart = true;
        show.ingress_state = IngressState::Error;
        show.scheduled_start_at = Some(now - ChronoDuration::minutes(10));
        show.scheduled_end_at = Some(now + ChronoDuration::minutes(10));
        assert!(needs_repair(&show, now));

        show.scheduled_end_at = Some(now - ChronoDuration::minutes(1));
        assert!(!needs_repair(&show, now));

        let mut on_demand = broadcast();
        on_demand.streaming_mode = StreamingMode::OnDemand;
        on_demand.streaming_active = true;
        assert!(!needs_repair(&on_demand, now));
    }

    #[test]
    fn test_report_records_outcomes() {
        let mut report = ReconcileReport::default();
        report.record(VideoOutcome::Observed(ObserveOutcome::Unchanged));
        assert!(!report.has_changes());

        report.record(VideoOutcome::Observed(ObserveOutcome::Healed));
        report.record(VideoOutcome::Restarted);
        report.record(VideoOutcome::TimedOut);
        assert_eq!(report.healed, 1);
        assert_eq!(report.restarted, 1);
        assert_eq!(report.timed_out, 1);
        assert!(report.has_changes());
    }
}
