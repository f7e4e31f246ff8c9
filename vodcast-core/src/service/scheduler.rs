//! Scheduled broadcasts
//!
//! Each tick evaluates three independent checks per scheduled video: pre-warm
//! the ingress shortly before the start, start inside the window, stop once
//! the end has passed. A window that was missed entirely is skipped.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ingress::IngressManager;
use crate::{
    config::SchedulerConfig,
    models::{StreamingMode, Video, VideoId},
    Result,
};

/// What a tick should do for one video
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleActions {
    pub prewarm: bool,
    pub start: bool,
    pub stop: bool,
}

impl ScheduleActions {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !(self.prewarm || self.start || self.stop)
    }
}

/// Evaluate the schedule checks for `video` at `now`
#[must_use]
pub fn plan(video: &Video, now: DateTime<Utc>, lead_time: chrono::Duration) -> ScheduleActions {
    let Some(start) = video.scheduled_start_at else {
        return ScheduleActions::default();
    };
    if video.streaming_mode != StreamingMode::Scheduled {
        return ScheduleActions::default();
    }
    let end = video.scheduled_end_at;
    // A pre-warmed ingress that never went live still has to be torn down
    let streaming = video.streaming_active || video.has_live_ingress();

    ScheduleActions {
        prewarm: now >= start - lead_time && now < start && !video.has_live_ingress(),
        start: now >= start && end.is_none_or(|end| now < end) && !video.streaming_active,
        stop: end.is_some_and(|end| now >= end) && streaming,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub evaluated: usize,
    pub prewarmed: usize,
    pub started: usize,
    pub stopped: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl ScheduleReport {
    /// No action was attempted
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.prewarmed + self.started + self.stopped + self.failed + self.timed_out == 0
    }
}

#[derive(Clone)]
pub struct BroadcastScheduler {
    ingress: IngressManager,
    config: SchedulerConfig,
}

impl BroadcastScheduler {
    pub fn new(ingress: IngressManager, config: SchedulerConfig) -> Self {
        Self { ingress, config }
    }

    /// Run one scheduling pass over every scheduled video
    pub async fn tick(&self) -> Result<ScheduleReport> {
        let now = self.ingress.clock().now();
        let lead = self.config.prewarm_lead();
        let videos = self.ingress.videos.list_by_mode(StreamingMode::Scheduled).await?;

        let mut report = ScheduleReport {
            evaluated: videos.len(),
            ..Default::default()
        };

        for video in &videos {
            let actions = plan(video, now, lead);
            if actions.is_empty() {
                continue;
            }
            debug!(video_id = %video.id, ?actions, "Schedule actions due");

            let limit = self.config.per_video_timeout();
            match tokio::time::timeout(limit, self.apply(&video.id, actions)).await {
                Ok(Ok(())) => {
                    // Start and pre-warm exclude each other, as do start and stop
                    if actions.stop {
                        report.stopped += 1;
                    } else if actions.start {
                        report.started += 1;
                    } else {
                        report.prewarmed += 1;
                    }
                }
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(video_id = %video.id, error = %e, "Scheduled action failed");
                }
                Err(_) => {
                    report.timed_out += 1;
                    warn!(video_id = %video.id, timeout = ?limit, "Scheduled action timed out");
                }
            }
        }

        Ok(report)
    }

    async fn apply(&self, id: &VideoId, actions: ScheduleActions) -> Result<()> {
        if actions.stop {
            info!(video_id = %id, "Scheduled broadcast ended, stopping");
            self.ingress.stop_streaming(id).await?;
        } else if actions.start {
            info!(video_id = %id, "Scheduled broadcast starting");
            self.ingress.start_streaming(id).await?;
        } else if actions.prewarm {
            info!(video_id = %id, "Pre-warming ingress for scheduled broadcast");
            self.ingress.ensure_broadcast_ingress(id).await?;
        }
        Ok(())
    }

    /// Spawn the periodic scheduler until `shutdown` is cancelled
    #[must_use]
    pub fn start(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let scheduler = self.clone();
        let period = self.config.tick_interval().max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(period = ?period, "Broadcast scheduler started");

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => match scheduler.tick().await {
                        Ok(report) if report.is_idle() => {
                            debug!(evaluated = report.evaluated, "Scheduler tick: nothing due");
                        }
                        Ok(report) => info!(?report, "Scheduler tick complete"),
                        Err(e) => error!(error = %e, "Scheduler tick failed"),
                    },
                }
            }
            info!("Broadcast scheduler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IngressState, NewVideo};
    use chrono::{Duration, TimeZone};

    fn scheduled(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Video {
        Video::new(
            NewVideo {
                title: "Show".to_string(),
                source_url: Some("https://cdn.local/show.mp4".to_string()),
                streaming_mode: StreamingMode::Scheduled,
                scheduled_start_at: Some(start),
                scheduled_end_at: end,
                ..Default::default()
            },
            start - Duration::days(1),
        )
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_prewarm_inside_lead_window_only() {
        let video = scheduled(at(20, 0), Some(at(21, 0)));
        let lead = Duration::minutes(5);

        assert!(plan(&video, at(19, 50), lead).is_empty());
        assert_eq!(
            plan(&video, at(19, 58), lead),
            ScheduleActions { prewarm: true, ..Default::default() }
        );

        let mut warming = video.clone();
        warming.ingress_state = IngressState::Initializing;
        warming.ingress_id = Some("IN_1".to_string());
        assert!(plan(&warming, at(19, 58), lead).is_empty());
    }

    #[test]
    fn test_start_inside_window() {
        let video = scheduled(at(20, 0), Some(at(21, 0)));
        let lead = Duration::minutes(5);

        assert!(plan(&video, at(20, 0), lead).start);
        assert!(plan(&video, at(20, 59), lead).start);

        let mut live = video.clone();
        live.ingress_state = IngressState::Active;
        live.streaming_active = true;
        live.ingress_id = Some("IN_1".to_string());
        assert!(plan(&live, at(20, 30), lead).is_empty());
    }

    #[test]
    fn test_stop_after_end_and_missed_window_is_skipped() {
        let video = scheduled(at(20, 0), Some(at(21, 0)));
        let lead = Duration::minutes(5);

        // Never started: nothing to do once the window has passed
        assert!(plan(&video, at(21, 30), lead).is_empty());

        let mut live = video.clone();
        live.ingress_state = IngressState::Active;
        live.streaming_active = true;
        live.ingress_id = Some("IN_1".to_string());
        assert_eq!(
            plan(&live, at(21, 0), lead),
            ScheduleActions { stop: true, ..Default::default() }
        );

        let mut warmed = video;
        warmed.ingress_state = IngressState::Initializing;
        warmed.ingress_id = Some("IN_2".to_string());
        assert!(plan(&warmed, at(21, 5), lead).stop);
    }

    #[test]
    fn test_open_ended_and_other_modes() {
        let open = scheduled(at(20, 0), None);
        let lead = Duration::minutes(5);
        assert!(plan(&open, at(23, 0), lead).start);
        assert!(!plan(&open, at(23, 0), lead).stop);

        let mut broadcast = open;
        broadcast.streaming_mode = StreamingMode::LiveBroadcast;
        assert!(plan(&broadcast, at(20, 30), lead).is_empty());
    }
}
