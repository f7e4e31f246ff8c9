//! Completion, error and restart policy
//!
//! Automatic restarts are bounded: each one books `next_restart_at` using the
//! exponential backoff over the persisted attempt counter, and a spawned timer
//! runs it after the delay. A restart re-checks its preconditions under the
//! lock, so the timer and the reconciliation loop cannot both run it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::ingress::{IngressManager, Trigger};
use crate::{
    control_plane::IngressStatus,
    models::{IngressTransition, Video, VideoId},
    Result,
};

/// What `handle_ingress_error` decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOutcome {
    /// No restart policy
    NoRetry,
    /// Restart booked after `delay`
    RetryScheduled { delay: Duration, at: DateTime<Utc> },
    /// Attempt limit reached; stays in `error` until an explicit start/stop
    RetriesExhausted,
}

impl IngressManager {
    /// Remote ingress finished its source
    ///
    /// With `auto_restart` or `loop_video` a new ingress is created right
    /// away; otherwise the remote resource is deleted and the id cleared.
    pub async fn handle_ingress_completed(&self, id: &VideoId) -> Result<Video> {
        let _guard = self.locks.acquire(id).await?;
        let mut video = self.load(id).await?;
        self.completed_locked(&mut video).await?;
        Ok(video)
    }

    pub(super) async fn completed_locked(&self, video: &mut Video) -> Result<()> {
        self.transition(video, IngressTransition::Observed(IngressStatus::Complete))
            .await?;
        info!(video_id = %video.id, ingress_id = ?video.ingress_id, "Ingress completed");

        if video.has_restart_policy() && video.restart_window_open(self.clock.now()) {
            info!(video_id = %video.id, "Restarting ingress after completion");
            return self.restart_locked(video, Trigger::Automatic).await;
        }

        if let Some(ingress_id) = video.ingress_id.clone() {
            self.delete_remote_best_effort(&video.id, &ingress_id).await;
        }
        self.transition(video, IngressTransition::Released).await?;
        Ok(())
    }

    /// Remote ingress failed
    ///
    /// With `auto_restart` a single delayed restart is booked.
    pub async fn handle_ingress_error(&self, id: &VideoId) -> Result<ErrorOutcome> {
        let _guard = self.locks.acquire(id).await?;
        let mut video = self.load(id).await?;
        self.error_locked(&mut video).await
    }

    pub(super) async fn error_locked(&self, video: &mut Video) -> Result<ErrorOutcome> {
        self.transition(video, IngressTransition::Observed(IngressStatus::Error))
            .await?;
        error!(video_id = %video.id, ingress_id = ?video.ingress_id, "Ingress reported an error");

        if !video.auto_restart || !video.restart_window_open(self.clock.now()) {
            return Ok(ErrorOutcome::NoRetry);
        }
        self.schedule_restart_locked(video).await
    }

    /// Replace the video's ingress with a new one
    ///
    /// Creation failures leave the video in `error` and are not returned.
    pub async fn restart_ingress(&self, id: &VideoId) -> Result<Video> {
        let _guard = self.locks.acquire(id).await?;
        let mut video = self.load(id).await?;
        self.restart_locked(&mut video, Trigger::Manual).await?;
        Ok(video)
    }

    /// Run an automatic restart if one is due now
    ///
    /// Returns whether a restart was attempted.
    pub async fn restart_if_due(&self, id: &VideoId) -> Result<bool> {
        let _guard = self.locks.acquire(id).await?;
        let mut video = self.load(id).await?;

        if !video.restart_due(self.clock.now(), self.backoff.max_attempts) {
            return Ok(false);
        }

        info!(
            video_id = %id,
            state = %video.ingress_state,
            attempt = video.restart_attempts + 1,
            "Restarting ingress"
        );
        self.restart_locked(&mut video, Trigger::Automatic).await?;
        Ok(true)
    }

    /// Run the restart booked for `at`, unless something else already moved
    /// the video on
    pub(super) async fn run_scheduled_restart(&self, id: &VideoId, at: DateTime<Utc>) -> Result<bool> {
        let _guard = self.locks.acquire(id).await?;
        let mut video = self.load(id).await?;

        let still_booked = video.ingress_state.is_terminal()
            && video.has_restart_policy()
            && video.restart_window_open(self.clock.now())
            && video.next_restart_at == Some(at);
        if !still_booked {
            debug!(video_id = %id, "Scheduled restart no longer applies");
            return Ok(false);
        }

        info!(video_id = %id, attempt = video.restart_attempts, "Running scheduled ingress restart");
        self.restart_locked(&mut video, Trigger::Automatic).await?;
        Ok(true)
    }

    pub(super) async fn restart_locked(&self, video: &mut Video, trigger: Trigger) -> Result<()> {
        if let Some(old) = video.ingress_id.clone() {
            self.delete_remote_best_effort(&video.id, &old).await;
            self.transition(video, IngressTransition::Released).await?;
        }

        let Err(e) = self.create_locked(video, trigger).await else {
            return Ok(());
        };

        warn!(video_id = %video.id, error = %e, "Ingress restart failed");
        self.transition(video, IngressTransition::Failed).await?;

        if trigger == Trigger::Automatic && video.has_restart_policy() {
            self.schedule_restart_locked(video).await?;
        }
        Ok(())
    }

    async fn schedule_restart_locked(&self, video: &mut Video) -> Result<ErrorOutcome> {
        let Some(delay) = self.backoff.delay_for(video.restart_attempts) else {
            warn!(
                video_id = %video.id,
                attempts = video.restart_attempts,
                "Restart attempts exhausted, leaving ingress in error"
            );
            return Ok(ErrorOutcome::RetriesExhausted);
        };

        let at = self.clock.now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::hours(1));
        self.transition(video, IngressTransition::RestartScheduled { at })
            .await?;
        info!(
            video_id = %video.id,
            attempt = video.restart_attempts,
            delay = ?delay,
            "Ingress restart scheduled"
        );

        self.spawn_restart_timer(video.id.clone(), delay, at);
        Ok(ErrorOutcome::RetryScheduled { delay, at })
    }

    fn spawn_restart_timer(&self, id: VideoId, delay: Duration, at: DateTime<Utc>) {
        let manager = self.clone();
        let shutdown = self.shutdown.child_token();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!(video_id = %id, "Restart timer cancelled");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
            if let Err(e) = manager.run_scheduled_restart(&id, at).await {
                warn!(video_id = %id, error = %e, "Scheduled ingress restart failed");
            }
        });
    }
}
