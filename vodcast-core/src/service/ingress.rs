//! Ingress lifecycle for broadcast videos
//!
//! `IngressManager` is the only code path that changes a video's streaming
//! state. Every public operation takes the per-video lock, reloads the video
//! from the store, decides (calling the control plane if needed), applies an
//! `IngressTransition` and persists. The lock is not reentrant, so the work is
//! done by `*_locked` helpers that operate on the already-loaded video.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    clock::Clock,
    config::{ControlPlaneConfig, IngressConfig},
    control_plane::{
        ControlPlaneError, CreateIngressRequest, IngressFilter, IngressInfo, IngressStatus,
        MediaControlPlane,
    },
    models::{IngressTransition, StreamingMode, Video, VideoId},
    repository::VideoRepository,
    resilience::{retry::RestartBackoff, timeout},
    service::entity_lock::EntityLocks,
    Error, Result,
};

/// Who asked for an ingress to be created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Trigger {
    /// User, API or scheduler action; clears restart bookkeeping
    Manual,
    /// Restart policy or reconciliation
    Automatic,
}

/// Result of reading an ingress back from the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveOutcome {
    /// Nothing to check or nothing changed
    Unchanged,
    /// Remote ingress was gone; local state reset
    Healed,
    /// Local state moved to match the remote status
    Transitioned,
}

#[derive(Clone)]
pub struct IngressManager {
    pub(super) videos: Arc<dyn VideoRepository>,
    pub(super) control_plane: Arc<dyn MediaControlPlane>,
    pub(super) locks: Arc<EntityLocks<VideoId>>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) control_plane_config: ControlPlaneConfig,
    pub(super) backoff: RestartBackoff,
    /// Cancels pending restart timers
    pub(super) shutdown: CancellationToken,
}

impl IngressManager {
    pub fn new(
        videos: Arc<dyn VideoRepository>,
        control_plane: Arc<dyn MediaControlPlane>,
        clock: Arc<dyn Clock>,
        control_plane_config: ControlPlaneConfig,
        ingress_config: &IngressConfig,
    ) -> Self {
        Self {
            videos,
            control_plane,
            locks: Arc::new(EntityLocks::new("video", ingress_config.lock_timeout())),
            clock,
            control_plane_config,
            backoff: RestartBackoff::from_config(ingress_config),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that drops every pending restart timer when cancelled
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Per-video lock table, shared with the catalog service
    #[must_use]
    pub fn locks(&self) -> &Arc<EntityLocks<VideoId>> {
        &self.locks
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(super) async fn load(&self, id: &VideoId) -> Result<Video> {
        self.videos
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Video {id} not found")))
    }

    /// Apply a transition and persist it if anything changed
    pub(super) async fn transition(&self, video: &mut Video, transition: IngressTransition) -> Result<bool> {
        let changed = video.apply(transition, self.clock.now());
        if changed {
            self.videos.save_streaming_state(video).await?;
        }
        Ok(changed)
    }

    /// Make a video viewable
    ///
    /// On-demand videos become servable immediately; broadcast and scheduled
    /// videos get an ingress through `ensure_broadcast_ingress`.
    pub async fn start_streaming(&self, id: &VideoId) -> Result<Video> {
        let _guard = self.locks.acquire(id).await?;
        let mut video = self.load(id).await?;

        if video.uses_ingress() {
            self.ensure_locked(&mut video).await?;
        } else {
            self.transition(&mut video, IngressTransition::ServeDirect).await?;
            info!(video_id = %id, "On-demand streaming started");
        }
        Ok(video)
    }

    /// Tear down any ingress and reset to `inactive`
    ///
    /// The remote delete is best-effort; the local reset always happens.
    pub async fn stop_streaming(&self, id: &VideoId) -> Result<Video> {
        let _guard = self.locks.acquire(id).await?;
        let mut video = self.load(id).await?;
        self.stop_locked(&mut video).await?;
        Ok(video)
    }

    pub(super) async fn stop_locked(&self, video: &mut Video) -> Result<()> {
        if let Some(ingress_id) = video.ingress_id.clone() {
            self.delete_remote_best_effort(&video.id, &ingress_id).await;
        }
        if self.transition(video, IngressTransition::Reset).await? {
            info!(video_id = %video.id, "Streaming stopped");
        }
        Ok(())
    }

    /// Provision an ingress if the video has none, else health-check it
    pub async fn ensure_broadcast_ingress(&self, id: &VideoId) -> Result<Video> {
        let _guard = self.locks.acquire(id).await?;
        let mut video = self.load(id).await?;
        self.ensure_locked(&mut video).await?;
        Ok(video)
    }

    pub(super) async fn ensure_locked(&self, video: &mut Video) -> Result<()> {
        if !video.uses_ingress() {
            debug!(video_id = %video.id, mode = %video.streaming_mode, "No ingress for this mode");
            return Ok(());
        }

        if video.needs_new_ingress() {
            self.create_locked(video, Trigger::Manual).await
        } else {
            self.check_health_locked(video).await;
            Ok(())
        }
    }

    /// Create a fresh ingress for the video, replacing any previous one
    ///
    /// Failures leave the video in `error` and are returned to the caller.
    pub async fn create_broadcast_ingress(&self, id: &VideoId) -> Result<Video> {
        let _guard = self.locks.acquire(id).await?;
        let mut video = self.load(id).await?;
        self.create_locked(&mut video, Trigger::Manual).await?;
        Ok(video)
    }

    pub(super) async fn create_locked(&self, video: &mut Video, trigger: Trigger) -> Result<()> {
        if !video.uses_ingress() {
            return Err(Error::InvalidState(format!(
                "Video {} is {}, ingress requires live_broadcast or scheduled",
                video.id, video.streaming_mode
            )));
        }
        let source_url = match video.source_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => {
                return Err(Error::InvalidInput(format!(
                    "Video {} has no playable source URL",
                    video.id
                )))
            }
        };

        if let Some(old) = video.ingress_id.clone() {
            self.delete_remote_best_effort(&video.id, &old).await;
        }
        let release = match trigger {
            Trigger::Manual => IngressTransition::Reset,
            Trigger::Automatic => IngressTransition::Released,
        };
        // Persisted before the remote call so observers see the attempt
        let now = self.clock.now();
        let released = video.apply(release, now);
        if video.apply(IngressTransition::Provisioning, now) || released {
            self.videos.save_streaming_state(video).await?;
        }

        let request = CreateIngressRequest {
            name: format!("Broadcast: {}", video.title),
            room_name: video.room_name.clone(),
            source_url,
            participant_identity: format!(
                "{}-{}",
                self.control_plane_config.participant_identity_prefix, video.id
            ),
            participant_name: self.control_plane_config.participant_name.clone(),
            enable_transcoding: self.control_plane_config.enable_transcoding,
        };

        let created = timeout::bounded(
            self.control_plane_config.request_timeout(),
            self.control_plane.create_ingress(request),
        )
        .await;

        match created {
            Ok(ingress) => {
                info!(
                    video_id = %video.id,
                    ingress_id = %ingress.ingress_id,
                    status = %ingress.status,
                    "Ingress created"
                );
                self.transition(
                    video,
                    IngressTransition::Provisioned {
                        ingress_id: ingress.ingress_id,
                        url: ingress.url,
                        status: ingress.status,
                    },
                )
                .await?;
                Ok(())
            }
            Err(e) => {
                error!(video_id = %video.id, error = %e, "Failed to create ingress");
                self.transition(video, IngressTransition::Failed).await?;
                Err(e.into())
            }
        }
    }

    /// Reconcile the video with its remote ingress; never fails
    ///
    /// Returns the video as left by the check, or `None` when it could not be
    /// loaded.
    pub async fn check_ingress_health(&self, id: &VideoId) -> Option<Video> {
        let loaded = async {
            let guard = self.locks.acquire(id).await?;
            let video = self.load(id).await?;
            Ok::<_, Error>((guard, video))
        }
        .await;

        match loaded {
            Ok((_guard, mut video)) => {
                self.check_health_locked(&mut video).await;
                Some(video)
            }
            Err(e) => {
                warn!(video_id = %id, error = %e, "Ingress health check skipped");
                None
            }
        }
    }

    pub(super) async fn check_health_locked(&self, video: &mut Video) {
        let Some(ingress_id) = video.ingress_id.clone() else {
            debug!(video_id = %video.id, "No ingress to check");
            return;
        };

        let remote = match self.fetch_remote(&ingress_id).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(video_id = %video.id, ingress_id = %ingress_id, error = %e, "Ingress lookup failed");
                return;
            }
        };

        let result = match remote {
            None => self.vanished_locked(video, &ingress_id).await.map(|_| ()),
            Some(ingress) if ingress.status == IngressStatus::Complete => self.completed_locked(video).await,
            Some(ingress) => self.observed_locked(video, ingress.status).await.map(|_| ()),
        };

        if let Err(e) = result {
            warn!(video_id = %video.id, ingress_id = %ingress_id, error = %e, "Ingress health check failed");
        }
    }

    /// Pull the remote status of a video's ingress and converge on it
    ///
    /// Used by the reconciliation loop. Remote `complete` and `error` run the
    /// completion and error policies.
    pub async fn observe_remote(&self, id: &VideoId) -> Result<ObserveOutcome> {
        let _guard = self.locks.acquire(id).await?;
        let mut video = self.load(id).await?;

        if !video.uses_ingress() || !video.has_live_ingress() {
            return Ok(ObserveOutcome::Unchanged);
        }
        let Some(ingress_id) = video.ingress_id.clone() else {
            return Ok(ObserveOutcome::Unchanged);
        };

        match self.fetch_remote(&ingress_id).await? {
            None => self.vanished_locked(&mut video, &ingress_id).await,
            Some(ingress) => match ingress.status {
                IngressStatus::Complete => {
                    self.completed_locked(&mut video).await?;
                    Ok(ObserveOutcome::Transitioned)
                }
                IngressStatus::Error => {
                    self.error_locked(&mut video).await?;
                    Ok(ObserveOutcome::Transitioned)
                }
                status => self.observed_locked(&mut video, status).await,
            },
        }
    }

    /// Create the ingress a streaming live broadcast lost track of
    ///
    /// Returns whether a create was attempted.
    pub async fn create_if_missing(&self, id: &VideoId) -> Result<bool> {
        let _guard = self.locks.acquire(id).await?;
        let mut video = self.load(id).await?;

        if video.streaming_mode != StreamingMode::LiveBroadcast
            || !video.streaming_active
            || video.ingress_id.is_some()
        {
            return Ok(false);
        }

        info!(video_id = %id, "Creating missing ingress for broadcast video");
        self.create_locked(&mut video, Trigger::Automatic).await?;
        Ok(true)
    }

    async fn fetch_remote(&self, ingress_id: &str) -> std::result::Result<Option<IngressInfo>, ControlPlaneError> {
        let listed = timeout::bounded(
            self.control_plane_config.request_timeout(),
            self.control_plane.list_ingress(IngressFilter::by_id(ingress_id)),
        )
        .await?;

        Ok(listed.into_iter().find(|i| i.ingress_id == ingress_id))
    }

    async fn vanished_locked(&self, video: &mut Video, ingress_id: &str) -> Result<ObserveOutcome> {
        warn!(video_id = %video.id, ingress_id = %ingress_id, "Ingress not found remotely, resetting");
        self.transition(video, IngressTransition::Vanished).await?;
        Ok(ObserveOutcome::Healed)
    }

    async fn observed_locked(&self, video: &mut Video, status: IngressStatus) -> Result<ObserveOutcome> {
        let from = video.ingress_state;
        if self.transition(video, IngressTransition::Observed(status)).await? {
            info!(
                video_id = %video.id,
                status = %status,
                from = %from,
                to = %video.ingress_state,
                "Ingress state updated"
            );
            Ok(ObserveOutcome::Transitioned)
        } else {
            Ok(ObserveOutcome::Unchanged)
        }
    }

    /// Delete a remote ingress, logging instead of failing
    pub(super) async fn delete_remote_best_effort(&self, video_id: &VideoId, ingress_id: &str) {
        let deleted = timeout::bounded(
            self.control_plane_config.request_timeout(),
            self.control_plane.delete_ingress(ingress_id),
        )
        .await;

        match deleted {
            Ok(()) => debug!(video_id = %video_id, ingress_id = %ingress_id, "Ingress deleted"),
            Err(ControlPlaneError::NotFound(_)) => {
                debug!(video_id = %video_id, ingress_id = %ingress_id, "Ingress already gone");
            }
            Err(e) => {
                warn!(video_id = %video_id, ingress_id = %ingress_id, error = %e, "Failed to delete ingress");
            }
        }
    }
}
