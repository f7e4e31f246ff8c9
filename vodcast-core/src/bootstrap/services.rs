//! Service initialization and dependency injection

use std::sync::Arc;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    clock::{Clock, SystemClock},
    control_plane::MediaControlPlane,
    repository::{
        PgVideoRepository, PgViewingSessionRepository, VideoRepository, ViewingSessionRepository,
    },
    service::{
        AnalyticsService, BroadcastScheduler, IngressManager, IngressReconciler, SessionTracker,
        VideoService,
    },
    Config,
};

/// Container for all initialized services
#[derive(Clone)]
pub struct Services {
    /// Registration, settings and decommissioning
    pub video_service: Arc<VideoService>,
    /// Ingress lifecycle; the only writer of streaming state
    pub ingress_manager: IngressManager,
    pub session_tracker: SessionTracker,
    pub analytics_service: Arc<AnalyticsService>,
    pub reconciler: IngressReconciler,
    pub scheduler: BroadcastScheduler,
}

/// Initialize services backed by PostgreSQL and the given control plane
pub async fn init_services(
    pool: PgPool,
    config: &Config,
    control_plane: Arc<dyn MediaControlPlane>,
) -> Result<Services, anyhow::Error> {
    info!("Initializing services...");

    let videos: Arc<dyn VideoRepository> = Arc::new(PgVideoRepository::new(pool.clone()));
    let sessions: Arc<dyn ViewingSessionRepository> = Arc::new(PgViewingSessionRepository::new(pool));

    let services = build_services(videos, sessions, control_plane, Arc::new(SystemClock), config);
    info!("Services initialized");
    Ok(services)
}

/// Wire services over arbitrary stores, control plane and clock
pub fn build_services(
    videos: Arc<dyn VideoRepository>,
    sessions: Arc<dyn ViewingSessionRepository>,
    control_plane: Arc<dyn MediaControlPlane>,
    clock: Arc<dyn Clock>,
    config: &Config,
) -> Services {
    let ingress_manager = IngressManager::new(
        videos.clone(),
        control_plane.clone(),
        clock.clone(),
        config.control_plane.clone(),
        &config.ingress,
    );

    let session_tracker = SessionTracker::new(
        sessions.clone(),
        videos.clone(),
        clock.clone(),
        &config.analytics,
        config.ingress.lock_timeout(),
        config.reconciler.stale_session_after(),
    );

    let video_service = VideoService::new(
        videos.clone(),
        sessions.clone(),
        control_plane,
        ingress_manager.clone(),
        config.control_plane.clone(),
    );

    let analytics_service = AnalyticsService::new(videos, sessions, clock, config.analytics.clone());

    let reconciler = IngressReconciler::new(
        ingress_manager.clone(),
        session_tracker.clone(),
        config.reconciler.clone(),
    );
    let scheduler = BroadcastScheduler::new(ingress_manager.clone(), config.scheduler.clone());

    Services {
        video_service: Arc::new(video_service),
        ingress_manager,
        session_tracker,
        analytics_service: Arc::new(analytics_service),
        reconciler,
        scheduler,
    }
}

/// Handles of the spawned background jobs
pub struct BackgroundJobs {
    pub shutdown: CancellationToken,
    pub handles: Vec<JoinHandle<()>>,
}

impl BackgroundJobs {
    /// Cancel every job and wait for it to finish its current pass
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("Background job ended abnormally: {}", e);
            }
        }
        info!("Background jobs stopped");
    }
}

/// Start the reconciler and scheduler loops that are enabled in `config`
///
/// Shutting the jobs down also cancels pending ingress restart timers.
#[must_use]
pub fn start_jobs(services: &Services, config: &Config) -> BackgroundJobs {
    let shutdown = services.ingress_manager.shutdown_token().clone();
    let mut handles = Vec::new();

    if config.reconciler.enabled {
        handles.push(services.reconciler.start(shutdown.child_token()));
    } else {
        info!("Ingress reconciler disabled");
    }

    if config.scheduler.enabled {
        handles.push(services.scheduler.start(shutdown.child_token()));
    } else {
        info!("Broadcast scheduler disabled");
    }

    BackgroundJobs { shutdown, handles }
}
