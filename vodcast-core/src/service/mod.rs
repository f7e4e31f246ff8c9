pub mod analytics;
pub mod entity_lock;
pub mod ingress;
pub mod lifecycle;
pub mod reconciler;
pub mod scheduler;
pub mod session_tracker;
pub mod video;

pub use analytics::AnalyticsService;
pub use entity_lock::EntityLocks;
pub use ingress::{IngressManager, ObserveOutcome};
pub use lifecycle::ErrorOutcome;
pub use reconciler::{IngressReconciler, ReconcileReport};
pub use scheduler::{plan, BroadcastScheduler, ScheduleActions, ScheduleReport};
pub use session_tracker::{SessionStart, SessionTracker};
pub use video::VideoService;
