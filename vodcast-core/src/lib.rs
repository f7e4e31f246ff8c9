//! Broadcast ingress reconciliation core
//!
//! Keeps each video's streaming state consistent with the ingress resources
//! of an external media control plane, schedules broadcasts, tracks viewing
//! sessions and derives per-video analytics.

pub mod bootstrap;
pub mod clock;
pub mod config;
pub mod control_plane;
pub mod error;
pub mod logging;
pub mod models;
pub mod repository;
pub mod resilience;
pub mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
