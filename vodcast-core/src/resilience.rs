//! Resilience helpers for media control plane calls
//!
//! Every remote call is bounded by a timeout, and automatic ingress restarts
//! follow an exponential backoff computed by the `backon` crate.

pub mod timeout {
    //! Timeout wrapper for control plane calls

    use std::future::Future;
    use std::time::Duration;

    use crate::control_plane::{ControlPlaneError, Result};

    /// Run a control plane call, turning an elapsed deadline into
    /// `ControlPlaneError::Timeout`
    pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(ControlPlaneError::Timeout(limit)),
        }
    }
}

pub mod retry {
    //! Restart backoff
    //!
    //! Delays come from `backon`'s exponential builder without jitter, so the
    //! persisted attempt counter maps to a predictable delay.

    use std::time::Duration;

    use backon::{BackoffBuilder, ExponentialBuilder};

    use crate::config::IngressConfig;

    #[derive(Debug, Clone, Copy)]
    pub struct RestartBackoff {
        pub initial: Duration,
        pub max: Duration,
        pub max_attempts: u32,
    }

    impl RestartBackoff {
        #[must_use]
        pub const fn new(initial: Duration, max: Duration, max_attempts: u32) -> Self {
            Self {
                initial,
                max,
                max_attempts,
            }
        }

        #[must_use]
        pub const fn from_config(config: &IngressConfig) -> Self {
            Self::new(
                config.restart_backoff_initial(),
                config.restart_backoff_max(),
                config.max_restart_attempts,
            )
        }

        /// Delay before restart number `attempt + 1`, `None` once exhausted
        #[must_use]
        pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
            ExponentialBuilder::default()
                .with_min_delay(self.initial)
                .with_max_delay(self.max)
                .with_max_times(self.max_attempts as usize)
                .build()
                .nth(attempt as usize)
        }
    }

    impl Default for RestartBackoff {
        fn default() -> Self {
            Self::from_config(&IngressConfig::default())
        }
    }
}
