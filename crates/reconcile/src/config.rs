use std::time::Duration;

use echo_core::EchoError;
use serde::{Deserialize, Serialize};

/// Knobs for the reconciler and the requeue policy handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Extra full passes after a status write conflict.
    pub conflict_retries: u32,
    /// Delay before retrying a recoverable failure.
    pub requeue_after: Duration,
    /// Delay before retrying a fatal failure (RBAC or CRD fixes land out of band).
    pub fatal_requeue_after: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            conflict_retries: 3,
            requeue_after: Duration::from_secs(10),
            fatal_requeue_after: Duration::from_secs(300),
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse::<u64>().ok())
}

impl ReconcilerConfig {
    /// Defaults overridden by `ECHO_CONFLICT_RETRIES`, `ECHO_REQUEUE_SECS`
    /// and `ECHO_FATAL_REQUEUE_SECS`. Unparsable values are ignored.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            conflict_retries: env_u64("ECHO_CONFLICT_RETRIES")
                .map(|v| v.min(u32::MAX as u64) as u32)
                .unwrap_or(d.conflict_retries),
            requeue_after: env_u64("ECHO_REQUEUE_SECS").map(Duration::from_secs).unwrap_or(d.requeue_after),
            fatal_requeue_after: env_u64("ECHO_FATAL_REQUEUE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.fatal_requeue_after),
        }
    }

    pub fn requeue_for(&self, err: &EchoError) -> Duration {
        if err.is_recoverable() {
            self.requeue_after
        } else {
            self.fatal_requeue_after
        }
    }
}
