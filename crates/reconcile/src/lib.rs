//! Echo reconcile: one convergence pass for an `Echo` object.
//!
//! A pass reads the desired object, resolves its target, extracts `refPath`
//! and writes the value into `status.data` when it changed. Concurrent or
//! duplicate passes are safe because the status write carries the
//! resourceVersion that was read; on conflict the whole pass is redone from
//! a fresh read.

#![forbid(unsafe_code)]

mod config;
pub mod mock;

use std::sync::Arc;
use std::time::Instant;

use echo_core::{extract, observed, EchoError, EchoResult, EchoStore, FieldPath, ObjectKey, Resolver};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

pub use config::ReconcilerConfig;

/// Result of a converged pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The object was gone by the time it was read.
    Deleted,
    /// `status.data` already held the extracted value.
    Unchanged,
    /// A new value was written.
    Updated { resource_version: Option<String> },
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Deleted => "deleted",
            Outcome::Unchanged => "unchanged",
            Outcome::Updated { .. } => "updated",
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn EchoStore>,
    resolver: Arc<dyn Resolver>,
    cfg: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(store: Arc<dyn EchoStore>, resolver: Arc<dyn Resolver>, cfg: ReconcilerConfig) -> Self {
        Self { store, resolver, cfg }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.cfg
    }

    /// Run passes for `key` until one finishes without a write conflict or the
    /// conflict budget is spent.
    pub async fn reconcile(&self, key: &ObjectKey) -> EchoResult<Outcome> {
        let t0 = Instant::now();
        let mut conflicts = 0u32;
        let res = loop {
            match self.pass(key).await {
                Err(EchoError::Conflict(msg)) if conflicts < self.cfg.conflict_retries => {
                    conflicts += 1;
                    counter!("echo_reconcile_conflicts_total", 1u64);
                    debug!(echo = %key, attempt = conflicts, reason = %msg, "status write conflicted; re-reading");
                }
                other => break other,
            }
        };
        histogram!("echo_reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        match &res {
            Ok(outcome) => {
                counter!("echo_reconcile_total", 1u64, "outcome" => outcome.label());
                info!(echo = %key, outcome = outcome.label(), conflicts, "reconciled");
            }
            Err(e) => {
                counter!("echo_reconcile_total", 1u64, "outcome" => e.kind());
                if e.is_recoverable() {
                    warn!(echo = %key, error = %e, "reconcile incomplete; will retry");
                } else {
                    error!(echo = %key, error = %e, "reconcile failed");
                }
            }
        }
        res
    }

    async fn pass(&self, key: &ObjectKey) -> EchoResult<Outcome> {
        let mut echo = match self.store.get(key).await? {
            Some(echo) => echo,
            None => {
                debug!(echo = %key, "echo no longer exists; nothing to do");
                return Ok(Outcome::Deleted);
            }
        };
        // a bad refPath never reaches the target
        let path = FieldPath::parse(&echo.spec.ref_path)?;
        let target = echo.target();
        debug!(echo = %key, target = %target, rv = ?echo.metadata.resource_version, "resolving target");

        let raw = self.resolver.resolve(&target).await?;
        let value = match extract(&raw, &path)? {
            Some(v) => v.clone(),
            None => return Err(EchoError::FieldNotFound { path: path.to_string() }),
        };
        debug!(echo = %key, ref_path = %path, value = %value, "extracted field");

        if observed::unchanged(echo.observed(), &value)? {
            return Ok(Outcome::Unchanged);
        }
        echo.status.get_or_insert_with(Default::default).data = Some(value);
        let written = self.store.update_status(&echo).await?;
        counter!("echo_status_writes_total", 1u64);
        Ok(Outcome::Updated { resource_version: written.metadata.resource_version })
    }
}
