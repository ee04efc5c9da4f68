use async_trait::async_trait;
use serde_json::Value;

use crate::{Echo, EchoResult, ObjectKey, TargetRef};

/// Storage collaborator for `Echo` objects.
#[async_trait]
pub trait EchoStore: Send + Sync {
    /// Fetch the desired-state object. `Ok(None)` when it no longer exists.
    async fn get(&self, key: &ObjectKey) -> EchoResult<Option<Echo>>;

    /// Replace the status of `echo`, using its `metadata.resourceVersion` as
    /// precondition. A version mismatch must come back as `EchoError::Conflict`.
    async fn update_status(&self, echo: &Echo) -> EchoResult<Echo>;
}

/// Fetches an arbitrary target object as schema-less JSON. Never mutates it.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, target: &TargetRef) -> EchoResult<Value>;
}
