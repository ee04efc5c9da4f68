//! Glue between `kube::runtime::Controller` and the reconciler.

use std::sync::Arc;

use anyhow::Result;
use echo_core::{Echo, EchoError};
use echo_reconcile::Reconciler;
use futures::StreamExt;
use kube::{
    runtime::{
        controller::{self, Action, Controller},
        watcher,
    },
    Api, Client,
};
use tracing::{debug, info, warn};

pub struct Ctx {
    pub reconciler: Reconciler,
}

/// The watch cache only tells us which object to look at; the pass re-reads it.
pub async fn reconcile(obj: Arc<Echo>, ctx: Arc<Ctx>) -> Result<Action, EchoError> {
    ctx.reconciler.reconcile(&obj.key()).await.map(|_| Action::await_change())
}

pub fn error_policy(_obj: Arc<Echo>, err: &EchoError, ctx: Arc<Ctx>) -> Action {
    Action::requeue(ctx.reconciler.config().requeue_for(err))
}

/// Watch `Echo` objects (one namespace or all) until SIGINT/SIGTERM.
pub async fn run(client: Client, namespace: Option<&str>, reconciler: Reconciler) -> Result<()> {
    let api: Api<Echo> = match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let ctx = Arc::new(Ctx { reconciler });
    info!(ns = ?namespace, "echo controller started");
    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(echo = %obj, "pass finished"),
                // already logged by the reconciler
                Err(controller::Error::ReconcilerFailed(e, obj)) => debug!(echo = %obj, error = %e, "pass failed"),
                Err(e) => warn!(error = %e, "controller error"),
            }
        })
        .await;
    info!("echo controller stopped");
    Ok(())
}
