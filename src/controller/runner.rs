//! Controller runner - wires the reconcile loop to a Deployment watch

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use crate::health::Readiness;

use super::reconcile::{error_policy, reconcile, Context};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Deployment API scoped to one namespace, or cluster-wide
pub fn deployment_api(client: Client, namespace: Option<&str>) -> Api<Deployment> {
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Build the Deployment controller future
///
/// At most `concurrency` Deployments reconcile at once; a single key is
/// never reconciled twice concurrently. The future completes on SIGTERM or
/// SIGINT, and `readiness` is raised for as long as it runs.
pub fn build_controller(
    deployments: Api<Deployment>,
    ctx: Arc<Context>,
    concurrency: u16,
    readiness: Readiness,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let controller = Controller::new(
        deployments,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .with_config(ControllerConfig::default().concurrency(concurrency))
    .shutdown_on_signal()
    .run(reconcile, error_policy, ctx)
    .for_each(log_reconcile_result("Deployment"));

    Box::pin(async move {
        tracing::info!(concurrency, "- Deployment controller");
        readiness.set(true);
        controller.await;
        readiness.set(false);
    })
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
