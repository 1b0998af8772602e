//! Deployment reconciliation: sync managed CronJob images, then drop stale Jobs
//!
//! One pass per Deployment key:
//! fetch → match CronJobs → for each: sync images → persist if changed →
//! delete owned Jobs. Any persist or delete failure ends the pass.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::CronJob;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::backoff::{Backoff, BackoffConfig};
use crate::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use crate::metrics::{OtelSyncMetrics, SyncCounter, SyncMetrics};
use crate::object::ObjectKey;
use crate::sync::{find_managed, sync_cronjob, DesiredImages, ImageChange, MatchRules};
use crate::{Error, CONTROLLER_NAME};

use super::client::{KubeClient, KubeClientImpl};
use super::invalidate::invalidate_jobs;

/// Controller context containing shared state
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```ignore
/// let ctx = Context::builder(client)
///     .match_rules(MatchRules { shared_image: false })
///     .build();
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Publisher for Kubernetes Events
    pub events: Arc<dyn EventPublisher>,
    /// Sink for reconcile counters
    pub metrics: Arc<dyn SyncMetrics>,
    /// Which rules relate a CronJob to a Deployment
    pub match_rules: MatchRules,
    /// Per-key requeue delays for failed reconciles
    pub backoff: Backoff,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with custom fakes
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        events: Arc<dyn EventPublisher>,
        metrics: Arc<dyn SyncMetrics>,
    ) -> Self {
        Self {
            kube,
            events,
            metrics,
            match_rules: MatchRules::default(),
            backoff: Backoff::default(),
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    events: Option<Arc<dyn EventPublisher>>,
    metrics: Option<Arc<dyn SyncMetrics>>,
    match_rules: MatchRules,
    backoff: BackoffConfig,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            events: None,
            metrics: None,
            match_rules: MatchRules::default(),
            backoff: BackoffConfig::default(),
        }
    }

    /// Set the CronJob matching rules
    pub fn match_rules(mut self, rules: MatchRules) -> Self {
        self.match_rules = rules;
        self
    }

    /// Set the requeue backoff for failed reconciles
    pub fn backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff = config;
        self
    }

    /// Override the Kubernetes client
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the event publisher
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Override the counter sink
    pub fn metrics(mut self, metrics: Arc<dyn SyncMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            events: self.events.unwrap_or_else(|| {
                Arc::new(KubeEventPublisher::new(self.client.clone(), CONTROLLER_NAME))
            }),
            metrics: self.metrics.unwrap_or_else(|| Arc::new(OtelSyncMetrics::global())),
            match_rules: self.match_rules,
            backoff: Backoff::new(self.backoff),
        }
    }
}

/// What one reconcile pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// CronJobs related to the Deployment
    pub matched: usize,
    /// CronJobs whose images were rewritten
    pub updated: usize,
    /// Jobs deleted across all updated CronJobs
    pub jobs_deleted: usize,
}

/// Reconcile a Deployment delivered by the controller
///
/// The delivered object is only used for its key; state is re-read from the
/// API server. Success waits for the next Deployment change.
#[instrument(skip(deployment, ctx), fields(deployment = %deployment.name_any()))]
pub async fn reconcile(deployment: Arc<Deployment>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = ObjectKey::of(deployment.as_ref())?;
    let summary = reconcile_key(&ctx, &key).await?;
    ctx.backoff.reset(&key);

    if summary.updated > 0 {
        info!(
            deployment = %key,
            matched = summary.matched,
            updated = summary.updated,
            jobs_deleted = summary.jobs_deleted,
            "synced cronjob images"
        );
    }
    Ok(Action::await_change())
}

/// Run one reconcile pass for the Deployment at `key`
///
/// A Deployment that no longer exists is a successful no-op.
pub async fn reconcile_key(ctx: &Context, key: &ObjectKey) -> Result<ReconcileSummary, Error> {
    let Some(deployment) = ctx.kube.get_deployment(&key.namespace, &key.name).await? else {
        debug!(deployment = %key, "deployment not found, nothing to do");
        return Ok(ReconcileSummary::default());
    };

    debug!(deployment = %key, "reconciling deployment");
    ctx.metrics
        .increment(SyncCounter::ReconcilesStarted, &key.namespace, &key.name);

    let desired = DesiredImages::from_deployment(&deployment);
    let candidates = ctx.kube.list_cronjobs(&key.namespace).await?;
    let managed = find_managed(&deployment, candidates, ctx.match_rules);

    let mut summary = ReconcileSummary {
        matched: managed.len(),
        ..Default::default()
    };

    for mut cronjob in managed {
        let changes = sync_cronjob(&desired, &mut cronjob);
        if changes.is_empty() {
            debug!(deployment = %key, cronjob = %cronjob.name_any(), "cronjob already up to date");
            continue;
        }

        let updated = persist(ctx, &deployment, key, &cronjob, &changes).await?;
        summary.updated += 1;
        summary.jobs_deleted += invalidate(ctx, key, &updated).await?;
    }

    Ok(summary)
}

/// Write a changed CronJob back and report the outcome
async fn persist(
    ctx: &Context,
    deployment: &Deployment,
    key: &ObjectKey,
    cronjob: &CronJob,
    changes: &[ImageChange],
) -> Result<CronJob, Error> {
    let name = cronjob.name_any();

    match ctx.kube.replace_cronjob(cronjob).await {
        Ok(updated) => {
            ctx.metrics
                .increment(SyncCounter::CronJobsUpdated, &key.namespace, &name);
            ctx.events
                .publish(
                    &updated.object_ref(&()),
                    EventType::Normal,
                    reasons::CRONJOB_UPDATED,
                    actions::SYNC_IMAGES,
                    Some(format!(
                        "Updated job template images from Deployment {key}: {}",
                        describe(changes)
                    )),
                )
                .await;
            info!(deployment = %key, cronjob = %name, changes = %describe(changes), "updated cronjob images");
            Ok(updated)
        }
        Err(e) => {
            error!(deployment = %key, cronjob = %name, error = %e, "failed to update cronjob");
            ctx.metrics
                .increment(SyncCounter::Errors, &key.namespace, &key.name);
            ctx.events
                .publish(
                    &deployment.object_ref(&()),
                    EventType::Warning,
                    reasons::UPDATE_FAILED,
                    actions::SYNC_IMAGES,
                    Some(format!("failed to update CronJob {name}: {e}")),
                )
                .await;
            Err(e)
        }
    }
}

/// Delete Jobs of a freshly updated CronJob and report the outcome
async fn invalidate(ctx: &Context, key: &ObjectKey, cronjob: &CronJob) -> Result<usize, Error> {
    let name = cronjob.name_any();
    let cronjob_ref = cronjob.object_ref(&());

    match invalidate_jobs(ctx, cronjob).await {
        Ok(deleted) => {
            ctx.events
                .publish(
                    &cronjob_ref,
                    EventType::Normal,
                    reasons::JOBS_RECREATED,
                    actions::DELETE_JOBS,
                    Some("Deleted existing Jobs so future runs use the updated image".to_string()),
                )
                .await;
            Ok(deleted)
        }
        Err(e) => {
            error!(deployment = %key, cronjob = %name, error = %e, "failed to delete jobs for cronjob");
            ctx.metrics
                .increment(SyncCounter::Errors, &key.namespace, &key.name);
            ctx.events
                .publish(
                    &cronjob_ref,
                    EventType::Warning,
                    reasons::DELETE_JOBS_FAILED,
                    actions::DELETE_JOBS,
                    Some(format!("failed to delete Jobs for CronJob {name}: {e}")),
                )
                .await;
            Err(e)
        }
    }
}

fn describe(changes: &[ImageChange]) -> String {
    changes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Error policy for the controller
///
/// Requeues the Deployment with a per-key exponential backoff. The delay
/// grows with consecutive failures and resets after a success.
pub fn error_policy(deployment: Arc<Deployment>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = ObjectKey::new(
        deployment.namespace().unwrap_or_default(),
        deployment.name_any(),
    );
    let delay = ctx.backoff.next_delay(&key);

    if error.is_conflict() {
        warn!(deployment = %key, ?delay, "cronjob changed during reconcile, retrying");
    } else {
        error!(deployment = %key, error = %error, ?delay, "reconciliation failed");
    }

    Action::requeue(delay)
}
