//! Kubernetes Events emitted while syncing CronJobs
//!
//! Reconciles report what they changed on the object they changed: image
//! rewrites and Job deletions on the CronJob, failed writes on the
//! Deployment. Publishing never fails a reconcile; a rejected Event is
//! logged and dropped.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

/// Where reconciles send their Events
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Attach an Event to `regarding`
    ///
    /// `reason` is one of [`reasons`], `action` one of [`actions`].
    async fn publish(
        &self,
        regarding: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Build the Event body sent to the API server
pub fn sync_event(type_: EventType, reason: &str, action: &str, note: Option<String>) -> Event {
    Event {
        type_,
        reason: reason.to_string(),
        note,
        action: action.to_string(),
        secondary: None,
    }
}

/// Publishes through `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Events are reported as `controller_name`, instance `$POD_NAME`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        regarding: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = sync_event(type_, reason, action, note);
        if let Err(e) = self.recorder.publish(&event, regarding).await {
            warn!(
                reason,
                kind = regarding.kind.as_deref().unwrap_or_default(),
                name = regarding.name.as_deref().unwrap_or_default(),
                error = %e,
                "Dropping event the API server rejected"
            );
        }
    }
}

/// Event reasons
pub mod reasons {
    /// CronJob template images were rewritten from its Deployment
    pub const CRONJOB_UPDATED: &str = "CronJobUpdated";
    /// Writing the CronJob back failed
    pub const UPDATE_FAILED: &str = "UpdateFailed";
    /// A Job owned by the CronJob was deleted
    pub const JOB_DELETED: &str = "JobDeleted";
    /// Deleting the CronJob's Jobs failed
    pub const DELETE_JOBS_FAILED: &str = "DeleteJobsFailed";
    /// All stale Jobs are gone; future runs use the new image
    pub const JOBS_RECREATED: &str = "JobsRecreated";
}

/// Event actions
pub mod actions {
    /// Rewriting CronJob images
    pub const SYNC_IMAGES: &str = "SyncImages";
    /// Removing Jobs spawned from an outdated template
    pub const DELETE_JOBS: &str = "DeleteJobs";
}
