//! Deletion of Jobs spawned from an outdated CronJob template

use k8s_openapi::api::batch::v1::CronJob;
use kube::api::PropagationPolicy;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{info, warn};

use crate::events::{actions, reasons};
use crate::metrics::SyncCounter;
use crate::object::ObjectKey;
use crate::sync::{owned_jobs, OwnerIdentity};
use crate::{Error, JOB_NAME_LABEL};

use super::Context;

/// Delete every Job owned by `cronjob`, together with its Pods
///
/// Jobs are matched on exact `(kind, name, uid)` owner references and
/// deleted with foreground propagation. Pods labeled `job-name=<job>` are
/// then deleted explicitly in case cascade GC has not reached them yet.
///
/// Returns the number of Jobs deleted. The first failing delete aborts the
/// rest and is returned to the caller.
///
/// This only runs after the CronJob was successfully rewritten. If the
/// process dies between that write and the end of this function, the next
/// reconcile sees the CronJob already in sync and never calls this again,
/// so the remaining Jobs stay until the image next changes.
pub async fn invalidate_jobs(ctx: &Context, cronjob: &CronJob) -> Result<usize, Error> {
    let key = ObjectKey::of(cronjob)?;
    let Some(owner) = OwnerIdentity::of_cronjob(cronjob) else {
        warn!(cronjob = %key, "cronjob has no uid, no jobs can be owned by it");
        return Ok(0);
    };

    let jobs = ctx.kube.list_jobs(&key.namespace).await?;
    let cronjob_ref = cronjob.object_ref(&());
    let mut deleted = 0;

    for job in owned_jobs(&jobs, &owner) {
        let job_name = job.name_any();

        ctx.kube
            .delete_job(&key.namespace, &job_name, PropagationPolicy::Foreground)
            .await?;
        ctx.kube
            .delete_pods(&key.namespace, &format!("{JOB_NAME_LABEL}={job_name}"))
            .await?;

        ctx.metrics
            .increment(SyncCounter::JobsDeleted, &key.namespace, &key.name);
        ctx.events
            .publish(
                &cronjob_ref,
                EventType::Normal,
                reasons::JOB_DELETED,
                actions::DELETE_JOBS,
                Some(format!(
                    "Deleted Job {job_name} and its Pods for CronJob {} to allow new runs with updated image",
                    key.name
                )),
            )
            .await;

        info!(cronjob = %key, job = %job_name, "deleted job from outdated template");
        deleted += 1;
    }

    Ok(deleted)
}
