//! Exact owner-reference matching between CronJobs and Jobs
//!
//! Ownership is decided on `(kind, name, uid)` equality. Comparing the UID
//! keeps a CronJob that was deleted and recreated under the same name from
//! claiming Jobs left behind by its predecessor.

use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

use crate::CRONJOB_KIND;

/// Identity tuple an owner reference must carry to point at a CronJob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerIdentity {
    /// Owner kind (always `CronJob` here)
    pub kind: String,
    /// Owner name
    pub name: String,
    /// Owner UID
    pub uid: String,
}

impl OwnerIdentity {
    /// Identity of a CronJob as it currently exists
    ///
    /// Returns `None` for a CronJob that has not been persisted (no UID),
    /// since nothing can reference it yet.
    pub fn of_cronjob(cronjob: &CronJob) -> Option<Self> {
        Some(Self {
            kind: CRONJOB_KIND.to_string(),
            name: cronjob.metadata.name.clone()?,
            uid: cronjob.metadata.uid.clone()?,
        })
    }

    /// Whether an owner reference points at exactly this identity
    pub fn matches(&self, reference: &OwnerReference) -> bool {
        reference.kind == self.kind && reference.name == self.name && reference.uid == self.uid
    }
}

/// Whether any of the Job's owner references points at the owner
pub fn is_owned_by(job: &Job, owner: &OwnerIdentity) -> bool {
    job.metadata
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|r| owner.matches(r))
}

/// Jobs owned by the given CronJob, in list order
pub fn owned_jobs<'a>(jobs: &'a [Job], owner: &OwnerIdentity) -> Vec<&'a Job> {
    jobs.iter().filter(|j| is_owned_by(j, owner)).collect()
}
